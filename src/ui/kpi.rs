use eframe::egui::{self, RichText, Ui};
use egui_extras::{Column, TableBuilder};

use esf_dashboard::indicators::{Indicators, PhysicianSummary};

use crate::state::SummarySort;

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Thousands separated by dots, as in the Brazilian locale.
pub fn format_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

pub fn format_percent(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.1}%")).unwrap_or_else(|| "–".to_string())
}

pub fn format_decimal(v: Option<f64>, places: usize) -> String {
    v.map(|v| format!("{v:.places$}")).unwrap_or_else(|| "–".to_string())
}

// ---------------------------------------------------------------------------
// KPI cards
// ---------------------------------------------------------------------------

fn card(ui: &mut Ui, label: &str, value: String, help: &str) {
    egui::Frame::group(ui.style()).show(ui, |ui: &mut Ui| {
        ui.set_min_width(ui.available_width());
        ui.label(RichText::new(label).small().weak());
        ui.label(RichText::new(value).size(22.0).strong());
        ui.label(RichText::new(help).small().weak());
    });
}

pub fn kpi_row(ui: &mut Ui, kpis: &Indicators) {
    ui.columns(6, |cols| {
        card(
            &mut cols[0],
            "Visits",
            format_count(kpis.total_visits),
            "all records in the selection",
        );
        card(
            &mut cols[1],
            "Consultations",
            format_count(kpis.consultations),
            &format!("{} home visits", format_count(kpis.home_visits)),
        );
        card(
            &mut cols[2],
            "Referral rate",
            format_percent(kpis.referral_rate),
            "referred out of primary care",
        );
        card(
            &mut cols[3],
            "Resolution",
            format_percent(kpis.resolution_rate),
            "resolved or followed in primary care",
        );
        card(
            &mut cols[4],
            "Exams / consultation",
            format_decimal(kpis.exams_per_consultation, 2),
            &format!("mean wait {} days", format_decimal(kpis.mean_wait_days, 1)),
        );
        card(
            &mut cols[5],
            "Consultations / 1000",
            format_decimal(kpis.consultations_per_1000, 1),
            "registered population, mean over units",
        );
    });
}

// ---------------------------------------------------------------------------
// Physician table
// ---------------------------------------------------------------------------

/// Sortable per-physician indicators. Clicking a header sorts by it.
pub fn physician_table(ui: &mut Ui, rows: &[PhysicianSummary], sort: &mut SummarySort) {
    ui.strong("Indicators by physician");
    if rows.is_empty() {
        ui.label(RichText::new("No data for this selection").weak());
        return;
    }

    let mut ordered = rows.to_vec();
    sort.sort(&mut ordered);

    TableBuilder::new(ui)
        .striped(true)
        .resizable(true)
        .vscroll(false)
        .column(Column::auto().at_least(160.0))
        .columns(Column::auto().at_least(90.0), SummarySort::ALL.len())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.strong("Physician");
            });
            for key in SummarySort::ALL {
                header.col(|ui| {
                    if ui.selectable_label(*sort == key, key.label()).clicked() {
                        *sort = key;
                    }
                });
            }
        })
        .body(|mut body| {
            for row in &ordered {
                let k = &row.indicators;
                body.row(18.0, |mut r| {
                    r.col(|ui| {
                        ui.label(row.physician.to_string());
                    });
                    let cells = [
                        format_count(k.total_visits),
                        format_count(k.consultations),
                        format_percent(k.referral_rate),
                        format_decimal(k.exams_per_consultation, 2),
                        format_decimal(k.mean_wait_days, 1),
                        format_percent(k.resolution_rate),
                    ];
                    for cell in cells {
                        r.col(|ui| {
                            ui.label(cell);
                        });
                    }
                });
            }
        });
}
