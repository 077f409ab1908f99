use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDate};
use eframe::egui::{Color32, RichText, Stroke, Ui};
use egui_plot::{
    Bar, BarChart, BoxElem, BoxPlot, BoxSpread, GridMark, Legend, Line, Plot, PlotPoints,
};

use esf_dashboard::data::AggregateResult;
use esf_dashboard::data::aggregate::{GroupSummary, Series};
use esf_dashboard::indicators::FunnelStage;

use crate::color::ColorMap;

const PLOT_HEIGHT: f32 = 260.0;
const BAR_COLOR: Color32 = Color32::from_rgb(70, 130, 180);

fn no_data(ui: &mut Ui) {
    ui.label(RichText::new("No data for this selection").weak());
}

fn day_number(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}

fn month_label(x: f64) -> String {
    NaiveDate::from_num_days_from_ce_opt(x.round() as i32)
        .map(|d| d.format("%b %Y").to_string())
        .unwrap_or_default()
}

/// Label of the category sitting at integer position `x`.
fn category_label(labels: &[String], x: f64) -> String {
    if (x - x.round()).abs() > 1e-6 || x < 0.0 {
        return String::new();
    }
    labels.get(x.round() as usize).cloned().unwrap_or_default()
}

fn category_bars(rows: impl Iterator<Item = (String, f64, Color32)>) -> (Vec<String>, Vec<Bar>) {
    rows.enumerate()
        .map(|(i, (label, value, color))| {
            let bar = Bar::new(i as f64, value).name(&label).fill(color);
            (label, bar)
        })
        .unzip()
}

// ---------------------------------------------------------------------------
// Monthly production (line per visit type)
// ---------------------------------------------------------------------------

pub fn production_lines(ui: &mut Ui, series: &[Series], colors: Option<&ColorMap>) {
    ui.strong("Monthly production by visit type");
    if series.iter().all(|s| s.result.is_empty()) {
        no_data(ui);
        return;
    }

    Plot::new("monthly_production")
        .height(PLOT_HEIGHT)
        .legend(Legend::default())
        .x_axis_formatter(|mark: GridMark, _range: &RangeInclusive<f64>| month_label(mark.value))
        .y_axis_label("Visits")
        .allow_scroll(false)
        .show(ui, |plot_ui| {
            for s in series {
                // rows are chronological; the unknown month has no x position
                let points: PlotPoints = s
                    .result
                    .rows
                    .iter()
                    .filter_map(|row| {
                        let t = row.key.as_timestamp()?;
                        Some([day_number(t.date()), row.value.unwrap_or(0.0)])
                    })
                    .collect();

                let color = colors
                    .map(|cm| cm.color_for(&s.key))
                    .unwrap_or(Color32::LIGHT_BLUE);

                plot_ui.line(Line::new(points).name(s.key.to_string()).color(color).width(2.0));
            }
        });
}

// ---------------------------------------------------------------------------
// Category bars (outcomes, physician ranking)
// ---------------------------------------------------------------------------

/// Vertical bars of an aggregate, in its row order.
pub fn result_bars(ui: &mut Ui, id: &str, title: &str, result: &AggregateResult, colors: Option<&ColorMap>) {
    ui.strong(title);
    if result.is_empty() {
        no_data(ui);
        return;
    }

    let (labels, bars) = category_bars(result.rows.iter().map(|row| {
        let color = colors.map(|cm| cm.color_for(&row.key)).unwrap_or(BAR_COLOR);
        (row.key.to_string(), row.value.unwrap_or(0.0), color)
    }));

    Plot::new(id)
        .height(PLOT_HEIGHT)
        .x_axis_formatter(move |mark: GridMark, _range: &RangeInclusive<f64>| {
            category_label(&labels, mark.value)
        })
        .y_axis_label(result.metric.label())
        .allow_scroll(false)
        .show(ui, |plot_ui| plot_ui.bar_chart(BarChart::new(bars).width(0.7)));
}

/// Horizontal bars, first row on top.
pub fn ranking_bars(ui: &mut Ui, id: &str, title: &str, result: &AggregateResult) {
    ui.strong(title);
    if result.is_empty() {
        no_data(ui);
        return;
    }

    let n = result.len();
    // bottom-up placement keeps the largest bar at the top
    let (labels, bars) = category_bars(
        result
            .rows
            .iter()
            .rev()
            .map(|row| (row.key.to_string(), row.value.unwrap_or(0.0), BAR_COLOR)),
    );

    Plot::new(id)
        .height((n as f32 * 22.0).max(PLOT_HEIGHT))
        .y_axis_formatter(move |mark: GridMark, _range: &RangeInclusive<f64>| {
            category_label(&labels, mark.value)
        })
        .allow_scroll(false)
        .show(ui, |plot_ui| {
            plot_ui.bar_chart(BarChart::new(bars).horizontal().width(0.7))
        });
}

pub fn funnel_chart(ui: &mut Ui, stages: &[FunnelStage]) {
    ui.strong("Resolution funnel");
    if stages.first().map_or(true, |s| s.count == 0) {
        no_data(ui);
        return;
    }

    let (labels, bars) = category_bars(
        stages
            .iter()
            .rev()
            .map(|s| (s.label.to_string(), s.count as f64, BAR_COLOR)),
    );

    Plot::new("resolution_funnel")
        .height(PLOT_HEIGHT * 0.6)
        .y_axis_formatter(move |mark: GridMark, _range: &RangeInclusive<f64>| {
            category_label(&labels, mark.value)
        })
        .allow_scroll(false)
        .show(ui, |plot_ui| {
            plot_ui.bar_chart(BarChart::new(bars).horizontal().width(0.6))
        });
}

// ---------------------------------------------------------------------------
// Wait time per unit (box plot)
// ---------------------------------------------------------------------------

pub fn wait_boxplot(ui: &mut Ui, summaries: &[GroupSummary], colors: Option<&ColorMap>) {
    ui.strong("Wait time by unit (days)");
    if summaries.iter().all(|s| s.spread.is_none()) {
        no_data(ui);
        return;
    }

    let mut labels = Vec::with_capacity(summaries.len());
    let mut boxes = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let Some(spread) = summary.spread else {
            continue;
        };
        let color = colors
            .map(|cm| cm.color_for(&summary.key))
            .unwrap_or(BAR_COLOR);
        let label = summary.key.to_string();
        boxes.push(
            BoxElem::new(
                labels.len() as f64,
                BoxSpread::new(spread.min, spread.q1, spread.median, spread.q3, spread.max),
            )
            .name(format!("{label} (n = {}, mean {:.1})", summary.count, spread.mean))
            .fill(color.gamma_multiply(0.4))
            .stroke(Stroke::new(1.5, color)),
        );
        labels.push(label);
    }

    Plot::new("wait_by_unit")
        .height(PLOT_HEIGHT)
        .x_axis_formatter(move |mark: GridMark, _range: &RangeInclusive<f64>| {
            category_label(&labels, mark.value)
        })
        .y_axis_label("Days")
        .allow_scroll(false)
        .show(ui, |plot_ui| plot_ui.box_plot(BoxPlot::new(boxes)));
}
