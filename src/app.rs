use eframe::egui::{self, Color32, ScrollArea, Ui};

use esf_dashboard::indicators::columns::{OUTCOME, UNIT, VISIT_TYPE};

use crate::state::AppState;
use crate::ui::{kpi, panels, plot};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct DashboardApp {
    pub state: AppState,
}

impl DashboardApp {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ---- Top panel: menu bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Left side panel: filters ----
        egui::SidePanel::left("filter_panel")
            .default_width(260.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        self.state.refresh();

        // ---- Central panel: KPIs and charts ----
        egui::CentralPanel::default().show(ctx, |ui| {
            ScrollArea::vertical()
                .auto_shrink([false, false])
                .show(ui, |ui| dashboard(ui, &mut self.state));
        });
    }
}

fn dashboard(ui: &mut Ui, state: &mut AppState) {
    let Some(view) = &state.view else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open a file to view visits  (File → Open data…)");
        });
        return;
    };

    ui.heading("ESF: production, resolution and KPIs");
    ui.separator();

    if view.filtered.is_empty() {
        ui.label("No data for this selection. Widen the filters or press Reset filters.");
        return;
    }

    let panels = match &view.panels {
        Ok(panels) => panels,
        Err(e) => {
            ui.colored_label(Color32::RED, format!("This table cannot feed the visit panels: {e}"));
            ui.label(format!(
                "{} records selected; File → Export filtered CSV… still works.",
                view.filtered.len()
            ));
            return;
        }
    };

    kpi::kpi_row(ui, &panels.indicators);
    ui.add_space(8.0);

    ui.columns(2, |cols| {
        plot::production_lines(&mut cols[0], &panels.monthly, state.colors.get(VISIT_TYPE));
        plot::result_bars(
            &mut cols[1],
            "outcomes",
            "Outcomes",
            &panels.outcomes,
            state.colors.get(OUTCOME),
        );
    });
    ui.add_space(8.0);

    ui.columns(2, |cols| {
        plot::ranking_bars(
            &mut cols[0],
            "physician_ranking",
            &format!("Top {} physicians by consultations", state.config.display.top_n),
            &panels.ranking,
        );
        plot::funnel_chart(&mut cols[1], &panels.funnel);
        cols[1].add_space(8.0);
        plot::wait_boxplot(&mut cols[1], &panels.wait_by_unit, state.colors.get(UNIT));
    });
    ui.add_space(8.0);

    kpi::physician_table(ui, &panels.physicians, &mut state.summary_sort);
}
