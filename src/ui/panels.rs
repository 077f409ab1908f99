use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::DatePickerButton;

use esf_dashboard::data::Constraint;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – filter widgets
// ---------------------------------------------------------------------------

/// Render the left filter panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Filters");
    ui.separator();

    if state.source.is_none() {
        ui.label("No dataset loaded.");
        return;
    }

    // Clone what we need so we can mutate state inside the loop.
    let options = state.options.clone();

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            // ---- Period ----
            for (col, first, last) in &options.temporal {
                ui.strong(col);
                match state.criteria.get_mut(col) {
                    Some(Constraint::DateRange { start, end }) => {
                        let mut changed = false;
                        ui.horizontal(|ui: &mut Ui| {
                            changed |= ui
                                .add(DatePickerButton::new(start).id_salt(&format!("{col}_start")))
                                .changed();
                            ui.label("to");
                            changed |= ui
                                .add(DatePickerButton::new(end).id_salt(&format!("{col}_end")))
                                .changed();
                        });
                        if changed {
                            state.mark_dirty();
                        }
                    }
                    _ => {
                        if ui.small_button("Limit period").clicked() {
                            state.criteria.set(
                                col.as_str(),
                                Constraint::DateRange {
                                    start: *first,
                                    end: *last,
                                },
                            );
                            state.mark_dirty();
                        }
                    }
                }
                ui.separator();
            }

            // ---- Per-column multiselects (collapsible) ----
            for (col, all_values) in &options.categorical {
                let n_total = all_values.len();
                let n_selected = match state.criteria.get(col) {
                    Some(Constraint::OneOf(selected)) => selected.len(),
                    _ => n_total,
                };
                let header_text = format!("{col}  ({n_selected}/{n_total})");

                egui::CollapsingHeader::new(RichText::new(header_text).strong())
                    .id_salt(col)
                    .default_open(false)
                    .show(ui, |ui: &mut Ui| {
                        ui.horizontal(|ui: &mut Ui| {
                            if ui.small_button("All").clicked() {
                                state.select_all(col);
                            }
                            if ui.small_button("None").clicked() {
                                state.select_none(col);
                            }
                        });

                        for val in all_values {
                            let is_selected = match state.criteria.get(col) {
                                Some(Constraint::OneOf(selected)) => selected.contains(val),
                                _ => true,
                            };

                            let mut text = RichText::new(val.to_string());
                            if let Some(cm) = state.colors_for(col) {
                                text = text.color(cm.color_for(val));
                            }

                            let mut checked = is_selected;
                            if ui.checkbox(&mut checked, text).changed() {
                                state.toggle_filter_value(col, val);
                            }
                        }
                    });
            }

            if !options.skipped.is_empty() {
                ui.label(
                    RichText::new(format!("Not filterable: {}", options.skipped.join(", ")))
                        .small()
                        .weak(),
                );
            }

            // ---- Numeric ranges ----
            if !options.numeric.is_empty() {
                ui.separator();
                egui::CollapsingHeader::new(RichText::new("Numeric ranges").strong())
                    .id_salt("numeric_ranges")
                    .default_open(false)
                    .show(ui, |ui: &mut Ui| {
                        for (col, lo, hi) in &options.numeric {
                            numeric_range(ui, state, col, *lo, *hi);
                        }
                    });
            }
        });
}

fn numeric_range(ui: &mut Ui, state: &mut AppState, col: &str, lo: f64, hi: f64) {
    let mut enabled = matches!(state.criteria.get(col), Some(Constraint::NumberRange { .. }));
    if ui.checkbox(&mut enabled, col).changed() {
        state.set_numeric_filter(col, enabled.then_some((lo, hi)));
    }

    if let Some(Constraint::NumberRange { min, max }) = state.criteria.get_mut(col) {
        let mut changed = ui
            .add(egui::Slider::new(min, lo..=hi).text("min"))
            .changed();
        changed |= ui
            .add(egui::Slider::new(max, lo..=hi).text("max"))
            .changed();
        if changed {
            state.mark_dirty();
        }
    }
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open data…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
            if ui.button("Open population…").clicked() {
                open_population_dialog(state);
                ui.close_menu();
            }
            if ui.button("Demo data").clicked() {
                state.load_synthetic();
                ui.close_menu();
            }
            ui.separator();
            if ui
                .add_enabled(state.view.is_some(), egui::Button::new("Export filtered CSV…"))
                .clicked()
            {
                export_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if ui.button("Reset filters").clicked() {
            state.reset_filters();
        }

        ui.separator();

        if let (Some(source), Some(view)) = (&state.source, &state.view) {
            ui.label(format!(
                "{}: {} records, {} selected",
                source.label,
                source.dataset.len(),
                view.filtered.len()
            ));
        }
        if state.population.is_some() {
            ui.label(RichText::new("population loaded").weak());
        }

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

fn table_dialog(title: &str) -> rfd::FileDialog {
    rfd::FileDialog::new()
        .set_title(title)
        .add_filter("Supported files", &["parquet", "pq", "json", "csv"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
}

pub fn open_file_dialog(state: &mut AppState) {
    if let Some(path) = table_dialog("Open visit data").pick_file() {
        state.load_visits(&path);
    }
}

pub fn open_population_dialog(state: &mut AppState) {
    if let Some(path) = table_dialog("Open population per unit").pick_file() {
        state.load_population(&path);
    }
}

pub fn export_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Export filtered data")
        .set_file_name(state.config.display.export_file_name.as_str())
        .add_filter("CSV", &["csv"])
        .add_filter("Parquet", &["parquet"])
        .save_file();

    if let Some(path) = file {
        match state.export_to(&path) {
            Ok(n) => {
                log::info!("Exported {n} records to {}", path.display());
                state.status_message = None;
            }
            Err(e) => {
                log::error!("Failed to export: {e:#}");
                state.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }
}
