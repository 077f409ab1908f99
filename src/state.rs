use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;

use esf_dashboard::config::DashboardConfig;
use esf_dashboard::data::aggregate::{GroupSummary, Series, aggregate_by, describe};
use esf_dashboard::data::cache::PipelineCache;
use esf_dashboard::data::filter::default_criteria;
use esf_dashboard::data::{
    AggregateResult, AggregationSpec, Constraint, DataError, Dataset, FieldKind, FilterCriteria,
    TimeBucket, Value, aggregate, apply_filters, export, loader,
};
use esf_dashboard::indicators::columns::{DATE, OUTCOME, PHYSICIAN, UNIT, VISIT_TYPE, WAIT_DAYS};
use esf_dashboard::indicators::{
    CONSULTATION, FunnelStage, Indicators, PhysicianSummary, cmp_optional, funnel,
    physician_summary,
};
use esf_dashboard::synthetic::generate_visits;

use crate::color::ColorMap;

// ---------------------------------------------------------------------------
// Loaded data and filter options
// ---------------------------------------------------------------------------

/// A loaded visit table. `id` changes on every load so cached results of an
/// earlier file are never reused.
pub struct Source {
    pub id: u64,
    pub label: String,
    pub dataset: Dataset,
}

/// Widgets the side panel offers, derived once per loaded dataset.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Categorical columns with their distinct values.
    pub categorical: Vec<(String, BTreeSet<Value>)>,
    /// Categorical columns left without a multiselect (too many values).
    pub skipped: Vec<String>,
    /// Temporal columns with their first and last day.
    pub temporal: Vec<(String, NaiveDate, NaiveDate)>,
    /// Numeric columns with their observed range.
    pub numeric: Vec<(String, f64, f64)>,
}

impl FilterOptions {
    fn from_dataset(dataset: &Dataset, max_values: usize) -> Self {
        let schema = dataset.schema();
        let mut options = FilterOptions::default();

        for field in schema.fields_of_kind(FieldKind::Categorical) {
            let Ok(values) = dataset.distinct_values(&field.name) else {
                continue;
            };
            if values.len() > max_values {
                options.skipped.push(field.name.clone());
            } else {
                options.categorical.push((field.name.clone(), values));
            }
        }
        for field in schema.fields_of_kind(FieldKind::Temporal) {
            if let Ok(Some((first, last))) = dataset.temporal_extent(&field.name) {
                options.temporal.push((field.name.clone(), first, last));
            }
        }
        for field in schema.fields_of_kind(FieldKind::Numeric) {
            if let Ok(Some((lo, hi))) = dataset.numeric_extent(&field.name) {
                options.numeric.push((field.name.clone(), lo, hi));
            }
        }
        options
    }
}

// ---------------------------------------------------------------------------
// Derived view
// ---------------------------------------------------------------------------

/// Everything the visit panels draw, computed from one filtered table.
pub struct VisitPanels {
    pub indicators: Indicators,
    /// Visits per month, one line per visit type.
    pub monthly: Vec<Series>,
    pub outcomes: Arc<AggregateResult>,
    /// Physicians with the most consultations.
    pub ranking: AggregateResult,
    pub funnel: Vec<FunnelStage>,
    pub wait_by_unit: Vec<GroupSummary>,
    pub physicians: Vec<PhysicianSummary>,
}

/// The current selection. `panels` is an error when the loaded table lacks
/// the visit columns; the selection can still be exported.
pub struct DashboardView {
    pub filtered: Arc<Dataset>,
    pub panels: Result<VisitPanels, DataError>,
}

/// Column the physician table is sorted by (descending).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummarySort {
    Visits,
    #[default]
    Consultations,
    ReferralRate,
    ExamsPerConsultation,
    MeanWait,
    ResolutionRate,
}

impl SummarySort {
    pub const ALL: [SummarySort; 6] = [
        SummarySort::Visits,
        SummarySort::Consultations,
        SummarySort::ReferralRate,
        SummarySort::ExamsPerConsultation,
        SummarySort::MeanWait,
        SummarySort::ResolutionRate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SummarySort::Visits => "Visits",
            SummarySort::Consultations => "Consultations",
            SummarySort::ReferralRate => "% referred",
            SummarySort::ExamsPerConsultation => "Exams / consult.",
            SummarySort::MeanWait => "Mean wait (days)",
            SummarySort::ResolutionRate => "% resolved",
        }
    }

    fn compare(self, a: &Indicators, b: &Indicators) -> Ordering {
        match self {
            SummarySort::Visits => a.total_visits.cmp(&b.total_visits),
            SummarySort::Consultations => a.consultations.cmp(&b.consultations),
            SummarySort::ReferralRate => cmp_optional(a.referral_rate, b.referral_rate),
            SummarySort::ExamsPerConsultation => {
                cmp_optional(a.exams_per_consultation, b.exams_per_consultation)
            }
            SummarySort::MeanWait => cmp_optional(a.mean_wait_days, b.mean_wait_days),
            SummarySort::ResolutionRate => cmp_optional(a.resolution_rate, b.resolution_rate),
        }
    }

    /// Sort rows descending on this column, ties by physician name.
    pub fn sort(self, rows: &mut [PhysicianSummary]) {
        rows.sort_by(|a, b| {
            self.compare(&b.indicators, &a.indicators)
                .then_with(|| a.physician.cmp(&b.physician))
        });
    }
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    pub config: DashboardConfig,

    /// Loaded visit table (None until something is loaded).
    pub source: Option<Source>,

    /// Registered population per unit, for consultations per 1000.
    pub population: Option<Dataset>,

    /// Current filter selection.
    pub criteria: FilterCriteria,

    pub options: FilterOptions,

    /// Stable colours for visit types, outcomes and units.
    pub colors: BTreeMap<String, ColorMap>,

    /// Filtered table and panels for `criteria` (cached).
    pub view: Option<DashboardView>,

    pub summary_sort: SummarySort,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,

    cache: PipelineCache,
    next_source_id: u64,
    dirty: bool,
}

impl AppState {
    pub fn new(config: DashboardConfig) -> Self {
        let cache = PipelineCache::new(config.cache.capacity);
        Self {
            config,
            source: None,
            population: None,
            criteria: FilterCriteria::new(),
            options: FilterOptions::default(),
            colors: BTreeMap::new(),
            view: None,
            summary_sort: SummarySort::default(),
            status_message: None,
            cache,
            next_source_id: 0,
            dirty: false,
        }
    }

    /// Open the configured files, falling back to demo data when no visit
    /// file is configured or it fails to load.
    pub fn load_startup(&mut self) {
        if let Some(path) = self.config.data.population_path.clone() {
            self.load_population(&path);
        }
        match self.config.data.path.clone() {
            Some(path) => {
                self.load_visits(&path);
                if self.source.is_none() {
                    self.load_synthetic();
                }
            }
            None => self.load_synthetic(),
        }
    }

    pub fn load_visits(&mut self, path: &Path) {
        match loader::load_file(path) {
            Ok(dataset) => {
                let label = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                self.set_dataset(dataset, label);
            }
            Err(e) => {
                log::error!("Failed to load file: {e:#}");
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    pub fn load_population(&mut self, path: &Path) {
        match loader::load_file(path) {
            Ok(dataset) => {
                self.population = Some(dataset);
                self.dirty = true;
            }
            Err(e) => {
                log::error!("Failed to load population: {e:#}");
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    /// Replace both tables with generated demo data.
    pub fn load_synthetic(&mut self) {
        let today = chrono::Local::now().date_naive();
        match generate_visits(&self.config.synthetic, today) {
            Ok((visits, population)) => {
                self.population = Some(population);
                self.set_dataset(visits, "demo data".to_string());
            }
            Err(e) => {
                log::error!("Failed to generate demo data: {e}");
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    /// Ingest a newly loaded dataset, initialise filters and colours.
    pub fn set_dataset(&mut self, dataset: Dataset, label: String) {
        self.options = FilterOptions::from_dataset(&dataset, self.config.display.max_filter_values);
        if !self.options.skipped.is_empty() {
            log::info!(
                "No multiselect for high-cardinality columns {:?}",
                self.options.skipped
            );
        }
        self.criteria = self.initial_criteria(&dataset);
        self.rebuild_colors(&dataset);

        self.next_source_id += 1;
        self.source = Some(Source {
            id: self.next_source_id,
            label,
            dataset,
        });
        self.status_message = None;
        self.dirty = true;
        self.refresh();
    }

    /// Everything selected, minus the constraints on columns the side panel
    /// does not offer.
    fn initial_criteria(&self, dataset: &Dataset) -> FilterCriteria {
        let mut criteria = default_criteria(dataset);
        for column in &self.options.skipped {
            criteria.remove(column);
        }
        criteria
    }

    fn rebuild_colors(&mut self, dataset: &Dataset) {
        self.colors = [VISIT_TYPE, OUTCOME, UNIT]
            .into_iter()
            .filter_map(|col| {
                let values = dataset.distinct_values(col).ok()?;
                Some((col.to_string(), ColorMap::new(&values)))
            })
            .collect();
    }

    pub fn colors_for(&self, column: &str) -> Option<&ColorMap> {
        self.colors.get(column)
    }

    pub fn reset_filters(&mut self) {
        if let Some(source) = &self.source {
            self.criteria = self.initial_criteria(&source.dataset);
            self.dirty = true;
        }
    }

    /// Mark the selection changed; the view is rebuilt on the next refresh.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Toggle a single value in a column's selection.
    pub fn toggle_filter_value(&mut self, column: &str, value: &Value) {
        if let Some(Constraint::OneOf(selected)) = self.criteria.get_mut(column) {
            if !selected.remove(value) {
                selected.insert(value.clone());
            }
        } else {
            self.criteria.set(column, Constraint::one_of([value.clone()]));
        }
        self.dirty = true;
    }

    /// Select all values in a column.
    pub fn select_all(&mut self, column: &str) {
        let all = self
            .options
            .categorical
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, values)| values.clone());
        if let Some(values) = all {
            self.criteria.set(column, Constraint::OneOf(values));
            self.dirty = true;
        }
    }

    /// Deselect all values in a column.
    pub fn select_none(&mut self, column: &str) {
        self.criteria.set(column, Constraint::OneOf(BTreeSet::new()));
        self.dirty = true;
    }

    /// Enable or clear the range constraint on a numeric column.
    pub fn set_numeric_filter(&mut self, column: &str, range: Option<(f64, f64)>) {
        match range {
            Some((min, max)) => self.criteria.set(column, Constraint::NumberRange { min, max }),
            None => {
                self.criteria.remove(column);
            }
        }
        self.dirty = true;
    }

    /// Rebuild the view if the selection changed since the last frame.
    pub fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        let Some(source) = &self.source else {
            self.view = None;
            return;
        };

        let filtered = match self.cache.filter(source.id, &source.dataset, &self.criteria) {
            Ok(filtered) => filtered,
            Err(e) => {
                log::error!("Filtering failed: {e}");
                self.status_message = Some(format!("Error: {e}"));
                self.view = None;
                return;
            }
        };
        log::debug!(
            "{} of {} records selected ({:?})",
            filtered.data.len(),
            source.dataset.len(),
            self.cache.stats()
        );

        let panels = self
            .cache
            .aggregate(&filtered, &AggregationSpec::count(OUTCOME))
            .and_then(|outcomes| {
                build_panels(
                    &filtered.data,
                    self.population.as_ref(),
                    outcomes,
                    self.config.display.top_n,
                )
            });
        if let Err(e) = &panels {
            log::warn!("Visit panels unavailable: {e}");
        }

        self.view = Some(DashboardView {
            filtered: filtered.data,
            panels,
        });
    }

    /// Write the current selection; Parquet when the path says so, CSV
    /// otherwise.
    pub fn export_to(&self, path: &Path) -> Result<usize> {
        let Some(view) = &self.view else {
            anyhow::bail!("Nothing to export");
        };
        let is_parquet = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "parquet" | "pq"));
        if is_parquet {
            export::save_parquet(&view.filtered, path)?;
        } else {
            export::save_csv(&view.filtered, path)?;
        }
        Ok(view.filtered.len())
    }
}

fn build_panels(
    visits: &Dataset,
    population: Option<&Dataset>,
    outcomes: Arc<AggregateResult>,
    top_n: usize,
) -> Result<VisitPanels, DataError> {
    let indicators = Indicators::compute(visits, population)?;
    let monthly = aggregate_by(
        visits,
        VISIT_TYPE,
        &AggregationSpec::count(DATE).bucketed(TimeBucket::Month),
    )?;

    let consultations = apply_filters(
        visits,
        &FilterCriteria::new().with(VISIT_TYPE, Constraint::one_of([CONSULTATION])),
    )?;
    let ranking = aggregate(&consultations, &AggregationSpec::count(PHYSICIAN))?.top(top_n);

    Ok(VisitPanels {
        indicators,
        monthly,
        outcomes,
        ranking,
        funnel: funnel(visits)?,
        wait_by_unit: describe(visits, UNIT, WAIT_DAYS)?,
        physicians: physician_summary(visits)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use esf_dashboard::synthetic::SyntheticConfig;

    fn demo_state() -> AppState {
        let mut config = DashboardConfig::default();
        config.synthetic = SyntheticConfig {
            months: 2,
            rows: 400,
            seed: 11,
        };
        let mut state = AppState::new(config);
        state.load_synthetic();
        state
    }

    #[test]
    fn loading_builds_a_full_view() {
        let state = demo_state();
        let view = state.view.as_ref().unwrap();
        assert_eq!(view.filtered.len(), 400);
        let panels = view.panels.as_ref().unwrap();
        assert_eq!(panels.indicators.total_visits, 400);
        assert!(panels.ranking.len() <= state.config.display.top_n);
        assert!(panels.indicators.consultations_per_1000.is_some());
        assert!(state.colors_for(VISIT_TYPE).is_some());
    }

    #[test]
    fn deselecting_everything_empties_the_view() {
        let mut state = demo_state();
        state.select_none(UNIT);
        state.refresh();
        let view = state.view.as_ref().unwrap();
        assert!(view.filtered.is_empty());
        let panels = view.panels.as_ref().unwrap();
        assert_eq!(panels.indicators.total_visits, 0);
        assert_eq!(panels.indicators.referral_rate, None);

        state.reset_filters();
        state.refresh();
        assert_eq!(state.view.as_ref().unwrap().filtered.len(), 400);
    }

    #[test]
    fn toggle_removes_then_restores_a_value() {
        let mut state = demo_state();
        let consulta = Value::text(CONSULTATION);
        state.toggle_filter_value(VISIT_TYPE, &consulta);
        state.refresh();
        let without = state.view.as_ref().unwrap().filtered.len();
        assert!(without < 400);

        state.toggle_filter_value(VISIT_TYPE, &consulta);
        state.refresh();
        assert_eq!(state.view.as_ref().unwrap().filtered.len(), 400);
    }

    #[test]
    fn tables_without_visit_columns_still_filter() {
        let mut state = AppState::new(DashboardConfig::default());
        let schema = esf_dashboard::data::Schema::new(vec![esf_dashboard::data::Field::new(
            "cidade",
            FieldKind::Categorical,
        )]);
        let records = ["Recife", "Olinda"]
            .iter()
            .map(|c| esf_dashboard::data::Record::new(vec![Value::text(*c)]))
            .collect();
        state.set_dataset(Dataset::new(schema, records).unwrap(), "cities".into());

        let view = state.view.as_ref().unwrap();
        assert_eq!(view.filtered.len(), 2);
        assert!(matches!(view.panels, Err(DataError::SchemaMismatch { .. })));
    }

    #[test]
    fn summary_sort_orders_descending() {
        let state = demo_state();
        let mut rows = state.view.as_ref().unwrap().panels.as_ref().unwrap().physicians.clone();
        SummarySort::MeanWait.sort(&mut rows);
        for pair in rows.windows(2) {
            assert_ne!(
                cmp_optional(pair[0].indicators.mean_wait_days, pair[1].indicators.mean_wait_days),
                Ordering::Less
            );
        }
    }

    #[test]
    fn export_writes_the_selection() {
        let mut state = demo_state();
        state.select_none(VISIT_TYPE);
        state.toggle_filter_value(VISIT_TYPE, &Value::text(CONSULTATION));
        state.refresh();
        let expected = state.view.as_ref().unwrap().filtered.len();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selection.csv");
        assert_eq!(state.export_to(&path).unwrap(), expected);
        let reloaded = loader::load_file(&path).unwrap();
        assert_eq!(reloaded.len(), expected);
    }
}
