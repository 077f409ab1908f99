//! Visit KPIs for family health teams, computed on top of the filter /
//! aggregate pipeline.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::data::aggregate::{AggregationSpec, Metric, aggregate, aggregate_all, partition};
use crate::data::error::{DataError, Result};
use crate::data::filter::{Constraint, FilterCriteria, apply_filters};
use crate::data::model::{Dataset, FieldKind, Schema, Value};

/// Column names of the visit table (and of the population table).
pub mod columns {
    pub const VISIT_ID: &str = "atendimento_id";
    pub const DATE: &str = "data_atendimento";
    pub const PHYSICIAN_ID: &str = "medico_id";
    pub const PHYSICIAN: &str = "medico_nome";
    pub const TEAM: &str = "equipe";
    pub const UNIT: &str = "unidade";
    pub const PATIENT_ID: &str = "paciente_id";
    pub const SEX: &str = "sexo";
    pub const AGE_BAND: &str = "faixa_etaria";
    pub const CONDITION: &str = "condicao_cronica";
    pub const VISIT_TYPE: &str = "tipo_atendimento";
    pub const PROCEDURE_CODE: &str = "procedimento_sigtap";
    pub const PROCEDURE: &str = "procedimento_desc";
    pub const REFERRED: &str = "encaminhado";
    pub const OUTCOME: &str = "desfecho";
    pub const EXAMS: &str = "exames_solicitados";
    pub const WAIT_DAYS: &str = "tempo_espera_dias";

    /// Registered population per unit.
    pub const POPULATION: &str = "pop_adscrita";
}

use columns::*;

pub const CONSULTATION: &str = "Consulta";
pub const HOME_VISIT: &str = "Visita domiciliar";
/// Outcomes closed in primary care.
pub const RESOLVED_OUTCOMES: [&str; 2] = ["Resolvido na APS", "Acompanhamento APS"];

/// Minimum visit schema. Other columns are optional.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    DATE, PHYSICIAN, TEAM, UNIT, VISIT_TYPE, REFERRED, OUTCOME, EXAMS, WAIT_DAYS,
];

/// Fails with `SchemaMismatch` naming the first missing required column.
pub fn check_schema(schema: &Schema) -> Result<()> {
    for name in REQUIRED_COLUMNS {
        schema.field(name)?;
    }
    schema.field_of_kind(DATE, FieldKind::Temporal)?;
    Ok(())
}

fn only(field: &str, values: &[&str]) -> FilterCriteria {
    FilterCriteria::new().with(field, Constraint::one_of(values.iter().copied()))
}

fn not_referred_criteria() -> FilterCriteria {
    FilterCriteria::new().with(REFERRED, Constraint::one_of([false]))
}

fn resolved_criteria() -> FilterCriteria {
    not_referred_criteria().with(OUTCOME, Constraint::one_of(RESOLVED_OUTCOMES))
}

fn percent(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 * 100.0 / whole as f64)
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Headline KPIs of a (filtered) visit table.
///
/// Rates and means are `None` when there is nothing to compute them over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Indicators {
    pub total_visits: usize,
    pub consultations: usize,
    pub home_visits: usize,
    /// % of visits referred out of primary care.
    pub referral_rate: Option<f64>,
    /// % of visits closed in primary care without a referral.
    pub resolution_rate: Option<f64>,
    pub exams_per_consultation: Option<f64>,
    pub mean_wait_days: Option<f64>,
    /// Mean over units of consultations per 1000 registered inhabitants.
    pub consultations_per_1000: Option<f64>,
}

impl Indicators {
    pub fn compute(visits: &Dataset, population: Option<&Dataset>) -> Result<Self> {
        check_schema(visits.schema())?;

        let consultations = apply_filters(visits, &only(VISIT_TYPE, &[CONSULTATION]))?;
        let home_visits = apply_filters(visits, &only(VISIT_TYPE, &[HOME_VISIT]))?.len();
        let resolved = apply_filters(visits, &resolved_criteria())?.len();

        let consultations_per_1000 = match population {
            Some(pop) => consultations_per_thousand(&consultations, pop)?,
            None => None,
        };

        Ok(Indicators {
            total_visits: visits.len(),
            consultations: consultations.len(),
            home_visits,
            referral_rate: aggregate_all(visits, &Metric::rate(REFERRED, true))?,
            resolution_rate: percent(resolved, visits.len()),
            exams_per_consultation: aggregate_all(&consultations, &Metric::Mean(EXAMS.into()))?,
            mean_wait_days: aggregate_all(visits, &Metric::Mean(WAIT_DAYS.into()))?,
            consultations_per_1000,
        })
    }
}

/// Consultations per 1000 inhabitants for each unit with a known, non-zero
/// population, averaged over those units.
fn consultations_per_thousand(consultations: &Dataset, population: &Dataset) -> Result<Option<f64>> {
    let (unit_idx, _) = population.schema().field(UNIT)?;
    let pop_idx = population.schema().field_of_kind(POPULATION, FieldKind::Numeric)?;

    let by_unit: BTreeMap<&Value, f64> = population
        .records()
        .iter()
        .filter_map(|r| Some((r.get(unit_idx), r.get(pop_idx).as_f64()?)))
        .filter(|(_, pop)| *pop > 0.0)
        .collect();

    let counts = aggregate(consultations, &AggregationSpec::count(UNIT))?;
    let ratios: Vec<f64> = counts
        .rows
        .iter()
        .filter_map(|row| {
            let pop = by_unit.get(&row.key)?;
            Some(row.count as f64 / pop * 1000.0)
        })
        .collect();

    Ok((!ratios.is_empty()).then(|| ratios.iter().sum::<f64>() / ratios.len() as f64))
}

// ---------------------------------------------------------------------------
// Resolution funnel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FunnelStage {
    pub label: &'static str,
    pub count: usize,
}

/// Consultations → not referred → resolved / follow-up in primary care.
pub fn funnel(visits: &Dataset) -> Result<Vec<FunnelStage>> {
    check_schema(visits.schema())?;
    let consultations = apply_filters(visits, &only(VISIT_TYPE, &[CONSULTATION]))?;
    let not_referred = apply_filters(&consultations, &not_referred_criteria())?;
    let resolved = apply_filters(&not_referred, &resolved_criteria())?;

    Ok(vec![
        FunnelStage { label: "Consultations", count: consultations.len() },
        FunnelStage { label: "Not referred", count: not_referred.len() },
        FunnelStage { label: "Resolved / follow-up", count: resolved.len() },
    ])
}

// ---------------------------------------------------------------------------
// Per-physician summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicianSummary {
    pub physician: Value,
    pub indicators: Indicators,
}

/// Indicators per physician, most consultations first.
pub fn physician_summary(visits: &Dataset) -> Result<Vec<PhysicianSummary>> {
    check_schema(visits.schema())?;
    let mut out = partition(visits, PHYSICIAN)?
        .into_iter()
        .map(|(physician, part)| {
            Ok(PhysicianSummary {
                indicators: Indicators::compute(&part, None)?,
                physician,
            })
        })
        .collect::<std::result::Result<Vec<_>, DataError>>()?;

    out.sort_by(|a, b| {
        b.indicators
            .consultations
            .cmp(&a.indicators.consultations)
            .then_with(|| a.physician.cmp(&b.physician))
    });
    Ok(out)
}

/// Ordering used when the summary table is re-sorted by a float column.
pub fn cmp_optional(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Field, Record};
    use chrono::NaiveDate;

    fn visit_schema() -> Schema {
        Schema::new(vec![
            Field::new(DATE, FieldKind::Temporal),
            Field::new(PHYSICIAN, FieldKind::Categorical),
            Field::new(TEAM, FieldKind::Categorical),
            Field::new(UNIT, FieldKind::Categorical),
            Field::new(VISIT_TYPE, FieldKind::Categorical),
            Field::new(REFERRED, FieldKind::Categorical),
            Field::new(OUTCOME, FieldKind::Categorical),
            Field::new(EXAMS, FieldKind::Numeric),
            Field::new(WAIT_DAYS, FieldKind::Numeric),
        ])
    }

    /// (physician, unit, type, referred, outcome, exams, wait)
    fn visits(rows: &[(&str, &str, &str, bool, &str, i64, i64)]) -> Dataset {
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let records = rows
            .iter()
            .map(|(doc, unit, kind, referred, outcome, exams, wait)| {
                Record::new(vec![
                    Value::date(day),
                    Value::text(*doc),
                    Value::text("ESF 01"),
                    Value::text(*unit),
                    Value::text(*kind),
                    Value::Bool(*referred),
                    Value::text(*outcome),
                    Value::Integer(*exams),
                    Value::Integer(*wait),
                ])
            })
            .collect();
        Dataset::new(visit_schema(), records).unwrap()
    }

    fn sample() -> Dataset {
        visits(&[
            ("Dr(a). Ana", "UBS A", CONSULTATION, false, "Resolvido na APS", 2, 4),
            ("Dr(a). Ana", "UBS A", CONSULTATION, true, "Encaminhado", 0, 10),
            ("Dr(a). Ana", "UBS B", HOME_VISIT, false, "Acompanhamento APS", 0, 0),
            ("Dr(a). Bruno", "UBS B", CONSULTATION, false, "Resolvido na APS", 1, 6),
        ])
    }

    #[test]
    fn headline_indicators() {
        let ind = Indicators::compute(&sample(), None).unwrap();
        assert_eq!(ind.total_visits, 4);
        assert_eq!(ind.consultations, 3);
        assert_eq!(ind.home_visits, 1);
        assert_eq!(ind.referral_rate, Some(25.0));
        assert_eq!(ind.resolution_rate, Some(75.0));
        assert_eq!(ind.exams_per_consultation, Some(1.0));
        assert_eq!(ind.mean_wait_days, Some(5.0));
        assert_eq!(ind.consultations_per_1000, None);
    }

    #[test]
    fn empty_selection_reports_no_data_rather_than_zero() {
        let ind = Indicators::compute(&visits(&[]), None).unwrap();
        assert_eq!(ind.total_visits, 0);
        assert_eq!(ind.referral_rate, None);
        assert_eq!(ind.resolution_rate, None);
        assert_eq!(ind.mean_wait_days, None);
    }

    #[test]
    fn consultations_are_normalised_by_population() {
        let schema = Schema::new(vec![
            Field::new(UNIT, FieldKind::Categorical),
            Field::new(POPULATION, FieldKind::Numeric),
        ]);
        let pop = Dataset::new(
            schema,
            vec![
                Record::new(vec![Value::text("UBS A"), Value::Integer(1000)]),
                Record::new(vec![Value::text("UBS B"), Value::Integer(4000)]),
            ],
        )
        .unwrap();

        let ind = Indicators::compute(&sample(), Some(&pop)).unwrap();
        // UBS A: 2 / 1000 * 1000 = 2.0, UBS B: 1 / 4000 * 1000 = 0.25
        assert_eq!(ind.consultations_per_1000, Some(1.125));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let schema = Schema::new(vec![Field::new(UNIT, FieldKind::Categorical)]);
        let ds = Dataset::new(schema, vec![]).unwrap();
        assert_eq!(Indicators::compute(&ds, None).unwrap_err(), DataError::missing(DATE));
    }

    #[test]
    fn funnel_narrows_consultations() {
        let counts: Vec<_> = funnel(&sample()).unwrap().iter().map(|s| s.count).collect();
        assert_eq!(counts, vec![3, 2, 2]);
    }

    #[test]
    fn physicians_ranked_by_consultations() {
        let summary = physician_summary(&sample()).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].physician, Value::text("Dr(a). Ana"));
        assert_eq!(summary[0].indicators.consultations, 2);
        assert_eq!(summary[0].indicators.referral_rate.map(f64::round), Some(33.0));
        assert_eq!(summary[1].indicators.resolution_rate, Some(100.0));
    }

    #[test]
    fn optional_floats_sort_absent_first() {
        let mut v = vec![Some(2.0), None, Some(1.0)];
        v.sort_by(|a, b| cmp_optional(*a, *b));
        assert_eq!(v, vec![None, Some(1.0), Some(2.0)]);
    }
}
