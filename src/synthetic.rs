use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::data::error::Result;
use crate::data::model::{Dataset, Field, FieldKind, Record, Schema, Value};
use crate::indicators::columns::*;
use crate::indicators::{CONSULTATION, HOME_VISIT};

/// Shape of the generated demo data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Months of history ending at the current month.
    pub months: u32,
    /// Number of visits.
    pub rows: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            months: 12,
            rows: 6000,
            seed: 2025,
        }
    }
}

// ---------------------------------------------------------------------------
// PRNG
// ---------------------------------------------------------------------------

/// Minimal deterministic PRNG (xoshiro256**)
pub struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform integer in `[lo, hi)`.
    pub fn range(&mut self, lo: i64, hi: i64) -> i64 {
        let span = (hi - lo).max(1) as u64;
        lo + (self.next_u64() % span) as i64
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.range(0, items.len() as i64) as usize]
    }

    /// Pick from `(item, probability)` pairs. Probabilities should sum to 1.
    pub fn weighted<'a, T>(&mut self, items: &'a [(T, f64)]) -> &'a T {
        let mut u = self.next_f64();
        for (item, p) in items {
            if u < *p {
                return item;
            }
            u -= p;
        }
        &items[items.len() - 1].0
    }

    /// Box-Muller transform for normal distribution
    pub fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    /// Knuth's multiplication method; fine for the small rates used here.
    pub fn poisson(&mut self, lambda: f64) -> u64 {
        let limit = (-lambda).exp();
        let mut k = 0;
        let mut p = self.next_f64();
        while p > limit {
            k += 1;
            p *= self.next_f64();
        }
        k
    }
}

// ---------------------------------------------------------------------------
// Visit generator
// ---------------------------------------------------------------------------

const UNITS: [&str; 5] = ["UBS A", "UBS B", "UBS C", "UBS D", "UBS E"];
const PHYSICIANS: [&str; 15] = [
    "Ana", "Bruno", "Carla", "Diego", "Elaine", "Fabio", "Gabriela", "Henrique", "Iara", "João",
    "Karen", "Luis", "Mariana", "Nicolas", "Olivia",
];
const SEXES: [(&str, f64); 2] = [("F", 0.55), ("M", 0.45)];
const AGE_BANDS: [(&str, f64); 5] = [
    ("0-5", 0.08),
    ("6-17", 0.16),
    ("18-39", 0.38),
    ("40-59", 0.24),
    ("60+", 0.14),
];
const CONDITIONS: [(&str, f64); 5] = [
    ("Nenhuma", 0.52),
    ("HAS", 0.22),
    ("DM", 0.16),
    ("DPOC/Asma", 0.07),
    ("Gestante", 0.03),
];
const VISIT_TYPES: [(&str, f64); 4] = [
    (CONSULTATION, 0.70),
    (HOME_VISIT, 0.12),
    ("Procedimento", 0.10),
    ("Urgência", 0.08),
];
const PROCEDURES: [(&str, &str); 5] = [
    ("0301010030", "Consulta clínica em APS"),
    ("0301010049", "Retorno em APS"),
    ("0202010034", "Coleta exame laboratório"),
    ("0205010038", "Curativo simples"),
    ("0202030068", "Eletrocardiograma"),
];
const REFERRAL_PROBABILITY: f64 = 0.18;

struct Physician {
    id: i64,
    name: String,
    team: String,
    unit: &'static str,
}

pub fn visit_schema() -> Schema {
    Schema::new(vec![
        Field::new(VISIT_ID, FieldKind::Numeric),
        Field::new(DATE, FieldKind::Temporal),
        Field::new(PHYSICIAN_ID, FieldKind::Numeric),
        Field::new(PHYSICIAN, FieldKind::Categorical),
        Field::new(TEAM, FieldKind::Categorical),
        Field::new(UNIT, FieldKind::Categorical),
        Field::new(PATIENT_ID, FieldKind::Numeric),
        Field::new(SEX, FieldKind::Categorical),
        Field::new(AGE_BAND, FieldKind::Categorical),
        Field::new(CONDITION, FieldKind::Categorical),
        Field::new(VISIT_TYPE, FieldKind::Categorical),
        Field::new(PROCEDURE_CODE, FieldKind::Categorical),
        Field::new(PROCEDURE, FieldKind::Categorical),
        Field::new(REFERRED, FieldKind::Categorical),
        Field::new(OUTCOME, FieldKind::Categorical),
        Field::new(EXAMS, FieldKind::Numeric),
        Field::new(WAIT_DAYS, FieldKind::Numeric),
    ])
}

/// Every day from the first day of the month `months - 1` months before
/// `today` up to `today`.
fn calendar(months: u32, today: NaiveDate) -> Vec<NaiveDate> {
    let back = today
        .checked_sub_months(Months::new(months.saturating_sub(1)))
        .unwrap_or(today);
    let first = back.with_day(1).unwrap_or(back);
    first.iter_days().take_while(|d| *d <= today).collect()
}

/// Generate a visit table plus the registered population per unit.
pub fn generate_visits(config: &SyntheticConfig, today: NaiveDate) -> Result<(Dataset, Dataset)> {
    let mut rng = SimpleRng::new(config.seed);

    let teams: Vec<String> = (1..=10).map(|i| format!("ESF {i:02}")).collect();
    let physicians: Vec<Physician> = PHYSICIANS
        .iter()
        .zip(1..)
        .map(|(name, id)| Physician {
            id,
            name: format!("Dr(a). {name}"),
            team: rng.choose(&teams).clone(),
            unit: *rng.choose(&UNITS),
        })
        .collect();

    let population = Dataset::new(
        Schema::new(vec![
            Field::new(UNIT, FieldKind::Categorical),
            Field::new(POPULATION, FieldKind::Numeric),
        ]),
        UNITS
            .iter()
            .map(|u| Record::new(vec![Value::text(*u), Value::Integer(rng.range(8000, 18000))]))
            .collect(),
    )?;

    let days = calendar(config.months.max(1), today);
    let mut records = Vec::with_capacity(config.rows);

    for visit_id in 1..=config.rows as i64 {
        let day = *rng.choose(&days);
        let doc = rng.choose(&physicians);
        let sex = *rng.weighted(&SEXES);
        let age = *rng.weighted(&AGE_BANDS);
        let condition = *rng.weighted(&CONDITIONS);
        let kind = *rng.weighted(&VISIT_TYPES);
        let (code, description) = if kind == CONSULTATION || kind == "Urgência" {
            PROCEDURES[0]
        } else {
            *rng.choose(&PROCEDURES[1..])
        };

        let referred = rng.next_f64() < REFERRAL_PROBABILITY;
        let outcome = if !referred && rng.next_f64() < 0.75 {
            "Resolvido na APS"
        } else if !referred {
            "Acompanhamento APS"
        } else {
            "Encaminhado"
        };

        let exams = rng.poisson(if kind == CONSULTATION { 0.9 } else { 0.3 });
        let wait = (rng.gauss(6.0, 3.0) as i64).max(0);

        records.push(Record::new(vec![
            Value::Integer(visit_id),
            Value::date(day),
            Value::Integer(doc.id),
            Value::text(doc.name.as_str()),
            Value::text(doc.team.as_str()),
            Value::text(doc.unit),
            Value::Integer(rng.range(100_000, 999_999)),
            Value::text(sex),
            Value::text(age),
            Value::text(condition),
            Value::text(kind),
            Value::text(code),
            Value::text(description),
            Value::Bool(referred),
            Value::text(outcome),
            Value::Integer(exams as i64),
            Value::Integer(wait),
        ]));
    }

    let visits = Dataset::new(visit_schema(), records)?;
    log::info!(
        "Generated {} synthetic visits over {} days (seed {})",
        visits.len(),
        days.len(),
        config.seed
    );
    Ok((visits, population))
}
