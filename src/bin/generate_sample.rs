use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use clap::{Parser, ValueEnum};

use esf_dashboard::data::{Dataset, export};
use esf_dashboard::synthetic::{SyntheticConfig, generate_visits};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Parquet,
    Csv,
}

impl Format {
    fn extension(self) -> &'static str {
        match self {
            Format::Parquet => "parquet",
            Format::Csv => "csv",
        }
    }

    fn save(self, dataset: &Dataset, path: &Path) -> Result<()> {
        match self {
            Format::Parquet => export::save_parquet(dataset, path),
            Format::Csv => export::save_csv(dataset, path),
        }
    }
}

/// Write a synthetic ESF visit table plus the matching population file.
#[derive(Parser, Debug)]
#[command(name = "generate_sample", version, about)]
struct Cli {
    /// Visit table to write; the population goes next to it as
    /// `<stem>_populacao.<ext>`
    #[arg(short, long, default_value = "esf_atendimentos")]
    out: PathBuf,

    #[arg(short, long, default_value_t = SyntheticConfig::default().rows)]
    rows: usize,

    /// Months of history ending today
    #[arg(short, long, default_value_t = SyntheticConfig::default().months)]
    months: u32,

    #[arg(short, long, default_value_t = SyntheticConfig::default().seed)]
    seed: u64,

    #[arg(short, long, value_enum, default_value_t = Format::Parquet)]
    format: Format,

    /// Print the first N visits
    #[arg(long, default_value_t = 0)]
    preview: usize,
}

fn population_path(visits: &Path, format: Format) -> PathBuf {
    let stem = visits
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "esf".to_string());
    visits.with_file_name(format!("{stem}_populacao.{}", format.extension()))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    anyhow::ensure!(cli.months > 0, "--months must be > 0");

    let config = SyntheticConfig {
        months: cli.months,
        rows: cli.rows,
        seed: cli.seed,
    };
    let today = chrono::Local::now().date_naive();
    let (visits, population) = generate_visits(&config, today)?;

    let out = cli.out.with_extension(cli.format.extension());
    let pop_out = population_path(&out, cli.format);
    cli.format.save(&visits, &out)?;
    cli.format.save(&population, &pop_out)?;

    if cli.preview > 0 {
        let head = Dataset::with_shared_schema(
            visits.shared_schema(),
            visits.records().iter().take(cli.preview).cloned().collect(),
        )?;
        let batch = export::to_record_batch(&head)?;
        let table = pretty_format_batches(&[batch]).context("formatting preview")?;
        println!("{table}");
    }

    println!(
        "Wrote {} visits to {} and {} units to {}",
        visits.len(),
        out.display(),
        population.len(),
        pop_out.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_file_sits_next_to_visits() {
        let path = population_path(Path::new("out/visits.parquet"), Format::Parquet);
        assert_eq!(path, PathBuf::from("out/visits_populacao.parquet"));
    }
}
