mod app;
mod color;
mod state;
mod ui;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use eframe::egui;

use app::DashboardApp;
use esf_dashboard::config::DashboardConfig;
use state::AppState;

/// Interactive dashboard of primary-care (ESF) visits.
#[derive(Parser, Debug)]
#[command(name = "esf-dashboard", version, about)]
struct Cli {
    /// Visit table to open (.csv, .json, .parquet); demo data when omitted
    file: Option<PathBuf>,

    /// Registered population per unit, for consultations per 1000
    #[arg(long)]
    population: Option<PathBuf>,

    /// Configuration file (defaults to ./esf-dashboard.toml when present)
    #[arg(short, long, env = "ESF_DASHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Seed for the generated demo data
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = DashboardConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.file {
        config.data.path = Some(path);
    }
    if let Some(path) = cli.population {
        config.data.population_path = Some(path);
    }
    if let Some(seed) = cli.seed {
        config.synthetic.seed = seed;
    }
    log::debug!("Configuration: {config:?}");

    let mut state = AppState::new(config);
    state.load_startup();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_min_inner_size([800.0, 500.0]),
        ..Default::default()
    };

    eframe::run_native(
        "ESF – Production, Resolution and KPIs",
        options,
        Box::new(move |_cc| Ok(Box::new(DashboardApp::new(state)))),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))
}
