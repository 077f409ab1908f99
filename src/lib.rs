//! ESF dashboard core: visit tables, the filter / aggregate pipeline, KPIs
//! and demo data. The egui front end lives in the `esf-dashboard` binary.

pub mod config;
pub mod data;
pub mod indicators;
pub mod synthetic;
