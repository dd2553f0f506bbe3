use std::path::PathBuf;

use chrono::Local;
use clap::{Parser, Subcommand};

use crate::{
    api::{prices::JsonPriceFile, sim::SimulatedDevice},
    cli::settings::SettingsArgs,
    core::manager::SystemManager,
    prelude::*,
    quantity::{energy::KilowattHours, percent::Percent},
    tables::{build_balance_table, build_periods_table, build_savings_table, build_segments_table},
};

#[derive(Parser)]
pub struct PeekArgs {
    #[command(subcommand)]
    pub command: PeekCommand,

    /// JSON file with today's hourly spot prices.
    #[clap(long = "prices-file", env = "PRICES_FILE")]
    pub prices_file: PathBuf,

    /// Print machine-readable JSON instead of tables.
    #[clap(long)]
    pub json: bool,

    #[clap(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Subcommand)]
pub enum PeekCommand {
    /// The full day: recorded actuals plus the latest prediction.
    View,

    /// TOU segments as the inverter currently runs them.
    Schedule,

    /// Effective settings.
    Settings,

    /// Day-so-far energy balance.
    Balance,
}

impl PeekArgs {
    pub fn run(self) -> Result {
        let settings = self.settings.into_settings()?;
        let prices = JsonPriceFile::new(self.prices_file);
        let device = SimulatedDevice::new(
            vec![KilowattHours::from(4.5); 24],
            vec![KilowattHours::ZERO; 24],
            Percent(50.0),
        );
        let mut manager = SystemManager::new(settings, &device, &prices);
        manager.start()?;

        match self.command {
            PeekCommand::View => {
                let view = manager.daily_view(Local::now())?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&view)?);
                } else {
                    println!("{}", build_periods_table(&view.periods));
                    println!("{}", build_savings_table(&view));
                }
            }
            PeekCommand::Schedule => {
                let segments = manager
                    .deployed_plan()
                    .map(|plan| plan.intervals.clone())
                    .unwrap_or_default();
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&segments)?);
                } else {
                    println!("{}", build_segments_table(&segments));
                }
            }
            PeekCommand::Settings => {
                println!("{}", serde_json::to_string_pretty(manager.settings())?);
            }
            PeekCommand::Balance => {
                let summary = manager.history().balance_summary();
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    println!("{}", build_balance_table(&summary));
                }
            }
        }
        Ok(())
    }
}
