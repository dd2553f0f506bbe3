use std::path::PathBuf;

use chrono::Local;
use clap::Parser;

use crate::{
    api::{prices::JsonPriceFile, sim::SimulatedDevice},
    cli::settings::SettingsArgs,
    core::manager::SystemManager,
    prelude::*,
    quantity::{energy::KilowattHours, percent::Percent},
    tables::{build_hourly_settings_table, build_periods_table, build_segments_table},
};

#[derive(Parser)]
pub struct ForageArgs {
    /// Do not write anything to the inverter (dry run).
    #[clap(long)]
    pub scout: bool,

    /// Plan the coming day instead of updating the current one.
    #[clap(long)]
    pub prepare_next_day: bool,

    /// JSON file with today's (and optionally tomorrow's) hourly spot prices.
    #[clap(long = "prices-file", env = "PRICES_FILE")]
    pub prices_file: PathBuf,

    /// Flat hourly consumption assumed by the simulated household.
    #[clap(long = "assumed-consumption", env = "ASSUMED_CONSUMPTION", default_value = "4.5")]
    pub assumed_consumption: KilowattHours,

    /// Battery state of charge the simulated household starts with.
    #[clap(long = "initial-soc", env = "INITIAL_SOC", default_value = "50")]
    pub initial_soc: Percent,

    #[clap(flatten)]
    pub settings: SettingsArgs,
}

impl ForageArgs {
    pub fn run(self) -> Result {
        let settings = self.settings.into_settings()?;
        let prices = JsonPriceFile::new(self.prices_file);
        // The hardware adapter is pluggable behind `DeviceController`; this binary
        // ships with the simulated household.
        let device = SimulatedDevice::new(
            vec![self.assumed_consumption; 24],
            vec![KilowattHours::ZERO; 24],
            self.initial_soc,
        );

        let mut manager = SystemManager::new(settings, &device, &prices);
        manager.start()?;
        ensure!(
            manager.tick(Local::now(), self.prepare_next_day, self.scout),
            "the schedule update did not go through",
        );

        if let Some(stored) = manager.latest_schedule() {
            println!("{}", build_periods_table(&stored.result.periods));
            info!(
                total_savings = ?stored.result.summary.base_to_battery_solar_savings,
                savings_pct = stored.result.summary.base_to_battery_solar_savings_pct,
                charged = ?stored.result.summary.total_charged,
                discharged = ?stored.result.summary.total_discharged,
                "planned",
            );
        }
        if let Some(plan) = manager.deployed_plan() {
            println!("{}", build_segments_table(&plan.intervals));
            println!("{}", build_hourly_settings_table(&plan.hourly));
        }
        Ok(())
    }
}
