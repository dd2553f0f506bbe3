use clap::Parser;

use crate::{
    api::{device::DeviceController, sim::SimulatedDevice},
    cli::settings::{BatteryArgs, HomeArgs},
    core::limiter::PowerLimiter,
    prelude::*,
    quantity::{energy::KilowattHours, percent::Percent},
};

#[derive(Parser)]
pub struct GuardArgs {
    /// Rate adjustment per pass, in percentage points.
    #[clap(long = "step-size", env = "GUARD_STEP_SIZE", default_value = "5")]
    pub step_size: f64,

    #[clap(flatten)]
    pub battery: BatteryArgs,

    #[clap(flatten)]
    pub home: HomeArgs,
}

impl GuardArgs {
    pub fn run(self) -> Result {
        let device = SimulatedDevice::new(
            vec![KilowattHours::from(4.5); 24],
            vec![KilowattHours::ZERO; 24],
            Percent(50.0),
        );
        let limiter = PowerLimiter::new(self.home.into(), self.battery.into(), self.step_size);

        let currents = device.phase_currents()?;
        let available = limiter.available_charging_rate(currents);
        info!(?currents, ?available, "fuse headroom");

        match limiter.adjust(&device)? {
            Some(rate) => info!(?rate, "charge rate adjusted"),
            None => info!("no adjustment needed"),
        }
        Ok(())
    }
}
