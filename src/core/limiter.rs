use crate::{
    api::device::DeviceController,
    core::settings::{BatterySettings, HomeSettings},
    prelude::*,
    quantity::{current::Amperes, percent::Percent, power::Kilowatts},
};

/// Keeps grid charging below the house fuses.
///
/// Runs on its own cadence, a few minutes apart: reads the three phase currents, works
/// out how much headroom the most loaded phase still has, and nudges the charge rate
/// toward that ceiling in small steps so the load never jumps.
#[must_use]
pub struct PowerLimiter {
    home: HomeSettings,
    battery: BatterySettings,

    /// Rate adjustment per pass, in percentage points.
    step_size: f64,

    /// Upper bound requested by the schedule, as a share of the maximum charge power.
    target_rate: Percent,
}

impl PowerLimiter {
    pub fn new(home: HomeSettings, battery: BatterySettings, step_size: f64) -> Self {
        let target_rate = battery.charging_power_rate;
        Self { home, battery, step_size, target_rate }
    }

    /// Let the schedule raise or lower the charging target.
    pub fn set_target_rate(&mut self, target_rate: Percent) {
        let clamped = target_rate.clamp(Percent::ZERO, Percent::HUNDRED);
        if (clamped.0 - self.target_rate.0).abs() > 0.01 {
            info!(from = ?self.target_rate, to = ?clamped, "updating the target charging rate");
        }
        self.target_rate = clamped;
    }

    /// Safe charge rate right now, as a percentage of the battery's maximum.
    ///
    /// The battery charges symmetrically over all three phases, so the binding
    /// constraint is the headroom of the most loaded phase against one third of the
    /// maximum charge power.
    pub fn available_charging_rate(&self, currents: [Amperes; 3]) -> Percent {
        let ceiling = self.home.phase_power_ceiling();
        let loads = currents.map(|current| current.at_voltage(self.home.voltage));
        let most_loaded = loads.into_iter().fold(Kilowatts::ZERO, Kilowatts::max);

        let headroom = (ceiling - most_loaded).max(Kilowatts::ZERO);
        let battery_per_phase = self.battery.max_charge_power / 3.0;
        let available = Percent::from_ratio((headroom / battery_per_phase).0);

        debug!(
            ?loads,
            ?most_loaded,
            ?headroom,
            ?available,
            target = ?self.target_rate,
            "phase load check",
        );
        available.clamp(Percent::ZERO, self.target_rate)
    }

    /// One limiter pass. Returns the rate that was written, if any.
    pub fn adjust(&self, device: &dyn DeviceController) -> Result<Option<Percent>> {
        if !device.grid_charge_enabled()? {
            // Nothing to protect against; solar charging does not load the fuses.
            return Ok(None);
        }

        let target = self.available_charging_rate(device.phase_currents()?);
        let current = Percent::from(device.charge_rate_percent()?);
        let new_rate = if target.0 > current.0 {
            Percent((current.0 + self.step_size).min(target.0))
        } else {
            Percent((current.0 - self.step_size).max(target.0))
        };

        if (new_rate.0 - current.0).abs() >= self.step_size {
            info!(from = ?current, to = ?new_rate, ?target, "adjusting the charge rate");
            device.set_charge_rate_percent(new_rate.into_u8())?;
            Ok(Some(new_rate))
        } else {
            Ok(None)
        }
    }
}
