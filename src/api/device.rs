use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    core::tou::TouInterval,
    prelude::*,
    quantity::{
        current::Amperes,
        energy::KilowattHours,
        percent::Percent,
        power::Kilowatts,
    },
};

/// Today's cumulative meter counters, as read in one go.
///
/// Completed-period flows are reconstructed from the difference of two snapshots.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct MeterSnapshot {
    pub taken_at: DateTime<Local>,
    pub battery_soc: Percent,
    pub battery_charged: KilowattHours,
    pub battery_discharged: KilowattHours,
    pub solar_production: KilowattHours,
    pub grid_imported: KilowattHours,
    pub grid_exported: KilowattHours,
    pub home_consumption: KilowattHours,
}

/// The inverter, as far as this crate is concerned.
///
/// Calls are blocking and may fail; writes are idempotent and expected to fail loudly
/// when the hardware refuses them. Only the manager and the power limiter write.
pub trait DeviceController {
    fn battery_soc(&self) -> Result<Percent>;
    fn battery_charge_power(&self) -> Result<Kilowatts>;
    fn battery_discharge_power(&self) -> Result<Kilowatts>;
    fn grid_charge_enabled(&self) -> Result<bool>;
    fn charge_rate_percent(&self) -> Result<u8>;
    fn discharge_rate_percent(&self) -> Result<u8>;
    fn phase_currents(&self) -> Result<[Amperes; 3]>;

    /// Expected consumption for each hour of the coming day.
    fn consumption_forecast(&self) -> Result<Vec<KilowattHours>>;

    /// Expected solar yield for each hour of the coming day.
    fn solar_forecast(&self) -> Result<Vec<KilowattHours>>;

    fn meter_snapshot(&self) -> Result<MeterSnapshot>;
    fn read_time_segments(&self) -> Result<Vec<TouInterval>>;

    fn set_grid_charge(&self, enable: bool) -> Result;
    fn set_charge_rate_percent(&self, rate: u8) -> Result;
    fn set_discharge_rate_percent(&self, rate: u8) -> Result;
    fn set_charge_stop_soc(&self, soc: u8) -> Result;
    fn set_discharge_stop_soc(&self, soc: u8) -> Result;
    fn set_time_segment(&self, segment: &TouInterval) -> Result;
}
