use crate::{
    api::device::MeterSnapshot,
    core::{period::EnergyData, settings::BatterySettings},
    prelude::*,
    quantity::{Quantity, energy::KilowattHours},
};

/// Counters may jitter by this much backwards without being treated as a reset.
const COUNTER_SLACK: KilowattHours = Quantity(ordered_float::OrderedFloat(0.001));

/// Reconstruct the energy flows of the period between two meter snapshots.
///
/// Returns [`None`] when the data cannot describe a completed period: typically a
/// counter reset at midnight or a snapshot taken mid-restart. Reading is the only
/// side effect the collector is allowed to have on the device.
pub fn completed_period_energy(
    previous: &MeterSnapshot,
    current: &MeterSnapshot,
    battery: &BatterySettings,
) -> Option<EnergyData> {
    let delta = |get: fn(&MeterSnapshot) -> KilowattHours| -> Option<KilowattHours> {
        let difference = get(current) - get(previous);
        if difference < -COUNTER_SLACK {
            debug!(?difference, "counter went backwards, discarding the period");
            return None;
        }
        Some(difference.max(KilowattHours::ZERO))
    };

    let battery_charged = delta(|snapshot| snapshot.battery_charged)?;
    let battery_discharged = delta(|snapshot| snapshot.battery_discharged)?;
    let solar_production = delta(|snapshot| snapshot.solar_production)?;
    let grid_imported = delta(|snapshot| snapshot.grid_imported)?;
    let grid_exported = delta(|snapshot| snapshot.grid_exported)?;
    let home_consumption = delta(|snapshot| snapshot.home_consumption)?;

    let soe_start = battery.total_capacity * previous.battery_soc.ratio();
    let soe_end = battery.total_capacity * current.battery_soc.ratio();

    Some(EnergyData::from_meters(
        solar_production,
        home_consumption,
        battery_charged,
        battery_discharged,
        soe_start,
        soe_end,
        Some(grid_imported),
        Some(grid_exported),
    ))
}
