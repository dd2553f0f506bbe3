use std::sync::{Mutex, MutexGuard};

use chrono::Local;

use crate::{
    api::device::{DeviceController, MeterSnapshot},
    core::tou::TouInterval,
    prelude::*,
    quantity::{
        current::Amperes,
        energy::KilowattHours,
        percent::Percent,
        power::Kilowatts,
        time::Hours,
    },
};

/// In-memory stand-in for the inverter.
///
/// Good enough to run the whole pipeline without hardware: counters accumulate, the
/// battery respects its bounds, and every write is tallied so tests can assert on
/// write elision.
#[must_use]
pub struct SimulatedDevice {
    state: Mutex<SimState>,
}

struct SimState {
    capacity: KilowattHours,
    soc: Percent,
    max_charge_power: Kilowatts,
    max_discharge_power: Kilowatts,
    grid_charge: bool,
    charge_rate: u8,
    discharge_rate: u8,
    charge_stop_soc: u8,
    discharge_stop_soc: u8,
    segments: Vec<TouInterval>,
    consumption_profile: Vec<KilowattHours>,
    solar_profile: Vec<KilowattHours>,
    phase_currents: [Amperes; 3],
    charge_power: Kilowatts,
    discharge_power: Kilowatts,
    meters: Meters,
    setting_writes: usize,
    segment_writes: usize,
}

#[derive(Default)]
struct Meters {
    battery_charged: KilowattHours,
    battery_discharged: KilowattHours,
    solar_production: KilowattHours,
    grid_imported: KilowattHours,
    grid_exported: KilowattHours,
    home_consumption: KilowattHours,
}

impl SimulatedDevice {
    pub fn new(
        consumption_profile: Vec<KilowattHours>,
        solar_profile: Vec<KilowattHours>,
        initial_soc: Percent,
    ) -> Self {
        Self {
            state: Mutex::new(SimState {
                capacity: KilowattHours::from(30.0),
                soc: initial_soc,
                max_charge_power: Kilowatts::from(15.0),
                max_discharge_power: Kilowatts::from(15.0),
                grid_charge: false,
                charge_rate: 40,
                discharge_rate: 0,
                charge_stop_soc: 100,
                discharge_stop_soc: 10,
                segments: Vec::new(),
                consumption_profile,
                solar_profile,
                phase_currents: [Amperes::ZERO; 3],
                charge_power: Kilowatts::ZERO,
                discharge_power: Kilowatts::ZERO,
                meters: Meters::default(),
                setting_writes: 0,
                segment_writes: 0,
            }),
        }
    }

    pub fn with_idle_profiles() -> Self {
        Self::new(
            vec![KilowattHours::from(0.5); 24],
            vec![KilowattHours::ZERO; 24],
            Percent(50.0),
        )
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("the simulator mutex is poisoned")
    }

    /// Number of setting writes (grid charge, rates, stop SoC) so far.
    #[must_use]
    pub fn setting_writes(&self) -> usize {
        self.lock().setting_writes
    }

    /// Number of TOU segment writes so far.
    #[must_use]
    pub fn segment_writes(&self) -> usize {
        self.lock().segment_writes
    }

    pub fn set_phase_currents(&self, currents: [Amperes; 3]) {
        self.lock().phase_currents = currents;
    }

    /// Run the household for one hour and accumulate the meters.
    pub fn advance_hour(&self, hour: usize) {
        let mut state = self.lock();
        let dt = Hours::from(1.0);
        let home = state
            .consumption_profile
            .get(hour % state.consumption_profile.len().max(1))
            .copied()
            .unwrap_or_default();
        let solar =
            state.solar_profile.get(hour % state.solar_profile.len().max(1)).copied().unwrap_or_default();

        let soe = state.capacity * state.soc.ratio();
        let headroom =
            state.capacity * f64::from(state.charge_stop_soc) / 100.0 - soe;
        let available =
            soe - state.capacity * f64::from(state.discharge_stop_soc) / 100.0;

        let solar_to_home = solar.min(home);
        let excess_solar = solar - solar_to_home;
        let deficit = home - solar_to_home;

        let charged = if state.grid_charge {
            let requested =
                state.max_charge_power * (f64::from(state.charge_rate) / 100.0) * dt;
            requested.min(headroom.max(KilowattHours::ZERO))
        } else {
            excess_solar.min(headroom.max(KilowattHours::ZERO))
        };
        let discharged = if !state.grid_charge && state.discharge_rate > 0 {
            let limit =
                state.max_discharge_power * (f64::from(state.discharge_rate) / 100.0) * dt;
            deficit.min(limit).min(available.max(KilowattHours::ZERO))
        } else {
            KilowattHours::ZERO
        };

        let solar_to_battery = if state.grid_charge { KilowattHours::ZERO } else { charged };
        let exported = excess_solar - solar_to_battery;
        let grid_charge_draw = if state.grid_charge { charged } else { KilowattHours::ZERO };
        let imported = (deficit - discharged).max(KilowattHours::ZERO) + grid_charge_draw;

        state.soc = Percent::from_ratio(
            (((soe + charged - discharged) / state.capacity).0).clamp(0.0, 1.0),
        );
        state.charge_power = charged / dt;
        state.discharge_power = discharged / dt;
        state.meters.battery_charged += charged;
        state.meters.battery_discharged += discharged;
        state.meters.solar_production += solar;
        state.meters.grid_imported += imported;
        state.meters.grid_exported += exported;
        state.meters.home_consumption += home;
        state.phase_currents = {
            let per_phase_w = (home / dt).0.0 * 1000.0 / 3.0 / 230.0;
            [Amperes(per_phase_w); 3]
        };
    }
}

impl DeviceController for SimulatedDevice {
    fn battery_soc(&self) -> Result<Percent> {
        Ok(self.lock().soc)
    }

    fn battery_charge_power(&self) -> Result<Kilowatts> {
        Ok(self.lock().charge_power)
    }

    fn battery_discharge_power(&self) -> Result<Kilowatts> {
        Ok(self.lock().discharge_power)
    }

    fn grid_charge_enabled(&self) -> Result<bool> {
        Ok(self.lock().grid_charge)
    }

    fn charge_rate_percent(&self) -> Result<u8> {
        Ok(self.lock().charge_rate)
    }

    fn discharge_rate_percent(&self) -> Result<u8> {
        Ok(self.lock().discharge_rate)
    }

    fn phase_currents(&self) -> Result<[Amperes; 3]> {
        Ok(self.lock().phase_currents)
    }

    fn consumption_forecast(&self) -> Result<Vec<KilowattHours>> {
        Ok(self.lock().consumption_profile.clone())
    }

    fn solar_forecast(&self) -> Result<Vec<KilowattHours>> {
        Ok(self.lock().solar_profile.clone())
    }

    fn meter_snapshot(&self) -> Result<MeterSnapshot> {
        let state = self.lock();
        Ok(MeterSnapshot {
            taken_at: Local::now(),
            battery_soc: state.soc,
            battery_charged: state.meters.battery_charged,
            battery_discharged: state.meters.battery_discharged,
            solar_production: state.meters.solar_production,
            grid_imported: state.meters.grid_imported,
            grid_exported: state.meters.grid_exported,
            home_consumption: state.meters.home_consumption,
        })
    }

    fn read_time_segments(&self) -> Result<Vec<TouInterval>> {
        Ok(self.lock().segments.clone())
    }

    fn set_grid_charge(&self, enable: bool) -> Result {
        let mut state = self.lock();
        state.grid_charge = enable;
        state.setting_writes += 1;
        Ok(())
    }

    fn set_charge_rate_percent(&self, rate: u8) -> Result {
        ensure!(rate <= 100, "charge rate {rate} is out of range");
        let mut state = self.lock();
        state.charge_rate = rate;
        state.setting_writes += 1;
        Ok(())
    }

    fn set_discharge_rate_percent(&self, rate: u8) -> Result {
        ensure!(rate <= 100, "discharge rate {rate} is out of range");
        let mut state = self.lock();
        state.discharge_rate = rate;
        state.setting_writes += 1;
        Ok(())
    }

    fn set_charge_stop_soc(&self, soc: u8) -> Result {
        ensure!(soc <= 100, "charge stop SoC {soc} is out of range");
        let mut state = self.lock();
        state.charge_stop_soc = soc;
        state.setting_writes += 1;
        Ok(())
    }

    fn set_discharge_stop_soc(&self, soc: u8) -> Result {
        ensure!(soc <= 100, "discharge stop SoC {soc} is out of range");
        let mut state = self.lock();
        state.discharge_stop_soc = soc;
        state.setting_writes += 1;
        Ok(())
    }

    fn set_time_segment(&self, segment: &TouInterval) -> Result {
        ensure!(
            (1..=9).contains(&segment.segment_id),
            "segment id {} is out of range",
            segment.segment_id,
        );
        let mut state = self.lock();
        if let Some(existing) =
            state.segments.iter_mut().find(|existing| existing.segment_id == segment.segment_id)
        {
            *existing = *segment;
        } else {
            state.segments.push(*segment);
        }
        state.segment_writes += 1;
        Ok(())
    }
}
