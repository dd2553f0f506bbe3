use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    core::{
        period::{PeriodData, StrategicIntent},
        settings::{BatterySettings, Horizon},
    },
    prelude::*,
    quantity::{Quantity, energy::KilowattHours, percent::Percent},
};

/// Acceptable metering slack before a balance warning is logged.
const BALANCE_TOLERANCE: KilowattHours = Quantity(ordered_float::OrderedFloat(0.2));

/// What actually happened today, one record per completed period.
///
/// Records are append-only within a day; overwriting an existing period is tolerated but
/// logged, because it usually means the collector ran twice for the same period.
#[must_use]
pub struct HistoricalStore {
    horizon: Horizon,
    battery: BatterySettings,
    periods: HashMap<usize, PeriodData>,
}

impl HistoricalStore {
    pub fn new(horizon: Horizon, battery: BatterySettings) -> Self {
        Self { horizon, battery, periods: HashMap::new() }
    }

    pub fn record_period(&mut self, period: usize, data: PeriodData) -> Result {
        ensure!(
            period < self.horizon.periods(),
            "period {period} is outside the day of {} periods",
            self.horizon.periods(),
        );
        let soe_range = KilowattHours::ZERO..=self.battery.total_capacity;
        ensure!(
            soe_range.contains(&data.energy.battery_soe_start)
                && soe_range.contains(&data.energy.battery_soe_end),
            "period {period} carries an impossible state of energy: {:?} -> {:?}",
            data.energy.battery_soe_start,
            data.energy.battery_soe_end,
        );

        let balance_error = data.energy.balance_error();
        if balance_error > BALANCE_TOLERANCE {
            warn!(period, ?balance_error, "energy balance is off, recording anyway");
        }
        if let Some(existing) = self.periods.get(&period) {
            warn!(
                period,
                old_soe_end = ?existing.energy.battery_soe_end,
                new_soe_end = ?data.energy.battery_soe_end,
                "overwriting an already recorded period",
            );
        }
        self.periods.insert(period, data);
        Ok(())
    }

    #[must_use]
    pub fn get_period(&self, period: usize) -> Option<&PeriodData> {
        self.periods.get(&period)
    }

    /// All slots of the day, recorded or not.
    #[must_use]
    pub fn today_periods(&self) -> Vec<Option<PeriodData>> {
        (0..self.horizon.periods()).map(|period| self.periods.get(&period).copied()).collect()
    }

    #[must_use]
    pub fn completed_periods(&self) -> Vec<usize> {
        let mut periods: Vec<usize> = self.periods.keys().copied().collect();
        periods.sort_unstable();
        periods
    }

    #[must_use]
    pub fn stored_count(&self) -> usize {
        self.periods.len()
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.periods.len();
        self.periods.clear();
        cleared
    }

    pub fn reset_for_new_day(&mut self) {
        let cleared = self.clear();
        info!(cleared, "reset the historical store for a new day");
    }

    /// Battery state at the end of the latest recorded period, or a neutral default.
    pub fn latest_energy_state(&self) -> (Percent, KilowattHours, StrategicIntent) {
        let latest = self
            .periods
            .keys()
            .max()
            .and_then(|latest_period| self.periods.get(latest_period));
        match latest {
            Some(data) => (
                self.battery.soc_of(data.energy.battery_soe_end),
                data.energy.battery_soe_end,
                data.decision.strategic_intent,
            ),
            None => (Percent(50.0), self.battery.total_capacity * 0.5, StrategicIntent::Idle),
        }
    }

    /// Day-so-far totals across everything recorded.
    pub fn balance_summary(&self) -> BalanceSummary {
        let mut summary = BalanceSummary::default();
        for data in self.periods.values() {
            summary.solar_production += data.energy.solar_production;
            summary.home_consumption += data.energy.home_consumption;
            summary.grid_imported += data.energy.grid_imported;
            summary.grid_exported += data.energy.grid_exported;
            summary.battery_charged += data.energy.battery_charged;
            summary.battery_discharged += data.energy.battery_discharged;
            *summary.intent_counts.entry(data.decision.strategic_intent).or_default() += 1;
        }
        summary.periods_recorded = self.periods.len();
        summary.self_consumed_solar = summary.solar_production
            - self
                .periods
                .values()
                .map(|data| data.energy.flows.solar_to_grid)
                .sum::<KilowattHours>();
        summary
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[must_use]
pub struct BalanceSummary {
    pub periods_recorded: usize,
    pub solar_production: KilowattHours,
    pub home_consumption: KilowattHours,
    pub grid_imported: KilowattHours,
    pub grid_exported: KilowattHours,
    pub battery_charged: KilowattHours,
    pub battery_discharged: KilowattHours,
    pub self_consumed_solar: KilowattHours,
    pub intent_counts: HashMap<StrategicIntent, usize>,
}

impl BalanceSummary {
    /// Discharged over charged; a rough day-level round-trip indicator.
    #[must_use]
    pub fn battery_round_trip_ratio(&self) -> Option<f64> {
        self.battery_charged
            .is_positive()
            .then(|| (self.battery_discharged / self.battery_charged).0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;
    use crate::core::{
        period::{DataSource, DecisionData, EconomicData, EnergyData},
        settings::tests::test_battery_settings,
    };
    use crate::quantity::{power::Kilowatts, rate::KilowattHourRate, time::Hours};

    fn period_data(period: usize, soe_start: f64, soe_end: f64, action: f64) -> PeriodData {
        let power = Kilowatts::from(action);
        PeriodData {
            period,
            timestamp: Local::now(),
            data_source: DataSource::Actual,
            energy: EnergyData::from_action(
                power,
                KilowattHours::from(1.0),
                KilowattHours::ZERO,
                KilowattHours::from(soe_start),
                KilowattHours::from(soe_end),
                Hours::from(1.0),
            ),
            economic: EconomicData {
                buy_price: KilowattHourRate::from(1.0),
                sell_price: KilowattHourRate::from(0.7),
                ..EconomicData::default()
            },
            decision: DecisionData::default(),
        }
    }

    fn store() -> HistoricalStore {
        HistoricalStore::new(Horizon::default(), test_battery_settings())
    }

    #[test]
    fn test_record_and_fetch() {
        let mut store = store();
        store.record_period(3, period_data(3, 5.0, 5.0, 0.0)).unwrap();
        assert_eq!(store.stored_count(), 1);
        assert!(store.get_period(3).is_some());
        assert!(store.get_period(4).is_none());
        assert_eq!(store.completed_periods(), vec![3]);

        let today = store.today_periods();
        assert_eq!(today.len(), 24);
        assert!(today[3].is_some());
        assert!(today.iter().enumerate().all(|(period, slot)| period == 3 || slot.is_none()));
    }

    #[test]
    fn test_rejects_out_of_day_period() {
        let mut store = store();
        assert!(store.record_period(24, period_data(24, 5.0, 5.0, 0.0)).is_err());
    }

    #[test]
    fn test_rejects_impossible_soe() {
        let mut store = store();
        assert!(store.record_period(1, period_data(1, 35.0, 35.0, 0.0)).is_err());
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let mut store = store();
        store.record_period(2, period_data(2, 5.0, 5.0, 0.0)).unwrap();
        store.record_period(2, period_data(2, 5.0, 8.0, 3.0)).unwrap();
        assert_eq!(store.stored_count(), 1);
        assert_eq!(
            store.get_period(2).unwrap().energy.battery_soe_end,
            KilowattHours::from(8.0),
        );
    }

    #[test]
    fn test_latest_energy_state_default() {
        let (soc, soe, intent) = store().latest_energy_state();
        approx::assert_abs_diff_eq!(soc.0, 50.0, epsilon = 1e-9);
        assert_eq!(soe, KilowattHours::from(15.0));
        assert_eq!(intent, StrategicIntent::Idle);
    }

    #[test]
    fn test_latest_energy_state_follows_highest_period() {
        let mut store = store();
        store.record_period(1, period_data(1, 5.0, 8.0, 3.0)).unwrap();
        store.record_period(7, period_data(7, 8.0, 6.0, -2.0)).unwrap();
        store.record_period(4, period_data(4, 8.0, 8.0, 0.0)).unwrap();
        let (_, soe, _) = store.latest_energy_state();
        assert_eq!(soe, KilowattHours::from(6.0));
    }

    #[test]
    fn test_reset_for_new_day() {
        let mut store = store();
        store.record_period(0, period_data(0, 5.0, 5.0, 0.0)).unwrap();
        store.reset_for_new_day();
        assert_eq!(store.stored_count(), 0);
    }

    #[test]
    fn test_balance_summary_totals() {
        let mut store = store();
        store.record_period(0, period_data(0, 5.0, 8.0, 3.0)).unwrap();
        store.record_period(1, period_data(1, 8.0, 6.0, -2.0)).unwrap();
        let summary = store.balance_summary();
        assert_eq!(summary.periods_recorded, 2);
        assert_eq!(summary.battery_charged, KilowattHours::from(3.0));
        assert_eq!(summary.battery_discharged, KilowattHours::from(2.0));
        approx::assert_abs_diff_eq!(
            summary.battery_round_trip_ratio().unwrap(),
            2.0 / 3.0,
            epsilon = 1e-9,
        );
    }
}
