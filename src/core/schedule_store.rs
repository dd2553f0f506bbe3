use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{core::solver::OptimizationResult, prelude::*};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[must_use]
pub enum ScheduleScenario {
    HourlyUpdate,
    NextDay,
}

/// One optimization run as it was stored, never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct StoredSchedule {
    pub created_at: DateTime<Local>,
    pub optimization_period: usize,
    pub scenario: ScheduleScenario,
    pub result: OptimizationResult,
}

/// All optimization results of the current day, newest last.
#[derive(Default)]
#[must_use]
pub struct ScheduleStore {
    schedules: Vec<StoredSchedule>,
}

impl ScheduleStore {
    pub const fn new() -> Self {
        Self { schedules: Vec::new() }
    }

    pub fn store(
        &mut self,
        result: OptimizationResult,
        optimization_period: usize,
        scenario: ScheduleScenario,
        created_at: DateTime<Local>,
    ) {
        info!(
            optimization_period,
            ?scenario,
            total_savings = ?result.summary.base_to_battery_solar_savings,
            "storing the optimization result",
        );
        self.schedules.push(StoredSchedule {
            created_at,
            optimization_period,
            scenario,
            result,
        });
    }

    /// Most recent schedule by creation time.
    #[must_use]
    pub fn latest(&self) -> Option<&StoredSchedule> {
        self.schedules.iter().max_by_key(|schedule| schedule.created_at)
    }

    #[must_use]
    pub fn all_today(&self) -> &[StoredSchedule] {
        &self.schedules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn reset_for_new_day(&mut self) {
        let cleared = self.schedules.len();
        self.schedules.clear();
        info!(cleared, "reset the schedule store for a new day");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::core::{scenarios::EconomicSummary, solver::OptimizationInput};
    use crate::quantity::{energy::KilowattHours, rate::KilowattHourRate};

    fn empty_result() -> OptimizationResult {
        OptimizationResult {
            input: OptimizationInput {
                buy_prices: Vec::new(),
                sell_prices: Vec::new(),
                home_consumption: Vec::new(),
                solar_production: Vec::new(),
                initial_soe: KilowattHours::ZERO,
                initial_cost_basis: KilowattHourRate::ZERO,
                first_period: 0,
            },
            periods: Vec::new(),
            summary: EconomicSummary::default(),
        }
    }

    #[test]
    fn test_latest_is_newest_by_timestamp() {
        let mut store = ScheduleStore::new();
        let now = Local::now();
        store.store(empty_result(), 5, ScheduleScenario::HourlyUpdate, now);
        store.store(
            empty_result(),
            3,
            ScheduleScenario::HourlyUpdate,
            now - TimeDelta::hours(2),
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().unwrap().optimization_period, 5);
        // Insertion order is preserved for the day log:
        assert_eq!(store.all_today()[0].optimization_period, 5);
        assert_eq!(store.all_today()[1].optimization_period, 3);
    }

    #[test]
    fn test_reset_for_new_day() {
        let mut store = ScheduleStore::new();
        store.store(empty_result(), 0, ScheduleScenario::NextDay, Local::now());
        store.reset_for_new_day();
        assert!(store.is_empty());
        assert!(store.latest().is_none());
    }
}
