use serde::{Deserialize, Serialize};

use crate::{
    core::period::{EnergyData, PeriodData},
    quantity::{cost::Cost, energy::KilowattHours, rate::KilowattHourRate},
};

/// The three what-if costs of a single period: grid only, solar only, and the optimized
/// battery + solar dispatch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct CostScenarios {
    pub grid_only_cost: Cost,
    pub solar_only_cost: Cost,
    pub battery_solar_cost: Cost,
    pub solar_savings: Cost,
    pub battery_savings: Cost,
    pub total_savings: Cost,
    pub battery_wear_cost: Cost,
}

impl CostScenarios {
    pub fn for_period(
        energy: &EnergyData,
        buy_price: KilowattHourRate,
        sell_price: KilowattHourRate,
        cycle_cost: KilowattHourRate,
        efficiency_charge: f64,
    ) -> Self {
        let grid_only_cost = energy.home_consumption * buy_price;

        let direct_solar = energy.solar_production.min(energy.home_consumption);
        let solar_excess = energy.solar_production - direct_solar;
        let grid_needed = energy.home_consumption - direct_solar;
        let solar_only_cost = grid_needed * buy_price - solar_excess * sell_price;

        // Wear is billed on the energy actually deposited into the cells:
        let battery_wear_cost = energy.battery_charged * efficiency_charge * cycle_cost;
        let battery_solar_cost =
            energy.grid_imported * buy_price - energy.grid_exported * sell_price
                + battery_wear_cost;

        Self {
            grid_only_cost,
            solar_only_cost,
            battery_solar_cost,
            solar_savings: grid_only_cost - solar_only_cost,
            battery_savings: solar_only_cost - battery_solar_cost,
            total_savings: grid_only_cost - battery_solar_cost,
            battery_wear_cost,
        }
    }
}

/// Horizon-wide totals of the scenario comparison.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct EconomicSummary {
    pub grid_only_cost: Cost,
    pub solar_only_cost: Cost,
    pub battery_solar_cost: Cost,
    pub base_to_solar_savings: Cost,
    pub solar_to_battery_solar_savings: Cost,
    pub base_to_battery_solar_savings: Cost,

    /// Total savings as a share of the grid-only cost, in percent.
    pub base_to_battery_solar_savings_pct: f64,

    pub total_charged: KilowattHours,
    pub total_discharged: KilowattHours,
}

impl EconomicSummary {
    pub fn from_periods<'a>(
        periods: impl IntoIterator<Item = &'a PeriodData>,
        cycle_cost: KilowattHourRate,
        efficiency_charge: f64,
    ) -> Self {
        let mut summary = Self::default();
        for period in periods {
            let scenarios = CostScenarios::for_period(
                &period.energy,
                period.economic.buy_price,
                period.economic.sell_price,
                cycle_cost,
                efficiency_charge,
            );
            summary.grid_only_cost += scenarios.grid_only_cost;
            summary.solar_only_cost += scenarios.solar_only_cost;
            summary.battery_solar_cost += scenarios.battery_solar_cost;
            summary.base_to_solar_savings += scenarios.solar_savings;
            summary.solar_to_battery_solar_savings += scenarios.battery_savings;
            summary.base_to_battery_solar_savings += scenarios.total_savings;
            summary.total_charged += period.energy.battery_charged;
            summary.total_discharged += period.energy.battery_discharged;
        }
        if summary.grid_only_cost > Cost::ZERO {
            summary.base_to_battery_solar_savings_pct =
                (summary.base_to_battery_solar_savings / summary.grid_only_cost).0 * 100.0;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::quantity::{power::Kilowatts, time::Hours};

    #[test]
    fn test_scenarios_without_battery() {
        let energy = EnergyData::from_action(
            Kilowatts::ZERO,
            KilowattHours::from(2.0),
            KilowattHours::from(3.0),
            KilowattHours::from(5.0),
            KilowattHours::from(5.0),
            Hours::from(1.0),
        );
        let scenarios = CostScenarios::for_period(
            &energy,
            KilowattHourRate::from(1.0),
            KilowattHourRate::from(0.5),
            KilowattHourRate::from(0.4),
            0.97,
        );
        assert_abs_diff_eq!(scenarios.grid_only_cost.0.0, 2.0, epsilon = 1e-9);
        // 2 kWh of direct solar, 1 kWh exported at the sell price:
        assert_abs_diff_eq!(scenarios.solar_only_cost.0.0, -0.5, epsilon = 1e-9);
        // An idle battery changes nothing against solar-only:
        assert_abs_diff_eq!(scenarios.battery_solar_cost.0.0, -0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(scenarios.solar_savings.0.0, 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(scenarios.battery_savings.0.0, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(scenarios.total_savings.0.0, 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_wear_billed_on_stored_energy() {
        let energy = EnergyData::from_action(
            Kilowatts::from(5.0),
            KilowattHours::ZERO,
            KilowattHours::ZERO,
            KilowattHours::from(5.0),
            KilowattHours::from(9.85),
            Hours::from(1.0),
        );
        let scenarios = CostScenarios::for_period(
            &energy,
            KilowattHourRate::from(0.3),
            KilowattHourRate::from(0.2),
            KilowattHourRate::from(0.4),
            0.97,
        );
        assert_abs_diff_eq!(scenarios.battery_wear_cost.0.0, 5.0 * 0.97 * 0.4, epsilon = 1e-9);
        assert_abs_diff_eq!(
            scenarios.battery_solar_cost.0.0,
            5.0 * 0.3 + 5.0 * 0.97 * 0.4,
            epsilon = 1e-9,
        );
    }
}
