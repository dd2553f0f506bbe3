use std::fmt::{Display, Formatter};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    core::flows::Flows,
    quantity::{
        cost::Cost,
        energy::KilowattHours,
        power::Kilowatts,
        rate::KilowattHourRate,
        time::Hours,
    },
};

/// Why the optimizer chose an action. Captured at decision time; downstream consumers
/// must not re-derive it from flows.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[must_use]
pub enum StrategicIntent {
    GridCharging,
    SolarStorage,
    LoadSupport,
    ExportArbitrage,
    #[default]
    Idle,
}

impl StrategicIntent {
    /// Tie-break rank when collapsing sub-periods into one hour; higher wins.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::GridCharging => 4,
            Self::ExportArbitrage => 3,
            Self::SolarStorage => 2,
            Self::LoadSupport => 1,
            Self::Idle => 0,
        }
    }

    /// Classify a *measured* period from its flows.
    ///
    /// Only used for actuals; predicted periods carry the intent the optimizer chose.
    pub fn classify(energy: &EnergyData) -> Self {
        let threshold = KilowattHours::from(0.1);
        let net_change = energy.battery_charged - energy.battery_discharged;
        if net_change.abs() < threshold {
            Self::Idle
        } else if net_change > KilowattHours::ZERO {
            if energy.flows.grid_to_battery > energy.flows.solar_to_battery {
                Self::GridCharging
            } else {
                Self::SolarStorage
            }
        } else if energy.flows.battery_to_grid > energy.flows.battery_to_home {
            Self::ExportArbitrage
        } else {
            Self::LoadSupport
        }
    }
}

impl Display for StrategicIntent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::GridCharging => "GRID_CHARGING",
            Self::SolarStorage => "SOLAR_STORAGE",
            Self::LoadSupport => "LOAD_SUPPORT",
            Self::ExportArbitrage => "EXPORT_ARBITRAGE",
            Self::Idle => "IDLE",
        };
        f.write_str(text)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[must_use]
pub enum DataSource {
    Actual,
    #[default]
    Predicted,
}

/// The physical facts of one period.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct EnergyData {
    pub solar_production: KilowattHours,
    pub home_consumption: KilowattHours,
    pub grid_imported: KilowattHours,
    pub grid_exported: KilowattHours,
    pub battery_charged: KilowattHours,
    pub battery_discharged: KilowattHours,
    pub battery_soe_start: KilowattHours,
    pub battery_soe_end: KilowattHours,
    pub flows: Flows,
}

impl EnergyData {
    /// Build a period from a battery power action, as the optimizer sees it.
    pub fn from_action(
        power: Kilowatts,
        home_consumption: KilowattHours,
        solar_production: KilowattHours,
        soe_start: KilowattHours,
        soe_end: KilowattHours,
        dt: Hours,
    ) -> Self {
        let battery_charged = (power * dt).max(KilowattHours::ZERO);
        let battery_discharged = (-(power * dt)).max(KilowattHours::ZERO);
        let flows =
            Flows::allocate(solar_production, home_consumption, battery_charged, battery_discharged);
        Self {
            solar_production,
            home_consumption,
            grid_imported: flows.grid_imported(),
            grid_exported: flows.grid_exported(),
            battery_charged,
            battery_discharged,
            battery_soe_start: soe_start,
            battery_soe_end: soe_end,
            flows,
        }
    }

    /// Build a period from meter readings. Missing grid meters are filled in from the
    /// energy balance.
    #[expect(clippy::too_many_arguments)]
    pub fn from_meters(
        solar_production: KilowattHours,
        home_consumption: KilowattHours,
        battery_charged: KilowattHours,
        battery_discharged: KilowattHours,
        battery_soe_start: KilowattHours,
        battery_soe_end: KilowattHours,
        grid_imported: Option<KilowattHours>,
        grid_exported: Option<KilowattHours>,
    ) -> Self {
        let flows =
            Flows::allocate(solar_production, home_consumption, battery_charged, battery_discharged);
        let grid_imported = grid_imported.unwrap_or_else(|| {
            (home_consumption + battery_charged - solar_production - battery_discharged)
                .max(KilowattHours::ZERO)
        });
        let grid_exported = grid_exported.unwrap_or_else(|| {
            (solar_production + battery_discharged - home_consumption - battery_charged)
                .max(KilowattHours::ZERO)
        });
        Self {
            solar_production,
            home_consumption,
            grid_imported,
            grid_exported,
            battery_charged,
            battery_discharged,
            battery_soe_start,
            battery_soe_end,
            flows,
        }
    }

    pub fn net_battery_change(&self) -> KilowattHours {
        self.battery_charged - self.battery_discharged
    }

    /// Absolute error of `solar + import + discharge = home + export + charge`.
    pub fn balance_error(&self) -> KilowattHours {
        let energy_in = self.solar_production + self.grid_imported + self.battery_discharged;
        let energy_out = self.home_consumption + self.grid_exported + self.battery_charged;
        (energy_in - energy_out).abs()
    }
}

/// Money facts of one period.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct EconomicData {
    pub buy_price: KilowattHourRate,
    pub sell_price: KilowattHourRate,

    /// Import cost minus export revenue.
    pub grid_cost: Cost,
    pub battery_cycle_cost: Cost,

    /// `grid_cost + battery_cycle_cost`.
    pub period_cost: Cost,

    /// Serving the same load with solar netted against it, but no battery.
    pub base_case_cost: Cost,
    pub period_savings: Cost,
}

/// What the optimizer decided for one period, and why.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct DecisionData {
    pub strategic_intent: StrategicIntent,

    /// Positive charges, negative discharges.
    pub battery_action: Kilowatts,

    /// Weighted-average cost of the energy stored after this period.
    pub cost_basis: KilowattHourRate,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct PeriodData {
    pub period: usize,
    pub timestamp: DateTime<Local>,
    pub data_source: DataSource,
    pub energy: EnergyData,
    pub economic: EconomicData,
    pub decision: DecisionData,
}
