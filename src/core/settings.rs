use serde::{Deserialize, Serialize};

use crate::{
    prelude::*,
    quantity::{
        cost::Cost,
        current::Amperes,
        energy::KilowattHours,
        percent::Percent,
        power::Kilowatts,
        rate::KilowattHourRate,
        time::Hours,
    },
};

/// Day horizon: how many wall-clock hours the day has and how finely they are sliced.
///
/// DST transition days legitimately have 23 or 25 hours.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Horizon {
    pub hours: usize,
    pub periods_per_hour: usize,
}

impl Default for Horizon {
    fn default() -> Self {
        Self { hours: 24, periods_per_hour: 1 }
    }
}

impl Horizon {
    pub fn new(hours: usize, periods_per_hour: usize) -> Result<Self> {
        ensure!((23..=25).contains(&hours), "a day must have 23, 24, or 25 hours, got {hours}");
        ensure!(
            periods_per_hour == 1 || periods_per_hour == 4,
            "only hourly and quarter-hourly resolutions are supported",
        );
        Ok(Self { hours, periods_per_hour })
    }

    /// Number of periods in the day.
    #[must_use]
    pub const fn periods(self) -> usize {
        self.hours * self.periods_per_hour
    }

    /// Length of one period.
    #[expect(clippy::cast_precision_loss)]
    pub fn dt(self) -> Hours {
        Hours::from(1.0 / self.periods_per_hour as f64)
    }

    #[must_use]
    pub const fn hour_of(self, period: usize) -> usize {
        period / self.periods_per_hour
    }

    #[must_use]
    pub const fn first_period_of(self, hour: usize) -> usize {
        hour * self.periods_per_hour
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct BatterySettings {
    pub total_capacity: KilowattHours,
    pub min_soc: Percent,
    pub max_soc: Percent,
    pub max_charge_power: Kilowatts,
    pub max_discharge_power: Kilowatts,

    /// Fraction of charged energy that ends up stored.
    pub efficiency_charge: f64,

    /// Fraction of drawn energy that leaves the battery as billable output.
    pub efficiency_discharge: f64,

    /// Wear cost per kilowatt-hour flowing through the battery.
    pub cycle_cost: KilowattHourRate,

    /// Smallest per-period profit that justifies a charging action.
    pub min_action_profit_threshold: Cost,

    /// Default target charge rate as a share of the maximum charge power.
    pub charging_power_rate: Percent,
}

impl BatterySettings {
    pub fn min_soe(&self) -> KilowattHours {
        self.total_capacity * self.min_soc.ratio()
    }

    pub fn max_soe(&self) -> KilowattHours {
        self.total_capacity * self.max_soc.ratio()
    }

    pub fn max_power(&self) -> Kilowatts {
        self.max_charge_power.max(self.max_discharge_power)
    }

    pub fn soc_of(&self, soe: KilowattHours) -> Percent {
        Percent::from_ratio((soe / self.total_capacity).0)
    }

    pub fn validate(&self) -> Result {
        ensure!(self.total_capacity.is_positive(), "battery capacity must be positive");
        ensure!(
            self.min_soc.is_valid() && self.max_soc.is_valid(),
            "SoC limits must be within 0…100 %",
        );
        ensure!(self.min_soc < self.max_soc, "minimum SoC must be below maximum SoC");
        ensure!(
            self.max_charge_power.is_positive() && self.max_discharge_power.is_positive(),
            "battery power limits must be positive",
        );
        ensure!(
            (0.0..=1.0).contains(&self.efficiency_charge)
                && self.efficiency_charge > 0.0
                && (0.0..=1.0).contains(&self.efficiency_discharge)
                && self.efficiency_discharge > 0.0,
            "efficiencies must be within (0, 1]",
        );
        ensure!(self.cycle_cost >= KilowattHourRate::ZERO, "cycle cost must not be negative");
        ensure!(self.charging_power_rate.is_valid(), "charging power rate must be within 0…100 %");
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct HomeSettings {
    pub max_fuse_current: Amperes,
    pub voltage: f64,

    /// Share of the fuse rating the house is allowed to use, e.g. `0.95`.
    pub safety_margin: f64,
}

impl HomeSettings {
    /// Safe continuous power ceiling of a single phase.
    pub fn phase_power_ceiling(&self) -> Kilowatts {
        Kilowatts::from_watts(self.voltage * self.max_fuse_current.0 * self.safety_margin)
    }

    pub fn validate(&self) -> Result {
        ensure!(self.max_fuse_current.0 > 0.0, "fuse rating must be positive");
        ensure!(self.voltage > 0.0, "line voltage must be positive");
        ensure!(
            self.safety_margin > 0.0 && self.safety_margin <= 1.0,
            "safety margin must be within (0, 1]",
        );
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct PriceSettings {
    pub markup: KilowattHourRate,
    pub vat_multiplier: f64,
    pub additional_costs: KilowattHourRate,
    pub tax_reduction: KilowattHourRate,

    /// When unset, raw spot prices are used on both sides of the meter.
    pub use_actual_price: bool,
}

impl PriceSettings {
    pub fn validate(&self) -> Result {
        ensure!(self.vat_multiplier >= 1.0, "VAT multiplier must be at least 1");
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct Settings {
    pub battery: BatterySettings,
    pub home: HomeSettings,
    pub price: PriceSettings,
    pub horizon: Horizon,
}

impl Settings {
    pub fn validate(&self) -> Result {
        self.battery.validate()?;
        self.home.validate()?;
        self.price.validate()?;
        Ok(())
    }

    /// Apply an operator patch: validate the patched copy first, commit only if it is sound.
    pub fn update(&mut self, patch: SettingsPatch) -> Result {
        let mut updated = *self;
        if let Some(battery) = patch.battery {
            battery.apply(&mut updated.battery);
        }
        if let Some(home) = patch.home {
            home.apply(&mut updated.home);
        }
        if let Some(price) = patch.price {
            price.apply(&mut updated.price);
        }
        updated.validate().context("rejecting settings update")?;
        *self = updated;
        Ok(())
    }
}

/// Partial settings update; unknown keys are rejected at the parse boundary.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub battery: Option<BatteryPatch>,
    pub home: Option<HomePatch>,
    pub price: Option<PricePatch>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatteryPatch {
    pub total_capacity: Option<KilowattHours>,
    pub min_soc: Option<Percent>,
    pub max_soc: Option<Percent>,
    pub max_charge_power: Option<Kilowatts>,
    pub max_discharge_power: Option<Kilowatts>,
    pub efficiency_charge: Option<f64>,
    pub efficiency_discharge: Option<f64>,
    pub cycle_cost: Option<KilowattHourRate>,
    pub min_action_profit_threshold: Option<Cost>,
    pub charging_power_rate: Option<Percent>,
}

impl BatteryPatch {
    fn apply(self, settings: &mut BatterySettings) {
        if let Some(value) = self.total_capacity {
            settings.total_capacity = value;
        }
        if let Some(value) = self.min_soc {
            settings.min_soc = value;
        }
        if let Some(value) = self.max_soc {
            settings.max_soc = value;
        }
        if let Some(value) = self.max_charge_power {
            settings.max_charge_power = value;
        }
        if let Some(value) = self.max_discharge_power {
            settings.max_discharge_power = value;
        }
        if let Some(value) = self.efficiency_charge {
            settings.efficiency_charge = value;
        }
        if let Some(value) = self.efficiency_discharge {
            settings.efficiency_discharge = value;
        }
        if let Some(value) = self.cycle_cost {
            settings.cycle_cost = value;
        }
        if let Some(value) = self.min_action_profit_threshold {
            settings.min_action_profit_threshold = value;
        }
        if let Some(value) = self.charging_power_rate {
            settings.charging_power_rate = value;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HomePatch {
    pub max_fuse_current: Option<Amperes>,
    pub voltage: Option<f64>,
    pub safety_margin: Option<f64>,
}

impl HomePatch {
    fn apply(self, settings: &mut HomeSettings) {
        if let Some(value) = self.max_fuse_current {
            settings.max_fuse_current = value;
        }
        if let Some(value) = self.voltage {
            settings.voltage = value;
        }
        if let Some(value) = self.safety_margin {
            settings.safety_margin = value;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricePatch {
    pub markup: Option<KilowattHourRate>,
    pub vat_multiplier: Option<f64>,
    pub additional_costs: Option<KilowattHourRate>,
    pub tax_reduction: Option<KilowattHourRate>,
    pub use_actual_price: Option<bool>,
}

impl PricePatch {
    fn apply(self, settings: &mut PriceSettings) {
        if let Some(value) = self.markup {
            settings.markup = value;
        }
        if let Some(value) = self.vat_multiplier {
            settings.vat_multiplier = value;
        }
        if let Some(value) = self.additional_costs {
            settings.additional_costs = value;
        }
        if let Some(value) = self.tax_reduction {
            settings.tax_reduction = value;
        }
        if let Some(value) = self.use_actual_price {
            settings.use_actual_price = value;
        }
    }
}
