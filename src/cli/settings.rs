use clap::Parser;

use crate::{
    core::settings::{
        BatterySettings,
        HomeSettings,
        Horizon,
        PriceSettings,
        Settings,
    },
    prelude::*,
    quantity::{
        cost::Cost,
        current::Amperes,
        energy::KilowattHours,
        percent::Percent,
        power::Kilowatts,
        rate::KilowattHourRate,
    },
};

#[derive(Copy, Clone, Parser)]
pub struct BatteryArgs {
    /// Total battery capacity in kilowatt-hours.
    #[clap(long = "battery-capacity", env = "BATTERY_CAPACITY", default_value = "30")]
    pub total_capacity: KilowattHours,

    /// Lowest allowed state of charge in percent.
    #[clap(long = "battery-min-soc", env = "BATTERY_MIN_SOC", default_value = "10")]
    pub min_soc: Percent,

    /// Highest allowed state of charge in percent.
    #[clap(long = "battery-max-soc", env = "BATTERY_MAX_SOC", default_value = "100")]
    pub max_soc: Percent,

    /// Maximum charging power in kilowatts.
    #[clap(long = "max-charge-power", env = "MAX_CHARGE_POWER", default_value = "15")]
    pub max_charge_power: Kilowatts,

    /// Maximum discharging power in kilowatts.
    #[clap(long = "max-discharge-power", env = "MAX_DISCHARGE_POWER", default_value = "15")]
    pub max_discharge_power: Kilowatts,

    #[clap(long = "charge-efficiency", env = "CHARGE_EFFICIENCY", default_value = "0.97")]
    pub efficiency_charge: f64,

    #[clap(long = "discharge-efficiency", env = "DISCHARGE_EFFICIENCY", default_value = "0.95")]
    pub efficiency_discharge: f64,

    /// Battery wear cost per kilowatt-hour flowing through it.
    #[clap(long = "cycle-cost", env = "CYCLE_COST", default_value = "0.40")]
    pub cycle_cost: KilowattHourRate,

    /// Smallest per-period profit that justifies a charging action.
    #[clap(long = "min-action-profit", env = "MIN_ACTION_PROFIT", default_value = "0")]
    pub min_action_profit_threshold: Cost,

    /// Default target charge rate as a share of the maximum charge power.
    #[clap(long = "charging-power-rate", env = "CHARGING_POWER_RATE", default_value = "40")]
    pub charging_power_rate: Percent,
}

impl From<BatteryArgs> for BatterySettings {
    fn from(args: BatteryArgs) -> Self {
        Self {
            total_capacity: args.total_capacity,
            min_soc: args.min_soc,
            max_soc: args.max_soc,
            max_charge_power: args.max_charge_power,
            max_discharge_power: args.max_discharge_power,
            efficiency_charge: args.efficiency_charge,
            efficiency_discharge: args.efficiency_discharge,
            cycle_cost: args.cycle_cost,
            min_action_profit_threshold: args.min_action_profit_threshold,
            charging_power_rate: args.charging_power_rate,
        }
    }
}

#[derive(Copy, Clone, Parser)]
pub struct HomeArgs {
    /// Main fuse rating per phase in amperes.
    #[clap(long = "max-fuse-current", env = "MAX_FUSE_CURRENT", default_value = "25")]
    pub max_fuse_current: Amperes,

    /// Line voltage in volts.
    #[clap(long = "voltage", env = "VOLTAGE", default_value = "230")]
    pub voltage: f64,

    /// Share of the fuse rating the house may use.
    #[clap(long = "safety-margin", env = "SAFETY_MARGIN", default_value = "0.95")]
    pub safety_margin: f64,
}

impl From<HomeArgs> for HomeSettings {
    fn from(args: HomeArgs) -> Self {
        Self {
            max_fuse_current: args.max_fuse_current,
            voltage: args.voltage,
            safety_margin: args.safety_margin,
        }
    }
}

#[derive(Copy, Clone, Parser)]
pub struct PriceArgs {
    /// Supplier markup on the spot price.
    #[clap(long = "price-markup", env = "PRICE_MARKUP", default_value = "0.08")]
    pub markup: KilowattHourRate,

    #[clap(long = "vat-multiplier", env = "VAT_MULTIPLIER", default_value = "1.25")]
    pub vat_multiplier: f64,

    /// Transfer fees and energy tax per kilowatt-hour.
    #[clap(long = "additional-costs", env = "ADDITIONAL_COSTS", default_value = "1.03")]
    pub additional_costs: KilowattHourRate,

    /// Tax reduction credited per exported kilowatt-hour.
    #[clap(long = "tax-reduction", env = "TAX_REDUCTION", default_value = "0.6518")]
    pub tax_reduction: KilowattHourRate,

    /// Optimize against the full consumer price instead of the raw spot price.
    #[clap(long = "use-actual-price", env = "USE_ACTUAL_PRICE")]
    pub use_actual_price: bool,
}

impl From<PriceArgs> for PriceSettings {
    fn from(args: PriceArgs) -> Self {
        Self {
            markup: args.markup,
            vat_multiplier: args.vat_multiplier,
            additional_costs: args.additional_costs,
            tax_reduction: args.tax_reduction,
            use_actual_price: args.use_actual_price,
        }
    }
}

#[derive(Copy, Clone, Parser)]
pub struct HorizonArgs {
    /// Periods per hour: 1 for hourly, 4 for quarter-hourly scheduling.
    #[clap(long = "periods-per-hour", env = "PERIODS_PER_HOUR", default_value = "1")]
    pub periods_per_hour: usize,
}

#[derive(Copy, Clone, Parser)]
pub struct SettingsArgs {
    #[clap(flatten)]
    pub battery: BatteryArgs,

    #[clap(flatten)]
    pub home: HomeArgs,

    #[clap(flatten)]
    pub price: PriceArgs,

    #[clap(flatten)]
    pub horizon: HorizonArgs,
}

impl SettingsArgs {
    pub fn into_settings(self) -> Result<Settings> {
        let settings = Settings {
            battery: self.battery.into(),
            home: self.home.into(),
            price: self.price.into(),
            horizon: Horizon::new(24, self.horizon.periods_per_hour)?,
        };
        settings.validate()?;
        Ok(settings)
    }
}
