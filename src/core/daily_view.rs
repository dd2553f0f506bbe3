use bon::Builder;
use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        history::HistoricalStore,
        period::{DataSource, DecisionData, EconomicData, EnergyData, PeriodData},
        scenarios::CostScenarios,
        settings::{BatterySettings, Horizon},
        solver::OptimizationResult,
    },
    quantity::{cost::Cost, energy::KilowattHours, rate::KilowattHourRate},
};

/// One full day as it is best known right now: recorded actuals up to the current
/// period, the latest prediction from there on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct DailyView {
    pub periods: Vec<PeriodData>,
    pub actual_count: usize,
    pub predicted_count: usize,
    pub total_savings: Cost,
    pub actual_savings_so_far: Cost,
    pub predicted_remaining_savings: Cost,
}

#[derive(Builder)]
#[must_use]
pub struct DailyViewBuilder<'a> {
    history: &'a HistoricalStore,
    latest: Option<&'a OptimizationResult>,
    current_period: usize,
    buy_prices: &'a [KilowattHourRate],
    sell_prices: &'a [KilowattHourRate],
    home_forecast: &'a [KilowattHours],
    solar_forecast: &'a [KilowattHours],
    battery: BatterySettings,
    cycle_cost: KilowattHourRate,
    horizon: Horizon,
    day_start: DateTime<Local>,
}

impl DailyViewBuilder<'_> {
    pub fn build_view(self) -> DailyView {
        let mut periods = Vec::with_capacity(self.horizon.periods());
        let mut carried_soe = self.battery.total_capacity * 0.5;
        let mut actual_count = 0;
        let mut total_savings = Cost::ZERO;
        let mut actual_savings_so_far = Cost::ZERO;
        let mut predicted_remaining_savings = Cost::ZERO;

        for period in 0..self.horizon.periods() {
            let assembled = if period < self.current_period {
                match self.history.get_period(period) {
                    Some(recorded) => {
                        let mut data = *recorded;
                        data.data_source = DataSource::Actual;
                        data
                    }
                    // A gap in the record; fill it in from the forecasts so the day
                    // stays renderable:
                    None => self.synthesize(period, carried_soe),
                }
            } else {
                self.latest
                    .and_then(|result| {
                        period
                            .checked_sub(result.input.first_period)
                            .and_then(|offset| result.periods.get(offset))
                    })
                    .copied()
                    .unwrap_or_else(|| self.synthesize(period, carried_soe))
            };

            // The scenario comparison is recomputed uniformly so that actual and
            // predicted periods are judged by the same yardstick:
            let buy_price = self.price_at(self.buy_prices, period);
            let sell_price = self.price_at(self.sell_prices, period);
            let scenarios = CostScenarios::for_period(
                &assembled.energy,
                buy_price,
                sell_price,
                self.cycle_cost,
                self.battery.efficiency_charge,
            );
            let grid_cost = assembled.energy.grid_imported * buy_price
                - assembled.energy.grid_exported * sell_price;
            let period_cost = grid_cost + scenarios.battery_wear_cost;
            let solar_excess = (assembled.energy.solar_production
                - assembled.energy.home_consumption)
                .max(KilowattHours::ZERO);
            let base_case_cost =
                assembled.energy.home_consumption * buy_price - solar_excess * sell_price;

            let assembled = PeriodData {
                economic: EconomicData {
                    buy_price,
                    sell_price,
                    grid_cost,
                    battery_cycle_cost: scenarios.battery_wear_cost,
                    period_cost,
                    base_case_cost,
                    period_savings: base_case_cost - period_cost,
                },
                ..assembled
            };

            total_savings += scenarios.total_savings;
            if assembled.data_source == DataSource::Actual {
                actual_count += 1;
                actual_savings_so_far += scenarios.total_savings;
            } else {
                predicted_remaining_savings += scenarios.total_savings;
            }

            carried_soe = assembled.energy.battery_soe_end;
            periods.push(assembled);
        }

        DailyView {
            actual_count,
            predicted_count: periods.len() - actual_count,
            periods,
            total_savings,
            actual_savings_so_far,
            predicted_remaining_savings,
        }
    }

    /// Battery-less placeholder for a period nothing else can describe.
    fn synthesize(&self, period: usize, soe: KilowattHours) -> PeriodData {
        let home = self.forecast_at(self.home_forecast, period);
        let solar = self.forecast_at(self.solar_forecast, period);
        let energy = EnergyData::from_meters(
            solar,
            home,
            KilowattHours::ZERO,
            KilowattHours::ZERO,
            soe,
            soe,
            None,
            None,
        );
        PeriodData {
            period,
            timestamp: self.timestamp_of(period),
            data_source: DataSource::Predicted,
            energy,
            economic: EconomicData::default(),
            decision: DecisionData::default(),
        }
    }

    fn price_at(&self, prices: &[KilowattHourRate], period: usize) -> KilowattHourRate {
        prices.get(period).copied().unwrap_or(KilowattHourRate::ZERO)
    }

    fn forecast_at(&self, forecast: &[KilowattHours], period: usize) -> KilowattHours {
        forecast.get(period).copied().unwrap_or(KilowattHours::ZERO)
    }

    fn timestamp_of(&self, period: usize) -> DateTime<Local> {
        #[expect(clippy::cast_possible_truncation)]
        let step = TimeDelta::milliseconds((self.horizon.dt().0.0 * 3_600_000.0).round() as i64);
        self.day_start + step * i32::try_from(period).unwrap_or(i32::MAX)
    }
}
