use bon::Builder;
use chrono::{DateTime, Local, TimeDelta};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        period::{DataSource, DecisionData, EconomicData, EnergyData, PeriodData, StrategicIntent},
        scenarios::EconomicSummary,
        settings::BatterySettings,
    },
    prelude::*,
    quantity::{
        Quantity,
        cost::Cost,
        energy::KilowattHours,
        power::Kilowatts,
        rate::KilowattHourRate,
        time::Hours,
    },
};

/// State-of-energy grid resolution.
const SOE_STEP: KilowattHours = Quantity(OrderedFloat(0.1));

/// Action grid resolution.
const POWER_STEP: Kilowatts = Quantity(OrderedFloat(0.2));

/// Anything below this is treated as "no action".
const SIGNIFICANT_POWER: Kilowatts = Quantity(OrderedFloat(0.1));

/// Slack for floating-point feasibility checks.
const EPSILON: f64 = 1e-9;

/// Finds the cost-optimal battery dispatch for the remaining horizon.
///
/// Backward induction over a `(period, state of energy)` grid: for every state the
/// cheapest feasible action is chosen, taking the future consequences into account.
/// Alongside the value, the solver tracks the weighted-average acquisition cost of the
/// stored energy ("cost basis") so it never plans to sell energy below what it paid for
/// it, and labels every decision with the strategic intent that motivated it.
#[derive(Builder)]
#[must_use]
pub struct Solver<'a> {
    buy_prices: &'a [KilowattHourRate],
    sell_prices: &'a [KilowattHourRate],
    home_consumption: &'a [KilowattHours],
    solar_production: &'a [KilowattHours],
    battery: BatterySettings,

    /// Effective wear cost, already VAT-scaled by the price model.
    cycle_cost: KilowattHourRate,

    dt: Hours,
    initial_soe: KilowattHours,
    initial_cost_basis: KilowattHourRate,

    /// Wall-clock start of the first optimized period.
    start_time: DateTime<Local>,

    /// Day-position of the first optimized period.
    #[builder(default)]
    first_period: usize,
}

struct StepOutcome {
    reward: Cost,
    next_basis: KilowattHourRate,
    wear: Cost,
    energy: EnergyData,
}

impl Solver<'_> {
    #[instrument(skip_all, fields(first_period = self.first_period))]
    pub fn solve(self) -> Result<OptimizationResult> {
        let horizon = self.buy_prices.len();
        ensure!(horizon > 0, "cannot optimize an empty horizon");
        ensure!(
            self.sell_prices.len() == horizon
                && self.home_consumption.len() == horizon
                && self.solar_production.len() == horizon,
            "horizon arrays disagree: {} buy prices, {} sell prices, {} consumption, {} solar",
            horizon,
            self.sell_prices.len(),
            self.home_consumption.len(),
            self.solar_production.len(),
        );

        let soe_levels = self.soe_levels();
        let actions = self.power_levels();
        let best_future_sell = self.best_future_sell(horizon);
        debug!(
            horizon,
            soe_levels = soe_levels.len(),
            actions = actions.len(),
            initial_soe = ?self.initial_soe,
            initial_cost_basis = ?self.initial_cost_basis,
            "optimizing…",
        );

        let states = soe_levels.len();
        let mut value = vec![vec![Cost::ZERO; states]; horizon + 1];
        let mut policy = vec![vec![Kilowatts::ZERO; states]; horizon];
        let mut basis = vec![vec![self.initial_cost_basis; states]; horizon + 1];
        let mut intents = vec![vec![StrategicIntent::Idle; states]; horizon];

        for t in (0..horizon).rev() {
            for (i, &soe) in soe_levels.iter().enumerate() {
                let mut best: Option<(Cost, Kilowatts, KilowattHourRate, usize, StrategicIntent)> =
                    None;
                // Actions are ordered by magnitude, so on equal value the laziest wins:
                for &action in &actions {
                    let Some(next_soe) = self.transition(soe, action) else {
                        continue;
                    };
                    let Some(outcome) =
                        self.step_outcome(t, soe, next_soe, action, basis[t][i], &best_future_sell)
                    else {
                        continue;
                    };
                    let next_i = Self::index_of(&soe_levels, next_soe);
                    let q = outcome.reward + value[t + 1][next_i];
                    let intent = Self::label(action, &outcome.energy, self.sell_prices[t], basis[t][i]);
                    if best.is_none_or(|(best_q, ..)| q > best_q) {
                        best = Some((q, action, outcome.next_basis, next_i, intent));
                    }
                }
                // Idling is always feasible, so there is always a best action:
                if let Some((q, action, next_basis, next_i, intent)) = best {
                    value[t][i] = q;
                    policy[t][i] = self.clip(action);
                    basis[t + 1][next_i] = next_basis;
                    intents[t][i] = intent;
                }
            }
        }

        let periods = self.simulate(&soe_levels, &policy, &best_future_sell);
        let summary = EconomicSummary::from_periods(
            periods.iter(),
            self.cycle_cost,
            self.battery.efficiency_charge,
        );
        info!(
            total_savings = ?summary.base_to_battery_solar_savings,
            total_charged = ?summary.total_charged,
            total_discharged = ?summary.total_discharged,
            "optimized",
        );

        Ok(OptimizationResult {
            input: OptimizationInput {
                buy_prices: self.buy_prices.to_vec(),
                sell_prices: self.sell_prices.to_vec(),
                home_consumption: self.home_consumption.to_vec(),
                solar_production: self.solar_production.to_vec(),
                initial_soe: self.initial_soe,
                initial_cost_basis: self.initial_cost_basis,
                first_period: self.first_period,
            },
            periods,
            summary,
        })
    }

    /// Walk the policy forward from the initial state, re-deriving the economics with
    /// the actually-evolving cost basis.
    fn simulate(
        &self,
        soe_levels: &[KilowattHours],
        policy: &[Vec<Kilowatts>],
        best_future_sell: &[KilowattHourRate],
    ) -> Vec<PeriodData> {
        let mut soe = self
            .initial_soe
            .clamp(self.battery.min_soe(), self.battery.max_soe().max(self.initial_soe));
        let mut cost_basis = self.initial_cost_basis;
        let mut periods = Vec::with_capacity(policy.len());

        for (t, row) in policy.iter().enumerate() {
            let planned = row[Self::index_of(soe_levels, soe)];
            // Quantization drift may turn a planned action infeasible or unprofitable in
            // the actually reached state; fall back to idling then.
            let (action, next_soe, outcome) = self
                .transition(soe, planned)
                .and_then(|next_soe| {
                    self.step_outcome(t, soe, next_soe, planned, cost_basis, best_future_sell)
                        .map(|outcome| (planned, next_soe, outcome))
                })
                .unwrap_or_else(|| {
                    let outcome = self
                        .step_outcome(t, soe, soe, Kilowatts::ZERO, cost_basis, best_future_sell)
                        .expect("idling is always feasible");
                    (Kilowatts::ZERO, soe, outcome)
                });

            let buy_price = self.buy_prices[t];
            let sell_price = self.sell_prices[t];
            let grid_cost = outcome.energy.grid_imported * buy_price
                - outcome.energy.grid_exported * sell_price;
            let period_cost = grid_cost + outcome.wear;
            let solar_excess = (self.solar_production[t] - self.home_consumption[t])
                .max(KilowattHours::ZERO);
            let base_case_cost =
                self.home_consumption[t] * buy_price - solar_excess * sell_price;

            let intent = Self::label(action, &outcome.energy, sell_price, cost_basis);
            periods.push(PeriodData {
                period: self.first_period + t,
                timestamp: self.timestamp_of(t),
                data_source: DataSource::Predicted,
                energy: outcome.energy,
                economic: EconomicData {
                    buy_price,
                    sell_price,
                    grid_cost,
                    battery_cycle_cost: outcome.wear,
                    period_cost,
                    base_case_cost,
                    period_savings: base_case_cost - period_cost,
                },
                decision: DecisionData {
                    strategic_intent: intent,
                    battery_action: action,
                    cost_basis: outcome.next_basis,
                },
            });

            soe = next_soe;
            cost_basis = outcome.next_basis;
        }
        periods
    }

    /// Next state of energy, or `None` when the action does not physically fit.
    fn transition(&self, soe: KilowattHours, action: Kilowatts) -> Option<KilowattHours> {
        if action > Kilowatts::ZERO {
            if action > self.battery.max_charge_power {
                return None;
            }
            let charged = action * self.dt * self.battery.efficiency_charge;
            let next_soe = soe + charged;
            (next_soe <= self.battery.max_soe() + KilowattHours::from(EPSILON))
                .then_some(next_soe.min(self.battery.max_soe()))
        } else if action < Kilowatts::ZERO {
            if -action > self.battery.max_discharge_power {
                return None;
            }
            let needed = (-action) * self.dt / self.battery.efficiency_discharge;
            let available = soe - self.battery.min_soe();
            (needed <= available + KilowattHours::from(EPSILON))
                .then_some((soe - needed).max(self.battery.min_soe()))
        } else {
            Some(soe)
        }
    }

    /// Immediate reward and cost-basis update of one state-action, or `None` when
    /// discharging would sell below the cost basis.
    fn step_outcome(
        &self,
        t: usize,
        soe: KilowattHours,
        next_soe: KilowattHours,
        action: Kilowatts,
        cost_basis: KilowattHourRate,
        best_future_sell: &[KilowattHourRate],
    ) -> Option<StepOutcome> {
        let buy_price = self.buy_prices[t];
        let sell_price = self.sell_prices[t];
        let energy = EnergyData::from_action(
            action,
            self.home_consumption[t],
            self.solar_production[t],
            soe,
            next_soe,
            self.dt,
        );
        let wear = (next_soe - soe).abs() * self.cycle_cost;

        let mut next_basis = cost_basis;
        let mut reward = -(energy.grid_imported * buy_price
            - energy.grid_exported * sell_price
            + wear);

        if action > Kilowatts::ZERO {
            let stored = next_soe - soe;
            let solar_cost = energy.flows.solar_to_battery
                * self.battery.efficiency_charge
                * self.cycle_cost;
            let grid_cost = energy.flows.grid_to_battery
                * self.battery.efficiency_charge
                * (buy_price + self.cycle_cost);
            let new_cost = solar_cost + grid_cost;
            next_basis = if next_soe > self.battery.min_soe() {
                (soe * cost_basis + new_cost) / next_soe
            } else if stored.is_positive() {
                new_cost / stored
            } else {
                cost_basis
            };

            // A charge that cannot plausibly pay for itself is discouraged by a fixed
            // penalty. Discharging is never penalized: stored energy stays usable even
            // when the remaining spreads are narrow.
            let threshold = self.battery.min_action_profit_threshold;
            if threshold > Cost::ZERO && stored.is_positive() {
                let unit_cost = new_cost / stored;
                let plausible_profit = stored * (best_future_sell[t] - unit_cost);
                if plausible_profit < threshold {
                    reward -= threshold;
                }
            }
        } else if action < Kilowatts::ZERO && sell_price <= cost_basis {
            // Selling below what the stored energy cost is never worth it:
            return None;
        }

        Some(StepOutcome { reward, next_basis, wear, energy })
    }

    fn label(
        action: Kilowatts,
        energy: &EnergyData,
        sell_price: KilowattHourRate,
        cost_basis: KilowattHourRate,
    ) -> StrategicIntent {
        if action > SIGNIFICANT_POWER {
            if energy.flows.grid_to_battery > energy.flows.solar_to_battery {
                StrategicIntent::GridCharging
            } else {
                StrategicIntent::SolarStorage
            }
        } else if -action > SIGNIFICANT_POWER {
            if energy.flows.battery_to_grid > energy.flows.battery_to_home
                && sell_price > cost_basis
            {
                StrategicIntent::ExportArbitrage
            } else {
                StrategicIntent::LoadSupport
            }
        } else {
            StrategicIntent::Idle
        }
    }

    fn soe_levels(&self) -> Vec<KilowattHours> {
        let min_soe = self.battery.min_soe();
        let span = self.battery.max_soe().max(self.initial_soe) - min_soe;
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = ((span / SOE_STEP).0 + EPSILON).floor() as usize + 1;
        (0..count).map(|i| min_soe + SOE_STEP * i as f64).collect()
    }

    /// Action grid ordered by magnitude: `0, +step, -step, +2·step, …`
    fn power_levels(&self) -> Vec<Kilowatts> {
        let max_power = self.battery.max_power();
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = ((max_power / POWER_STEP).0 + EPSILON).floor() as usize;
        let mut actions = vec![Kilowatts::ZERO];
        for i in 1..=count {
            let power = POWER_STEP * i as f64;
            actions.push(power);
            actions.push(-power);
        }
        actions
    }

    /// Highest sell price still ahead of period `t`.
    fn best_future_sell(&self, horizon: usize) -> Vec<KilowattHourRate> {
        let mut best = vec![KilowattHourRate::ZERO; horizon];
        let mut running = KilowattHourRate::ZERO;
        for t in (0..horizon).rev() {
            best[t] = running;
            running = running.max(self.sell_prices[t]);
        }
        best
    }

    fn index_of(soe_levels: &[KilowattHours], soe: KilowattHours) -> usize {
        let position = ((soe - soe_levels[0]) / SOE_STEP).0.round();
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = position.max(0.0) as usize;
        index.min(soe_levels.len() - 1)
    }

    fn clip(&self, action: Kilowatts) -> Kilowatts {
        action.clamp(-self.battery.max_discharge_power, self.battery.max_charge_power)
    }

    fn timestamp_of(&self, t: usize) -> DateTime<Local> {
        #[expect(clippy::cast_possible_truncation)]
        let step = TimeDelta::milliseconds((self.dt.0.0 * 3_600_000.0).round() as i64);
        self.start_time + step * i32::try_from(t).unwrap_or(i32::MAX)
    }
}

/// Frozen copy of the optimizer inputs, kept with the result for inspection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct OptimizationInput {
    pub buy_prices: Vec<KilowattHourRate>,
    pub sell_prices: Vec<KilowattHourRate>,
    pub home_consumption: Vec<KilowattHours>,
    pub solar_production: Vec<KilowattHours>,
    pub initial_soe: KilowattHours,
    pub initial_cost_basis: KilowattHourRate,
    pub first_period: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct OptimizationResult {
    pub input: OptimizationInput,
    pub periods: Vec<PeriodData>,
    pub summary: EconomicSummary,
}

impl OptimizationResult {
    /// Predicted solar charging over the horizon; schedule re-application triggers on
    /// changes of this total.
    pub fn predicted_solar_charging(&self) -> KilowattHours {
        self.periods.iter().map(|period| period.energy.flows.solar_to_battery).sum()
    }
}
