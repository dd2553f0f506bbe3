use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeDelta, Timelike};

use crate::{
    api::{
        collector,
        device::{DeviceController, MeterSnapshot},
        prices::PriceSource,
    },
    core::{
        daily_view::{DailyView, DailyViewBuilder},
        history::HistoricalStore,
        period::{DataSource, DecisionData, EconomicData, PeriodData, StrategicIntent},
        pricing::PriceModel,
        schedule_store::{ScheduleScenario, ScheduleStore, StoredSchedule},
        settings::{Horizon, Settings, SettingsPatch},
        solver::Solver,
        tou::{TouPlan, TouTranslator, diff_segments, segments_differ},
    },
    prelude::*,
    quantity::{
        Quantity,
        cost::Cost,
        energy::KilowattHours,
        power::Kilowatts,
        rate::KilowattHourRate,
    },
};

/// Battery content below which the cost basis is considered empty.
const BASIS_FLOOR: KilowattHours = Quantity(ordered_float::OrderedFloat(0.1));

/// Charge power below which a supposedly charging battery draws a warning.
const CHARGE_SANITY_FLOOR: Kilowatts = Quantity(ordered_float::OrderedFloat(0.5));

/// Drives the whole system: one [`tick`](SystemManager::tick) records the completed
/// period, refreshes prices, optimizes the rest of the day, and pushes the changed part
/// of the schedule to the inverter.
///
/// All mutation happens on the tick; read-only callers see either the pre- or the
/// post-tick state, never a partial one.
#[must_use]
pub struct SystemManager<'a> {
    settings: Settings,
    device: &'a dyn DeviceController,
    prices: &'a dyn PriceSource,
    history: HistoricalStore,
    schedules: ScheduleStore,
    deployed: Option<TouPlan>,
    deployed_solar_charging: KilowattHours,
    last_snapshot: Option<MeterSnapshot>,
    current_day: Option<NaiveDate>,
}

impl<'a> SystemManager<'a> {
    pub fn new(
        settings: Settings,
        device: &'a dyn DeviceController,
        prices: &'a dyn PriceSource,
    ) -> Self {
        Self {
            history: HistoricalStore::new(settings.horizon, settings.battery),
            settings,
            device,
            prices,
            schedules: ScheduleStore::new(),
            deployed: None,
            deployed_solar_charging: KilowattHours::ZERO,
            last_snapshot: None,
            current_day: None,
        }
    }

    /// Adopt whatever schedule the inverter is currently running as the deployed
    /// snapshot, so that a restart does not blindly rewrite every segment.
    pub fn start(&mut self) -> Result {
        let segments = self.device.read_time_segments().context("failed to read the TOU table")?;
        if segments.is_empty() {
            info!("no TOU segments deployed on the inverter");
        } else {
            info!(count = segments.len(), "adopting the deployed TOU segments");
        }
        self.deployed = Some(TouPlan::from_deployed_segments(segments, self.settings.horizon));
        self.last_snapshot = self.device.meter_snapshot().ok();

        // The SoC guard rails never change intraday, assert them once:
        self.device
            .set_charge_stop_soc(self.settings.battery.max_soc.into_u8())
            .context("failed to set the charge stop SoC")?;
        self.device
            .set_discharge_stop_soc(self.settings.battery.min_soc.into_u8())
            .context("failed to set the discharge stop SoC")?;
        Ok(())
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) -> Result {
        self.settings.update(patch)
    }

    #[must_use]
    pub fn latest_schedule(&self) -> Option<&StoredSchedule> {
        self.schedules.latest()
    }

    pub const fn deployed_plan(&self) -> Option<&TouPlan> {
        self.deployed.as_ref()
    }

    pub const fn history(&self) -> &HistoricalStore {
        &self.history
    }

    /// One orchestration pass. Never panics or propagates: a failed stage keeps the
    /// previously deployed plan in force and reports `false`.
    pub fn tick(&mut self, now: DateTime<Local>, prepare_next_day: bool, dry_run: bool) -> bool {
        match self.run_tick(now, prepare_next_day, dry_run) {
            Ok(()) => true,
            Err(error) => {
                error!("tick failed, keeping the previous plan: {error:#}");
                false
            }
        }
    }

    fn run_tick(
        &mut self,
        now: DateTime<Local>,
        prepare_next_day: bool,
        dry_run: bool,
    ) -> Result {
        let horizon = self.settings.horizon;
        let current_period = self.period_of(now);
        info!(current_period, prepare_next_day, dry_run, "tick");

        self.roll_over_day(now, prepare_next_day);

        // Prices for the day being planned:
        let spot = if prepare_next_day {
            self.prices.tomorrow_prices().context("failed to fetch tomorrow's prices")?
        } else {
            self.prices.today_prices().context("failed to fetch today's prices")?
        };
        ensure!(!spot.is_empty(), "the price source returned an empty day");
        let model = PriceModel::new(self.settings.price);
        let spot_rates: Vec<KilowattHourRate> = spot.iter().map(|entry| entry.price).collect();
        let buy = Self::per_period(&model.buy_prices(&spot_rates), horizon);
        let sell = Self::per_period(&model.sell_prices(&spot_rates), horizon);
        let cycle_cost = model.effective_cycle_cost(self.settings.battery.cycle_cost);

        if !prepare_next_day && current_period > 0 {
            if let Err(error) =
                self.record_completed_period(now, current_period, &buy, &sell, cycle_cost)
            {
                warn!("failed to record the completed period: {error:#}");
            }
        }

        let soc = match self.device.battery_soc() {
            Ok(soc) => soc,
            Err(error) => {
                let (fallback, _, _) = self.history.latest_energy_state();
                warn!(?fallback, "failed to read the battery SoC, falling back: {error:#}");
                fallback
            }
        };
        let initial_soe = self.settings.battery.total_capacity * soc.ratio();
        let initial_cost_basis = self.initial_cost_basis(current_period, cycle_cost);

        let first_period = if prepare_next_day { 0 } else { current_period };
        let home = Self::per_period_energy(
            &self.device.consumption_forecast().context("failed to read the consumption forecast")?,
            horizon,
        );
        let solar = Self::per_period_energy(
            &self.device.solar_forecast().context("failed to read the solar forecast")?,
            horizon,
        );
        // On DST days the price feed and the forecasts disagree by an hour; the common
        // prefix is what can be optimized.
        let day_length = buy.len().min(sell.len()).min(home.len()).min(solar.len());
        ensure!(
            first_period < day_length,
            "nothing left to optimize at period {first_period}",
        );

        let result = Solver::builder()
            .buy_prices(&buy[first_period..day_length])
            .sell_prices(&sell[first_period..day_length])
            .home_consumption(&home[first_period..day_length])
            .solar_production(&solar[first_period..day_length])
            .battery(self.settings.battery)
            .cycle_cost(cycle_cost)
            .dt(horizon.dt())
            .initial_soe(initial_soe)
            .initial_cost_basis(initial_cost_basis)
            .start_time(Self::period_start(now, first_period, horizon, prepare_next_day))
            .first_period(first_period)
            .build()
            .solve()?;

        let scenario = if prepare_next_day {
            ScheduleScenario::NextDay
        } else {
            ScheduleScenario::HourlyUpdate
        };
        let intents: Vec<StrategicIntent> =
            result.periods.iter().map(|period| period.decision.strategic_intent).collect();
        let actions: Vec<Kilowatts> =
            result.periods.iter().map(|period| period.decision.battery_action).collect();

        let plan = TouTranslator::builder()
            .intents(&intents)
            .actions(&actions)
            .current_period(first_period)
            .horizon(horizon)
            .maybe_deployed((!prepare_next_day).then_some(self.deployed.as_ref()).flatten())
            .battery(self.settings.battery)
            .build()
            .translate();

        let solar_charging = result.predicted_solar_charging();
        if let Some(reason) =
            self.apply_reason(prepare_next_day, current_period, solar_charging, &plan)
        {
            info!(%reason, "applying the new schedule");
            if dry_run {
                info!("dry run, not writing to the inverter");
            } else {
                let from_hour =
                    if prepare_next_day { 0 } else { horizon.hour_of(current_period) };
                self.apply_segments(&plan, from_hour)?;
                self.deployed = Some(plan);
                self.deployed_solar_charging = solar_charging;
            }
        } else {
            info!("the deployed schedule still matches, not rewriting it");
        }

        self.schedules.store(result, first_period, scenario, now);

        if !prepare_next_day && !dry_run {
            self.apply_hour_settings(horizon.hour_of(current_period))?;
        }
        Ok(())
    }

    /// Full-day view for the operator surface; renderable even when the last tick
    /// failed (the tail is then synthesized from the forecasts).
    pub fn daily_view(&self, now: DateTime<Local>) -> Result<DailyView> {
        let horizon = self.settings.horizon;
        let model = PriceModel::new(self.settings.price);
        let spot = self.prices.today_prices().context("failed to fetch today's prices")?;
        let spot_rates: Vec<KilowattHourRate> = spot.iter().map(|entry| entry.price).collect();
        let buy = Self::per_period(&model.buy_prices(&spot_rates), horizon);
        let sell = Self::per_period(&model.sell_prices(&spot_rates), horizon);
        let home = Self::per_period_energy(
            &self.device.consumption_forecast().unwrap_or_default(),
            horizon,
        );
        let solar =
            Self::per_period_energy(&self.device.solar_forecast().unwrap_or_default(), horizon);

        let view = DailyViewBuilder::builder()
            .history(&self.history)
            .maybe_latest(self.schedules.latest().map(|stored| &stored.result))
            .current_period(self.period_of(now))
            .buy_prices(&buy)
            .sell_prices(&sell)
            .home_forecast(&home)
            .solar_forecast(&solar)
            .battery(self.settings.battery)
            .cycle_cost(model.effective_cycle_cost(self.settings.battery.cycle_cost))
            .horizon(horizon)
            .day_start(Self::day_start(now))
            .build()
            .build_view();
        Ok(view)
    }

    /// Running weighted-average cost of the energy currently stored, replayed from
    /// today's records. Pre-existing energy that no record explains is valued at the
    /// cycle cost, a conservative default.
    fn initial_cost_basis(
        &self,
        current_period: usize,
        cycle_cost: KilowattHourRate,
    ) -> KilowattHourRate {
        let completed: Vec<usize> = self
            .history
            .completed_periods()
            .into_iter()
            .filter(|period| *period < current_period)
            .collect();
        let Some(first) = completed.first() else {
            return cycle_cost;
        };

        let mut running_energy = self
            .history
            .get_period(*first)
            .map(|data| data.energy.battery_soe_start)
            .unwrap_or_default();
        let mut running_cost = running_energy * cycle_cost;

        for period in completed {
            let Some(data) = self.history.get_period(period) else {
                continue;
            };
            let charged = data.energy.battery_charged;
            if charged.is_positive() {
                let solar_to_battery = charged.min(data.energy.solar_production);
                let grid_to_battery = charged - solar_to_battery;
                running_cost += solar_to_battery * cycle_cost
                    + grid_to_battery * (data.economic.buy_price + cycle_cost);
                running_energy += charged;
            }
            let discharged = data.energy.battery_discharged;
            if discharged.is_positive() && running_energy.is_positive() {
                let average = running_cost / running_energy;
                running_cost =
                    (running_cost - discharged.min(running_energy) * average).max(Cost::ZERO);
                running_energy = (running_energy - discharged).max(KilowattHours::ZERO);
                if running_energy <= BASIS_FLOOR {
                    running_cost = Cost::ZERO;
                    running_energy = KilowattHours::ZERO;
                }
            }
        }

        if running_energy > BASIS_FLOOR {
            let basis = running_cost / running_energy;
            debug!(?basis, "cost basis replayed from history");
            basis
        } else {
            cycle_cost
        }
    }

    /// Reconstruct and record the period that just finished.
    fn record_completed_period(
        &mut self,
        now: DateTime<Local>,
        current_period: usize,
        buy: &[KilowattHourRate],
        sell: &[KilowattHourRate],
        cycle_cost: KilowattHourRate,
    ) -> Result {
        let snapshot = self.device.meter_snapshot().context("failed to read the meters")?;
        let Some(previous) = self.last_snapshot.replace(snapshot) else {
            debug!("no previous snapshot yet, nothing to reconstruct");
            return Ok(());
        };

        let period = current_period - 1;
        if self.history.get_period(period).is_some() {
            debug!(period, "already recorded");
            return Ok(());
        }
        let Some(energy) =
            collector::completed_period_energy(&previous, &snapshot, &self.settings.battery)
        else {
            warn!(period, "meter data cannot describe the completed period, skipping");
            return Ok(());
        };

        let buy_price = buy.get(period).copied().unwrap_or_default();
        let sell_price = sell.get(period).copied().unwrap_or_default();
        let grid_cost = energy.grid_imported * buy_price - energy.grid_exported * sell_price;
        let wear = energy.battery_charged * self.settings.battery.efficiency_charge * cycle_cost;
        let solar_excess =
            (energy.solar_production - energy.home_consumption).max(KilowattHours::ZERO);
        let base_case_cost = energy.home_consumption * buy_price - solar_excess * sell_price;

        let action = energy.net_battery_change() / self.settings.horizon.dt();
        let data = PeriodData {
            period,
            timestamp: now,
            data_source: DataSource::Actual,
            energy,
            economic: EconomicData {
                buy_price,
                sell_price,
                grid_cost,
                battery_cycle_cost: wear,
                period_cost: grid_cost + wear,
                base_case_cost,
                period_savings: base_case_cost - grid_cost - wear,
            },
            decision: DecisionData {
                strategic_intent: StrategicIntent::classify(&energy),
                battery_action: action,
                cost_basis: KilowattHourRate::ZERO,
            },
        };
        self.history.record_period(period, data)
    }

    /// Why the fresh plan must be pushed, or `None` to keep the deployed one.
    fn apply_reason(
        &self,
        prepare_next_day: bool,
        current_period: usize,
        solar_charging: KilowattHours,
        plan: &TouPlan,
    ) -> Option<String> {
        if prepare_next_day {
            return Some("preparing the next day".to_string());
        }
        let Some(deployed) = &self.deployed else {
            return Some("first run".to_string());
        };
        if current_period == 0 {
            return Some("new day".to_string());
        }
        if (solar_charging - self.deployed_solar_charging).abs() > KilowattHours::from(0.01) {
            return Some(format!(
                "predicted solar charging changed: {:?} -> {solar_charging:?}",
                self.deployed_solar_charging,
            ));
        }
        let from_hour = self.settings.horizon.hour_of(current_period);
        if let Some(reason) =
            segments_differ(&deployed.intervals, &plan.intervals, from_hour)
        {
            return Some(reason);
        }
        if deployed.hourly.len() != plan.hourly.len()
            || deployed.hourly[from_hour..] != plan.hourly[from_hour..]
        {
            return Some("per-hour hardware settings changed".to_string());
        }
        None
    }

    /// Push the changed segments: disables first, then the new content.
    fn apply_segments(&self, plan: &TouPlan, from_hour: usize) -> Result {
        let deployed: &[_] =
            self.deployed.as_ref().map_or(&[], |deployed| &deployed.intervals);
        let writes = diff_segments(deployed, &plan.intervals, from_hour);
        if writes.is_empty() {
            return Ok(());
        }
        info!(count = writes.len(), "writing TOU segments");
        for segment in &writes {
            self.device.set_time_segment(segment).with_context(|| {
                format!(
                    "failed to write segment {} ({}-{})",
                    segment.segment_id,
                    segment.start_time(),
                    segment.end_time(),
                )
            })?;
        }
        Ok(())
    }

    /// The per-tick hardware settings of the running hour are always re-asserted.
    fn apply_hour_settings(&self, hour: usize) -> Result {
        let Some(settings) =
            self.deployed.as_ref().and_then(|plan| plan.hour_settings(hour)).copied()
        else {
            warn!(hour, "no hourly settings to apply");
            return Ok(());
        };
        debug!(
            hour,
            intent = %settings.intent,
            grid_charge = settings.grid_charge,
            charge_rate = settings.charge_rate,
            discharge_rate = settings.discharge_rate,
            "applying hourly settings",
        );
        self.device.set_grid_charge(settings.grid_charge).context("failed to set grid charge")?;
        self.device
            .set_charge_rate_percent(settings.charge_rate)
            .context("failed to set the charge rate")?;
        self.device
            .set_discharge_rate_percent(settings.discharge_rate)
            .context("failed to set the discharge rate")?;
        self.verify_device_state(settings.grid_charge);
        Ok(())
    }

    /// Cross-check that the device actually follows the settings; re-assert on drift.
    fn verify_device_state(&self, grid_charge_intended: bool) {
        match self.device.grid_charge_enabled() {
            Ok(actual) if actual != grid_charge_intended => {
                warn!(
                    intended = grid_charge_intended,
                    actual, "grid charge state drifted, re-asserting",
                );
                if let Err(error) = self.device.set_grid_charge(grid_charge_intended) {
                    error!("failed to re-assert grid charge: {error:#}");
                }
            }
            Ok(_) => {}
            Err(error) => warn!("could not verify the grid charge state: {error:#}"),
        }
        if grid_charge_intended {
            let charging_plausible = self
                .device
                .battery_soc()
                .and_then(|soc| Ok((soc, self.device.battery_charge_power()?)));
            if let Ok((soc, power)) = charging_plausible
                && soc < self.settings.battery.max_soc
                && power < CHARGE_SANITY_FLOOR
            {
                warn!(?soc, ?power, "grid charging is on but the battery barely charges");
            }
        }
    }

    fn roll_over_day(&mut self, now: DateTime<Local>, prepare_next_day: bool) {
        if prepare_next_day {
            return;
        }
        let today = now.date_naive();
        if let Some(previous) = self.current_day
            && previous != today
        {
            info!(%previous, %today, "new day");
            self.history.reset_for_new_day();
            self.schedules.reset_for_new_day();
            self.deployed_solar_charging = KilowattHours::ZERO;
        }
        self.current_day = Some(today);
    }

    /// Day-position of the period containing `now`.
    fn period_of(&self, now: DateTime<Local>) -> usize {
        let horizon = self.settings.horizon;
        let hour = usize::try_from(now.hour()).unwrap_or(0);
        let sub_period =
            usize::try_from(now.minute()).unwrap_or(0) * horizon.periods_per_hour / 60;
        (hour * horizon.periods_per_hour + sub_period).min(horizon.periods().saturating_sub(1))
    }

    fn day_start(now: DateTime<Local>) -> DateTime<Local> {
        now.with_time(NaiveTime::MIN).single().unwrap_or(now)
    }

    fn period_start(
        now: DateTime<Local>,
        period: usize,
        horizon: Horizon,
        next_day: bool,
    ) -> DateTime<Local> {
        let mut start = Self::day_start(now);
        if next_day {
            start += TimeDelta::days(1);
        }
        #[expect(clippy::cast_possible_truncation)]
        let step = TimeDelta::milliseconds((horizon.dt().0.0 * 3_600_000.0).round() as i64);
        start + step * i32::try_from(period).unwrap_or(i32::MAX)
    }

    /// Hourly rates repeated for every sub-period of the hour.
    fn per_period(hourly: &[KilowattHourRate], horizon: Horizon) -> Vec<KilowattHourRate> {
        hourly
            .iter()
            .flat_map(|rate| std::iter::repeat_n(*rate, horizon.periods_per_hour))
            .collect()
    }

    /// Hourly energies split evenly over the sub-periods of the hour.
    #[expect(clippy::cast_precision_loss)]
    fn per_period_energy(hourly: &[KilowattHours], horizon: Horizon) -> Vec<KilowattHours> {
        hourly
            .iter()
            .flat_map(|energy| {
                std::iter::repeat_n(
                    *energy / horizon.periods_per_hour as f64,
                    horizon.periods_per_hour,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        api::{prices::StaticPrices, sim::SimulatedDevice},
        core::{
            flows::Flows,
            period::EnergyData,
            settings::tests::test_settings,
        },
        quantity::percent::Percent,
    };

    fn arbitrage_prices() -> Vec<f64> {
        vec![
            0.1, 0.1, 0.1, 0.2, 0.3, 0.4, //
            0.6, 0.8, 1.0, 1.5, 1.8, 2.0, //
            1.5, 1.2, 1.0, 0.8, 0.6, 0.4, //
            0.4, 0.5, 0.6, 0.3, 0.2, 0.1,
        ]
    }

    fn raw_price_settings() -> Settings {
        let mut settings = test_settings();
        settings.price.use_actual_price = false;
        settings.battery.cycle_cost = KilowattHourRate::from(0.1);
        settings
    }

    fn at_hour(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 12, hour, 0, 0).unwrap()
    }

    fn recorded(
        period: usize,
        soe_start: f64,
        soe_end: f64,
        charged: f64,
        discharged: f64,
        solar: f64,
        buy_price: f64,
    ) -> PeriodData {
        let energy = EnergyData::from_meters(
            KilowattHours::from(solar),
            KilowattHours::from(0.5),
            KilowattHours::from(charged),
            KilowattHours::from(discharged),
            KilowattHours::from(soe_start),
            KilowattHours::from(soe_end),
            None,
            None,
        );
        PeriodData {
            period,
            timestamp: at_hour(u32::try_from(period).unwrap_or(0)),
            data_source: DataSource::Actual,
            energy,
            economic: EconomicData {
                buy_price: KilowattHourRate::from(buy_price),
                sell_price: KilowattHourRate::from(buy_price * 0.4),
                ..EconomicData::default()
            },
            decision: DecisionData::default(),
        }
    }

    #[test]
    fn test_empty_history_basis_is_cycle_cost() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let manager = SystemManager::new(raw_price_settings(), &device, &prices);
        let basis = manager.initial_cost_basis(10, KilowattHourRate::from(0.1));
        assert_eq!(basis, KilowattHourRate::from(0.1));
    }

    /// Pre-existing overnight energy is valued at the cycle cost and blended with the
    /// day's charges.
    #[test]
    fn test_basis_includes_preexisting_energy() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        let cycle = 0.5;

        manager.history.record_period(0, recorded(0, 4.2, 4.2, 0.0, 0.0, 0.0, 1.0)).unwrap();
        manager.history.record_period(8, recorded(8, 4.2, 4.8, 0.6, 0.0, 0.0, 2.5)).unwrap();

        let basis = manager.initial_cost_basis(9, KilowattHourRate::from(cycle));
        let expected = (4.2 * cycle + 0.6 * (2.5 + cycle)) / 4.8;
        approx::assert_abs_diff_eq!(basis.0.0, expected, epsilon = 1e-9);
        assert!(basis < KilowattHourRate::from(1.0));
    }

    /// Discharging removes energy at the running average and keeps the average intact.
    #[test]
    fn test_basis_preserved_across_discharge() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        let cycle = 0.5;

        manager.history.record_period(0, recorded(0, 10.0, 10.0, 0.0, 0.0, 0.0, 1.0)).unwrap();
        manager.history.record_period(4, recorded(4, 10.0, 12.0, 2.0, 0.0, 0.0, 3.0)).unwrap();
        manager.history.record_period(8, recorded(8, 12.0, 8.0, 0.0, 4.0, 0.0, 1.0)).unwrap();

        let basis = manager.initial_cost_basis(12, KilowattHourRate::from(cycle));
        let expected = (10.0 * cycle + 2.0 * (3.0 + cycle)) / 12.0;
        approx::assert_abs_diff_eq!(basis.0.0, expected, epsilon = 1e-9);
    }

    /// Solar charges only carry the wear cost, not the buy price.
    #[test]
    fn test_basis_solar_charge_is_cheap() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        let cycle = 0.5;

        manager.history.record_period(0, recorded(0, 5.0, 5.0, 0.0, 0.0, 0.0, 1.0)).unwrap();
        manager.history.record_period(20, recorded(20, 5.0, 8.0, 3.0, 0.0, 5.0, 2.0)).unwrap();

        let basis = manager.initial_cost_basis(23, KilowattHourRate::from(cycle));
        approx::assert_abs_diff_eq!(basis.0.0, cycle, epsilon = 1e-9);
    }

    /// Draining the battery resets the running average to the conservative default.
    #[test]
    fn test_basis_resets_when_drained() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);

        manager.history.record_period(0, recorded(0, 5.0, 5.0, 0.0, 0.0, 0.0, 1.0)).unwrap();
        manager.history.record_period(4, recorded(4, 5.0, 7.0, 2.0, 0.0, 0.0, 3.0)).unwrap();
        manager.history.record_period(8, recorded(8, 7.0, 0.05, 0.0, 6.95, 0.0, 1.0)).unwrap();

        let basis = manager.initial_cost_basis(12, KilowattHourRate::from(0.5));
        assert_eq!(basis, KilowattHourRate::from(0.5));
    }

    #[test]
    fn test_tick_deploys_then_leaves_hardware_alone() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        manager.start().unwrap();

        assert!(manager.tick(at_hour(1), false, false));
        let segment_writes_after_first = device.segment_writes();
        assert!(segment_writes_after_first > 0, "the first tick must push a schedule");
        assert!(manager.latest_schedule().is_some());
        assert!(!device.read_time_segments().unwrap().is_empty());

        // Nothing changed; the second tick must not touch the TOU table again:
        let setting_writes_before = device.setting_writes();
        assert!(manager.tick(at_hour(1), false, false));
        assert_eq!(device.segment_writes(), segment_writes_after_first);
        // The running hour's settings are still re-asserted every tick:
        assert!(device.setting_writes() > setting_writes_before);
    }

    #[test]
    fn test_deployed_segments_never_overlap() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        manager.start().unwrap();
        assert!(manager.tick(at_hour(0), false, false));

        let segments = device.read_time_segments().unwrap();
        let enabled: Vec<_> = segments.iter().filter(|segment| segment.enabled).collect();
        for (index, first) in enabled.iter().enumerate() {
            for second in &enabled[index + 1..] {
                assert!(
                    !first.overlaps(second),
                    "deployed segments overlap: {first:?} vs {second:?}",
                );
            }
        }
    }

    #[test]
    fn test_failed_price_fetch_keeps_previous_plan() {
        let device = SimulatedDevice::with_idle_profiles();
        let good_prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &good_prices);
        manager.start().unwrap();
        assert!(manager.tick(at_hour(1), false, false));
        let deployed_before: Vec<_> =
            manager.deployed_plan().unwrap().intervals.clone();

        let broken_prices = StaticPrices::new(Vec::new());
        let mut broken = SystemManager::new(raw_price_settings(), &device, &broken_prices);
        broken.start().unwrap();
        let segment_writes_before = device.segment_writes();
        assert!(!broken.tick(at_hour(2), false, false));
        assert_eq!(device.segment_writes(), segment_writes_before);
        assert_eq!(manager.deployed_plan().unwrap().intervals, deployed_before);
    }

    #[test]
    fn test_prepare_next_day_needs_tomorrow_prices() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        manager.start().unwrap();
        // No tomorrow prices published yet:
        assert!(!manager.tick(at_hour(22), true, false));

        let mut prices_with_tomorrow = StaticPrices::new(arbitrage_prices());
        prices_with_tomorrow.tomorrow = Some(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices_with_tomorrow);
        manager.start().unwrap();
        assert!(manager.tick(at_hour(22), true, false));
        assert_eq!(
            manager.latest_schedule().unwrap().scenario,
            ScheduleScenario::NextDay,
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        manager.start().unwrap();
        let setting_writes = device.setting_writes();
        let segment_writes = device.segment_writes();
        assert!(manager.tick(at_hour(1), false, true));
        assert_eq!(device.setting_writes(), setting_writes);
        assert_eq!(device.segment_writes(), segment_writes);
        // The optimization result is still stored for inspection:
        assert!(manager.latest_schedule().is_some());
    }

    #[test]
    fn test_recorded_period_flows_through_daily_view() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        manager.start().unwrap();

        // Let the simulated household run through two hours:
        device.advance_hour(0);
        assert!(manager.tick(at_hour(1), false, false));
        device.advance_hour(1);
        assert!(manager.tick(at_hour(2), false, false));

        assert!(manager.history().stored_count() >= 1);
        let view = manager.daily_view(at_hour(2)).unwrap();
        assert_eq!(view.periods.len(), 24);
        assert_eq!(view.actual_count + view.predicted_count, 24);
        assert!(view.actual_count >= 1);
    }

    #[test]
    fn test_new_day_resets_stores() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        manager.start().unwrap();
        device.advance_hour(0);
        assert!(manager.tick(at_hour(1), false, false));
        assert!(manager.history().stored_count() > 0);

        let next_day = at_hour(1) + TimeDelta::days(1);
        assert!(manager.tick(next_day, false, false));
        // The day rolled over before anything new was recorded for period 0:
        assert!(manager.history().stored_count() <= 1);
    }

    /// The decomposition invariants hold for every predicted period the manager stores.
    #[test]
    fn test_stored_prediction_flow_invariants() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        manager.start().unwrap();
        assert!(manager.tick(at_hour(0), false, false));

        let stored = manager.latest_schedule().unwrap();
        for period in &stored.result.periods {
            let Flows {
                solar_to_home,
                solar_to_battery,
                solar_to_grid,
                grid_to_home,
                grid_to_battery,
                battery_to_home,
                battery_to_grid,
            } = period.energy.flows;
            let energy = &period.energy;
            approx::assert_abs_diff_eq!(
                (solar_to_home + solar_to_battery + solar_to_grid).0.0,
                energy.solar_production.0.0,
                epsilon = 1e-6,
            );
            approx::assert_abs_diff_eq!(
                (battery_to_home + battery_to_grid).0.0,
                energy.battery_discharged.0.0,
                epsilon = 1e-6,
            );
            approx::assert_abs_diff_eq!(
                (solar_to_home + battery_to_home + grid_to_home).0.0,
                energy.home_consumption.0.0,
                epsilon = 1e-6,
            );
            approx::assert_abs_diff_eq!(
                (solar_to_battery + grid_to_battery).0.0,
                energy.battery_charged.0.0,
                epsilon = 1e-6,
            );
        }
    }

    #[test]
    fn test_settings_are_updatable_between_ticks() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut manager = SystemManager::new(raw_price_settings(), &device, &prices);
        let patch: SettingsPatch = serde_json::from_str(
            r#"{"battery": {"charging_power_rate": 80.0}}"#,
        )
        .unwrap();
        manager.update_settings(patch).unwrap();
        assert_eq!(manager.settings().battery.charging_power_rate, Percent(80.0));
    }

    #[test]
    fn test_period_of_quarter_hours() {
        let device = SimulatedDevice::with_idle_profiles();
        let prices = StaticPrices::new(arbitrage_prices());
        let mut settings = raw_price_settings();
        settings.horizon = Horizon::new(24, 4).unwrap();
        let manager = SystemManager::new(settings, &device, &prices);
        let noon_forty = Local.with_ymd_and_hms(2026, 3, 12, 12, 40, 0).unwrap();
        assert_eq!(manager.period_of(noon_forty), 12 * 4 + 2);
        assert_eq!(manager.period_of(at_hour(0)), 0);
        assert_eq!(manager.period_of(Local.with_ymd_and_hms(2026, 3, 12, 23, 59, 0).unwrap()), 95);
    }
}

