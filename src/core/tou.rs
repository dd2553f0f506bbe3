use std::fmt::{Display, Formatter};

use bon::Builder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        period::StrategicIntent,
        settings::{BatterySettings, Horizon},
    },
    prelude::*,
    quantity::{Quantity, power::Kilowatts},
};

/// The inverter stores at most this many TOU segments.
pub const MAX_SEGMENTS: usize = 9;

const SIGNIFICANT_ACTION: Kilowatts = Quantity(ordered_float::OrderedFloat(0.1));

/// Inverter battery operating mode. Load-first is the hardware default and is expressed
/// by the *absence* of an enabled segment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[must_use]
pub enum BatteryMode {
    LoadFirst,
    BatteryFirst,
    GridFirst,
}

impl BatteryMode {
    /// The mode a strategic intent asks the hardware for.
    pub const fn from_intent(intent: StrategicIntent) -> Self {
        match intent {
            StrategicIntent::GridCharging | StrategicIntent::SolarStorage => Self::BatteryFirst,
            StrategicIntent::ExportArbitrage => Self::GridFirst,
            StrategicIntent::LoadSupport | StrategicIntent::Idle => Self::LoadFirst,
        }
    }

    /// Wire form used by the device protocol.
    #[must_use]
    pub const fn as_device_str(self) -> &'static str {
        match self {
            Self::LoadFirst => "load-first",
            Self::BatteryFirst => "battery-first",
            Self::GridFirst => "grid-first",
        }
    }

    pub fn from_device_str(text: &str) -> Result<Self> {
        match text {
            "load-first" => Ok(Self::LoadFirst),
            "battery-first" => Ok(Self::BatteryFirst),
            "grid-first" => Ok(Self::GridFirst),
            _ => bail!("unknown battery mode: {text:?}"),
        }
    }
}

impl Display for BatteryMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_device_str())
    }
}

/// One inverter TOU segment, hour-aligned.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct TouInterval {
    pub segment_id: u8,
    pub mode: BatteryMode,

    /// First hour covered, inclusive.
    pub start_hour: u8,

    /// Last hour covered, inclusive (the device end minute is `:59`).
    pub end_hour: u8,

    pub enabled: bool,
}

impl TouInterval {
    #[must_use]
    pub fn start_time(&self) -> String {
        format!("{:02}:00", self.start_hour.min(23))
    }

    #[must_use]
    pub fn end_time(&self) -> String {
        format!("{:02}:59", self.end_hour.min(23))
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start_hour <= other.end_hour && self.end_hour >= other.start_hour
    }

    /// Same position and meaning on the device, ignoring the slot number.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.start_hour == other.start_hour
            && self.end_hour == other.end_hour
            && self.mode == other.mode
            && self.enabled == other.enabled
    }
}

/// What the device is told for one wall-clock hour.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct HourSettings {
    pub hour: usize,
    pub intent: StrategicIntent,
    pub mode: BatteryMode,
    pub grid_charge: bool,
    pub charge_rate: u8,
    pub discharge_rate: u8,
    pub battery_action: Kilowatts,
}

impl HourSettings {
    fn idle(hour: usize) -> Self {
        Self {
            hour,
            intent: StrategicIntent::Idle,
            mode: BatteryMode::LoadFirst,
            grid_charge: false,
            charge_rate: 0,
            discharge_rate: 0,
            battery_action: Kilowatts::ZERO,
        }
    }
}

/// A full translated schedule: the segment list for the inverter TOU table plus the
/// per-hour settings written at the top of each hour.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[must_use]
pub struct TouPlan {
    pub intervals: Vec<TouInterval>,
    pub hourly: Vec<HourSettings>,
}

impl TouPlan {
    /// Rebuild a plan from what the inverter reports, used as the deployed snapshot
    /// after a restart. Hourly settings are unknown until the next optimization.
    pub fn from_deployed_segments(segments: Vec<TouInterval>, horizon: Horizon) -> Self {
        let mut intervals = segments;
        intervals.sort_by_key(|interval| interval.segment_id);
        let hourly = (0..horizon.hours).map(HourSettings::idle).collect();
        Self { intervals, hourly }
    }

    #[must_use]
    pub fn hour_settings(&self, hour: usize) -> Option<&HourSettings> {
        self.hourly.get(hour)
    }
}

/// Pure translation from a labeled action sequence to the hardware schedule.
///
/// `intents` and `actions` cover the optimized tail of the day, starting at
/// `current_period`. Earlier periods are taken from the previously deployed plan so
/// that an intraday update never flips the hour that is currently executing.
#[derive(Builder)]
#[must_use]
pub struct TouTranslator<'a> {
    intents: &'a [StrategicIntent],
    actions: &'a [Kilowatts],
    current_period: usize,
    horizon: Horizon,
    deployed: Option<&'a TouPlan>,
    battery: BatterySettings,
}

impl TouTranslator<'_> {
    pub fn translate(self) -> TouPlan {
        let hourly: Vec<HourSettings> =
            (0..self.horizon.hours).map(|hour| self.hour_settings(hour)).collect();
        let intervals = self.build_intervals(&hourly);
        TouPlan { intervals, hourly }
    }

    /// Collapse the sub-periods of one hour into a single intent and action.
    fn hour_settings(&self, hour: usize) -> HourSettings {
        let current_hour = self.horizon.hour_of(self.current_period);
        if hour < current_hour {
            // The hour is entirely in the past; keep whatever was deployed for it:
            return self
                .deployed
                .and_then(|plan| plan.hour_settings(hour))
                .copied()
                .unwrap_or_else(|| HourSettings::idle(hour));
        }

        let first = self.horizon.first_period_of(hour);
        let intents = (0..self.horizon.periods_per_hour)
            .map(|offset| self.period_intent(first + offset));
        let intent = Self::majority_intent(intents);

        let actions: Vec<Kilowatts> = (0..self.horizon.periods_per_hour)
            .map(|offset| self.period_action(first + offset))
            .collect();
        #[expect(clippy::cast_precision_loss)]
        let action = actions.iter().copied().sum::<Kilowatts>() / actions.len() as f64;

        let (grid_charge, charge_rate, discharge_rate) = self.power_rates(intent, action);
        HourSettings {
            hour,
            intent,
            mode: BatteryMode::from_intent(intent),
            grid_charge,
            charge_rate,
            discharge_rate,
            battery_action: action,
        }
    }

    /// Intent of a single period: deployed history for the past, the fresh
    /// optimization for the present and future.
    fn period_intent(&self, period: usize) -> StrategicIntent {
        if period < self.current_period {
            let hour = self.horizon.hour_of(period);
            self.deployed
                .and_then(|plan| plan.hour_settings(hour))
                .map_or(StrategicIntent::Idle, |settings| settings.intent)
        } else {
            self.intents
                .get(period - self.current_period)
                .copied()
                .unwrap_or(StrategicIntent::Idle)
        }
    }

    fn period_action(&self, period: usize) -> Kilowatts {
        if period < self.current_period {
            let hour = self.horizon.hour_of(period);
            self.deployed
                .and_then(|plan| plan.hour_settings(hour))
                .map_or(Kilowatts::ZERO, |settings| settings.battery_action)
        } else {
            self.actions
                .get(period - self.current_period)
                .copied()
                .unwrap_or(Kilowatts::ZERO)
        }
    }

    /// Majority vote with a fixed pecking order on ties.
    fn majority_intent(intents: impl Iterator<Item = StrategicIntent>) -> StrategicIntent {
        intents
            .counts()
            .into_iter()
            .max_by_key(|(intent, count)| (*count, intent.priority()))
            .map_or(StrategicIntent::Idle, |(intent, _)| intent)
    }

    /// Hardware rate percentages for one hour.
    fn power_rates(&self, intent: StrategicIntent, action: Kilowatts) -> (bool, u8, u8) {
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let action_ratio = |limit: Kilowatts| -> u8 {
            ((action.abs() / limit).0 * 100.0).round().clamp(5.0, 100.0) as u8
        };
        match intent {
            StrategicIntent::GridCharging => {
                let rate = if action > SIGNIFICANT_ACTION {
                    action_ratio(self.battery.max_charge_power).max(20)
                } else {
                    20
                };
                (true, rate, 0)
            }
            StrategicIntent::SolarStorage => (false, 100, 0),
            StrategicIntent::LoadSupport => {
                let rate = if -action > SIGNIFICANT_ACTION {
                    action_ratio(self.battery.max_discharge_power)
                } else {
                    0
                };
                (false, 0, rate)
            }
            StrategicIntent::ExportArbitrage => {
                let rate = if -action > SIGNIFICANT_ACTION {
                    action_ratio(self.battery.max_discharge_power).max(50)
                } else {
                    50
                };
                (false, 0, rate)
            }
            StrategicIntent::Idle => (false, 0, 0),
        }
    }

    /// Compress per-hour modes into the inverter segment table.
    fn build_intervals(&self, hourly: &[HourSettings]) -> Vec<TouInterval> {
        let current_hour = self.horizon.hour_of(self.current_period);

        // Segments that already ran to completion are carried over untouched:
        let mut intervals: Vec<TouInterval> = self
            .deployed
            .map(|plan| {
                plan.intervals
                    .iter()
                    .filter(|interval| {
                        interval.enabled && usize::from(interval.end_hour) < current_hour
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        for (mode, hours) in &hourly[current_hour..]
            .iter()
            .chunk_by(|settings| BatteryMode::from_intent(settings.intent))
        {
            if mode == BatteryMode::LoadFirst {
                // Load-first is the default; no segment needed.
                continue;
            }
            let hours: Vec<&HourSettings> = hours.collect();
            let segment_id = Self::next_free_id(&intervals);
            #[expect(clippy::cast_possible_truncation)]
            intervals.push(TouInterval {
                segment_id,
                mode,
                start_hour: hours[0].hour as u8,
                end_hour: hours[hours.len() - 1].hour as u8,
                enabled: true,
            });
        }

        if intervals.len() > MAX_SEGMENTS {
            warn!(
                dropped = intervals.len() - MAX_SEGMENTS,
                "the schedule needs more TOU segments than the inverter has, truncating",
            );
            intervals.truncate(MAX_SEGMENTS);
        }
        intervals.sort_by_key(|interval| interval.start_hour);
        intervals
    }

    /// Lowest slot number not taken by a carried-over segment.
    fn next_free_id(intervals: &[TouInterval]) -> u8 {
        (1..).find(|id| !intervals.iter().any(|interval| interval.segment_id == *id)).unwrap_or(1)
    }
}

/// The hardware writes needed to go from `current` to `new`, affecting only segments
/// from `from_hour` onward. Disables come first so that no two enabled segments ever
/// overlap on the device, not even transiently.
#[must_use]
pub fn diff_segments(
    current: &[TouInterval],
    new: &[TouInterval],
    from_hour: usize,
) -> Vec<TouInterval> {
    let relevant = |interval: &TouInterval| {
        usize::from(interval.start_hour) >= from_hour || usize::from(interval.end_hour) >= from_hour
    };

    let mut to_disable: Vec<TouInterval> = Vec::new();
    for interval in current.iter().filter(|interval| relevant(interval)) {
        if !new.iter().any(|candidate| candidate.matches(interval)) {
            to_disable.push(TouInterval { enabled: false, ..*interval });
        }
    }

    let to_update: Vec<TouInterval> = new
        .iter()
        .filter(|interval| relevant(interval))
        .filter(|interval| !current.iter().any(|existing| existing.matches(interval)))
        .copied()
        .collect();

    // An updated segment must never land on top of a still-enabled old one:
    for update in &to_update {
        for existing in current {
            if existing.enabled
                && existing.overlaps(update)
                && !to_disable.iter().any(|disabled| disabled.segment_id == existing.segment_id)
            {
                to_disable.push(TouInterval { enabled: false, ..*existing });
            }
        }
    }

    to_disable.into_iter().chain(to_update).collect()
}

/// Whether two deployed schedules disagree anywhere at or after `from_hour`.
#[must_use]
pub fn segments_differ(
    current: &[TouInterval],
    new: &[TouInterval],
    from_hour: usize,
) -> Option<String> {
    let relevant_enabled = |intervals: &[TouInterval]| -> Vec<TouInterval> {
        intervals
            .iter()
            .filter(|interval| {
                interval.enabled
                    && (usize::from(interval.start_hour) >= from_hour
                        || usize::from(interval.end_hour) >= from_hour)
            })
            .copied()
            .sorted_by_key(|interval| interval.start_hour)
            .collect()
    };

    let current = relevant_enabled(current);
    let new = relevant_enabled(new);
    if current.len() != new.len() {
        return Some(format!(
            "different number of active segments ({} vs {})",
            current.len(),
            new.len(),
        ));
    }
    for (existing, candidate) in current.iter().zip(&new) {
        if !existing.matches(candidate) {
            return Some(format!(
                "segment {}-{} {} became {}-{} {}",
                existing.start_time(),
                existing.end_time(),
                existing.mode,
                candidate.start_time(),
                candidate.end_time(),
                candidate.mode,
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::tests::test_battery_settings;

    fn translate(
        intents: &[StrategicIntent],
        actions: &[Kilowatts],
        current_period: usize,
        horizon: Horizon,
        deployed: Option<&TouPlan>,
    ) -> TouPlan {
        TouTranslator::builder()
            .intents(intents)
            .actions(actions)
            .current_period(current_period)
            .horizon(horizon)
            .maybe_deployed(deployed)
            .battery(test_battery_settings())
            .build()
            .translate()
    }

    fn full_day(intent: StrategicIntent) -> Vec<StrategicIntent> {
        vec![intent; 24]
    }

    #[test]
    fn test_load_first_day_needs_no_segments() {
        let plan = translate(
            &full_day(StrategicIntent::Idle),
            &vec![Kilowatts::ZERO; 24],
            0,
            Horizon::default(),
            None,
        );
        assert!(plan.intervals.is_empty());
        assert_eq!(plan.hourly.len(), 24);
        assert!(plan.hourly.iter().all(|settings| settings.mode == BatteryMode::LoadFirst));
    }

    #[test]
    fn test_segments_compress_runs_and_stay_ordered() {
        let mut intents = full_day(StrategicIntent::Idle);
        for hour in 2..5 {
            intents[hour] = StrategicIntent::GridCharging;
        }
        for hour in 9..12 {
            intents[hour] = StrategicIntent::ExportArbitrage;
        }
        for hour in 13..15 {
            intents[hour] = StrategicIntent::SolarStorage;
        }
        let mut actions = vec![Kilowatts::ZERO; 24];
        for hour in 2..5 {
            actions[hour] = Kilowatts::from(10.0);
        }
        for hour in 9..12 {
            actions[hour] = Kilowatts::from(-12.0);
        }
        for hour in 13..15 {
            actions[hour] = Kilowatts::from(3.0);
        }

        let plan = translate(&intents, &actions, 0, Horizon::default(), None);
        assert_eq!(plan.intervals.len(), 3);
        assert_eq!(
            plan.intervals
                .iter()
                .map(|interval| (interval.start_hour, interval.end_hour, interval.mode))
                .collect::<Vec<_>>(),
            vec![
                (2, 4, BatteryMode::BatteryFirst),
                (9, 11, BatteryMode::GridFirst),
                (13, 14, BatteryMode::BatteryFirst),
            ],
        );
        // Enabled segments are pairwise non-overlapping and chronological:
        for pair in plan.intervals.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]));
            assert!(pair[0].start_hour < pair[1].start_hour);
        }
    }

    #[test]
    fn test_hardware_rate_floors() {
        let mut intents = full_day(StrategicIntent::Idle);
        intents[1] = StrategicIntent::GridCharging;
        intents[2] = StrategicIntent::SolarStorage;
        intents[3] = StrategicIntent::LoadSupport;
        intents[4] = StrategicIntent::ExportArbitrage;
        let mut actions = vec![Kilowatts::ZERO; 24];
        actions[1] = Kilowatts::from(1.5); // 10 % of 15 kW, floored to 20 %
        actions[2] = Kilowatts::from(3.0);
        actions[3] = Kilowatts::from(-7.5); // 50 % of 15 kW
        actions[4] = Kilowatts::from(-3.0); // 20 %, floored to 50 %

        let plan = translate(&intents, &actions, 0, Horizon::default(), None);
        let grid_charging = plan.hourly[1];
        assert!(grid_charging.grid_charge);
        assert_eq!(grid_charging.charge_rate, 20);
        assert_eq!(grid_charging.discharge_rate, 0);

        let solar_storage = plan.hourly[2];
        assert!(!solar_storage.grid_charge);
        assert_eq!(solar_storage.charge_rate, 100);

        let load_support = plan.hourly[3];
        assert_eq!(load_support.discharge_rate, 50);
        assert_eq!(load_support.charge_rate, 0);

        let export = plan.hourly[4];
        assert_eq!(export.discharge_rate, 50);
        assert_eq!(export.mode, BatteryMode::GridFirst);

        let idle = plan.hourly[5];
        assert_eq!((idle.charge_rate, idle.discharge_rate), (0, 0));
        assert!(!idle.grid_charge);
    }

    #[test]
    fn test_quarterly_majority_and_tie_break() {
        let horizon = Horizon::new(24, 4).unwrap();
        let mut intents = vec![StrategicIntent::Idle; 96];
        // Hour 0: three solar-storage quarters, one idle, majority wins:
        intents[0] = StrategicIntent::SolarStorage;
        intents[1] = StrategicIntent::SolarStorage;
        intents[2] = StrategicIntent::SolarStorage;
        // Hour 1: two grid-charging, two load-support, priority breaks the tie:
        intents[4] = StrategicIntent::GridCharging;
        intents[5] = StrategicIntent::LoadSupport;
        intents[6] = StrategicIntent::GridCharging;
        intents[7] = StrategicIntent::LoadSupport;
        let actions = vec![Kilowatts::ZERO; 96];

        let plan = translate(&intents, &actions, 0, horizon, None);
        assert_eq!(plan.hourly[0].intent, StrategicIntent::SolarStorage);
        assert_eq!(plan.hourly[1].intent, StrategicIntent::GridCharging);
    }

    /// An intraday update must not flip the currently executing hour just because its
    /// past quarters are no longer part of the fresh optimization.
    #[test]
    fn test_no_mid_hour_flip() {
        let horizon = Horizon::new(24, 4).unwrap();

        // Deployed plan: hour 0 was grid charging.
        let deployed = translate(
            &{
                let mut intents = vec![StrategicIntent::Idle; 96];
                for quarter in 0..4 {
                    intents[quarter] = StrategicIntent::GridCharging;
                }
                intents
            },
            &vec![Kilowatts::ZERO; 96],
            0,
            horizon,
            None,
        );
        assert_eq!(deployed.hourly[0].intent, StrategicIntent::GridCharging);

        // Fresh optimization from quarter 2 on sees only idle quarters:
        let remaining = vec![StrategicIntent::Idle; 94];
        let actions = vec![Kilowatts::ZERO; 94];
        let plan = translate(&remaining, &actions, 2, horizon, Some(&deployed));

        // Two deployed grid-charging quarters tie with two idle ones; priority keeps
        // the hour on grid charging:
        assert_eq!(plan.hourly[0].intent, StrategicIntent::GridCharging);
        assert_eq!(plan.hourly[1].intent, StrategicIntent::Idle);
    }

    #[test]
    fn test_truncates_to_hardware_limit() {
        // Alternate hour-by-hour so every non-default hour becomes its own segment:
        let mut intents = full_day(StrategicIntent::Idle);
        for hour in (0..24).step_by(2) {
            intents[hour] = StrategicIntent::GridCharging;
        }
        let plan = translate(&intents, &vec![Kilowatts::ZERO; 24], 0, Horizon::default(), None);
        assert_eq!(plan.intervals.len(), MAX_SEGMENTS);
    }

    #[test]
    fn test_diff_identity_is_empty() {
        let mut intents = full_day(StrategicIntent::Idle);
        for hour in 2..6 {
            intents[hour] = StrategicIntent::GridCharging;
        }
        let plan = translate(&intents, &vec![Kilowatts::ZERO; 24], 0, Horizon::default(), None);
        assert!(diff_segments(&plan.intervals, &plan.intervals, 0).is_empty());
        assert!(segments_differ(&plan.intervals, &plan.intervals, 0).is_none());
    }

    #[test]
    fn test_diff_disables_before_enabling() {
        let current = vec![TouInterval {
            segment_id: 1,
            mode: BatteryMode::BatteryFirst,
            start_hour: 2,
            end_hour: 6,
            enabled: true,
        }];
        let new = vec![TouInterval {
            segment_id: 1,
            mode: BatteryMode::GridFirst,
            start_hour: 4,
            end_hour: 6,
            enabled: true,
        }];
        let writes = diff_segments(&current, &new, 3);
        assert_eq!(writes.len(), 2);
        assert!(!writes[0].enabled, "the overlapping segment must be disabled first");
        assert_eq!(writes[0].segment_id, 1);
        assert!(writes[1].enabled);
        assert_eq!(writes[1].mode, BatteryMode::GridFirst);
        assert!(segments_differ(&current, &new, 3).is_some());
    }

    #[test]
    fn test_diff_ignores_fully_past_segments() {
        let current = vec![TouInterval {
            segment_id: 1,
            mode: BatteryMode::BatteryFirst,
            start_hour: 0,
            end_hour: 3,
            enabled: true,
        }];
        // The new plan no longer mentions the morning segment, but it is already over:
        let writes = diff_segments(&current, &[], 5);
        assert!(writes.is_empty());
        assert!(segments_differ(&current, &[], 5).is_none());
    }

    #[test]
    fn test_device_mode_strings_round_trip() {
        for mode in [BatteryMode::LoadFirst, BatteryMode::BatteryFirst, BatteryMode::GridFirst] {
            assert_eq!(BatteryMode::from_device_str(mode.as_device_str()).unwrap(), mode);
        }
        assert!(BatteryMode::from_device_str("solar-first").is_err());
    }

    #[test]
    fn test_deployed_round_trip_is_identity() {
        let mut intents = full_day(StrategicIntent::Idle);
        for hour in 18..22 {
            intents[hour] = StrategicIntent::ExportArbitrage;
        }
        let mut actions = vec![Kilowatts::ZERO; 24];
        for hour in 18..22 {
            actions[hour] = Kilowatts::from(-10.0);
        }
        let plan = translate(&intents, &actions, 0, Horizon::default(), None);
        let snapshot =
            TouPlan::from_deployed_segments(plan.intervals.clone(), Horizon::default());
        assert_eq!(snapshot.intervals, plan.intervals);
    }
}
