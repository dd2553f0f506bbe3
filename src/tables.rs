use comfy_table::{Attribute, Cell, CellAlignment, Color, Table, modifiers, presets};
use itertools::Itertools;

use crate::{
    core::{
        daily_view::DailyView,
        history::BalanceSummary,
        period::{DataSource, PeriodData, StrategicIntent},
        tou::{HourSettings, TouInterval},
    },
    quantity::{cost::Cost, rate::KilowattHourRate},
};

const fn intent_color(intent: StrategicIntent) -> Color {
    match intent {
        StrategicIntent::GridCharging => Color::Green,
        StrategicIntent::SolarStorage => Color::Cyan,
        StrategicIntent::LoadSupport => Color::DarkYellow,
        StrategicIntent::ExportArbitrage => Color::Red,
        StrategicIntent::Idle => Color::Reset,
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.enforce_styling();
    table
}

/// Per-period breakdown of an optimization result or a daily view.
pub fn build_periods_table(periods: &[PeriodData]) -> Table {
    let mean_buy: KilowattHourRate = if periods.is_empty() {
        KilowattHourRate::ZERO
    } else {
        periods.iter().map(|period| period.economic.buy_price).sum::<KilowattHourRate>()
            / periods.len() as f64
    };

    let mut table = new_table();
    table.set_header(vec![
        "Per", "Src", "Buy", "Sell", "Cons", "Solar", "SoE", "Action", "Intent", "Cost", "Save",
    ]);
    for period in periods {
        let source = match period.data_source {
            DataSource::Actual => Cell::new("act").fg(Color::Green),
            DataSource::Predicted => Cell::new("pred").add_attribute(Attribute::Dim),
        };
        table.add_row(vec![
            Cell::new(period.period),
            source,
            Cell::new(format!("{}", period.economic.buy_price)).fg(
                if period.economic.buy_price >= mean_buy { Color::Red } else { Color::Green },
            ),
            Cell::new(format!("{}", period.economic.sell_price)),
            Cell::new(format!("{}", period.energy.home_consumption))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{}", period.energy.solar_production))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{}", period.energy.battery_soe_end))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{}", period.decision.battery_action))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{}", period.decision.strategic_intent))
                .fg(intent_color(period.decision.strategic_intent)),
            Cell::new(format!("{}", period.economic.period_cost))
                .set_alignment(CellAlignment::Right)
                .fg(if period.economic.period_cost >= Cost::ONE_CENT {
                    Color::Red
                } else {
                    Color::Green
                }),
            Cell::new(format!("{}", period.economic.period_savings))
                .set_alignment(CellAlignment::Right)
                .fg(if period.economic.period_savings >= Cost::ZERO {
                    Color::Green
                } else {
                    Color::Red
                }),
        ]);
    }
    table
}

/// Day summary line under the daily view.
pub fn build_savings_table(view: &DailyView) -> Table {
    let mut table = new_table();
    table.set_header(vec!["", "Periods", "Savings"]);
    table.add_row(vec![
        Cell::new("Actual"),
        Cell::new(view.actual_count),
        Cell::new(format!("{}", view.actual_savings_so_far)).set_alignment(CellAlignment::Right),
    ]);
    table.add_row(vec![
        Cell::new("Predicted"),
        Cell::new(view.predicted_count),
        Cell::new(format!("{}", view.predicted_remaining_savings))
            .set_alignment(CellAlignment::Right),
    ]);
    table.add_row(vec![
        Cell::new("Total").add_attribute(Attribute::Bold),
        Cell::new(view.periods.len()),
        Cell::new(format!("{}", view.total_savings))
            .set_alignment(CellAlignment::Right)
            .add_attribute(Attribute::Bold),
    ]);
    table
}

pub fn build_segments_table(segments: &[TouInterval]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Segment", "Start", "End", "Mode", "Enabled"]);
    for segment in segments.iter().sorted_by_key(|segment| segment.segment_id) {
        table.add_row(vec![
            Cell::new(segment.segment_id),
            Cell::new(segment.start_time()),
            Cell::new(segment.end_time()),
            Cell::new(segment.mode.as_device_str()).fg(match segment.mode {
                crate::core::tou::BatteryMode::BatteryFirst => Color::Green,
                crate::core::tou::BatteryMode::GridFirst => Color::Red,
                crate::core::tou::BatteryMode::LoadFirst => Color::Reset,
            }),
            Cell::new(segment.enabled),
        ]);
    }
    table
}

pub fn build_hourly_settings_table(hourly: &[HourSettings]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        "Hour", "Intent", "Mode", "Grid charge", "Charge %", "Discharge %", "Action",
    ]);
    for settings in hourly {
        table.add_row(vec![
            Cell::new(format!("{:02}:00", settings.hour)),
            Cell::new(format!("{}", settings.intent)).fg(intent_color(settings.intent)),
            Cell::new(settings.mode.as_device_str()),
            Cell::new(settings.grid_charge),
            Cell::new(settings.charge_rate).set_alignment(CellAlignment::Right),
            Cell::new(settings.discharge_rate).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}", settings.battery_action)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn build_balance_table(summary: &BalanceSummary) -> Table {
    let mut table = new_table();
    table.set_header(vec!["", "Energy"]);
    table.add_row(vec![Cell::new("Solar production"), Cell::new(format!("{}", summary.solar_production))]);
    table.add_row(vec![Cell::new("Home consumption"), Cell::new(format!("{}", summary.home_consumption))]);
    table.add_row(vec![Cell::new("Grid imported"), Cell::new(format!("{}", summary.grid_imported))]);
    table.add_row(vec![Cell::new("Grid exported"), Cell::new(format!("{}", summary.grid_exported))]);
    table.add_row(vec![Cell::new("Battery charged"), Cell::new(format!("{}", summary.battery_charged))]);
    table.add_row(vec![Cell::new("Battery discharged"), Cell::new(format!("{}", summary.battery_discharged))]);
    table.add_row(vec![
        Cell::new("Self-consumed solar"),
        Cell::new(format!("{}", summary.self_consumed_solar)),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;
    use crate::{
        core::period::{DecisionData, EconomicData, EnergyData},
        quantity::{energy::KilowattHours, power::Kilowatts, time::Hours},
    };

    #[test]
    fn test_periods_table_renders() {
        let period = PeriodData {
            period: 3,
            timestamp: Local::now(),
            data_source: DataSource::Predicted,
            energy: EnergyData::from_action(
                Kilowatts::from(5.0),
                KilowattHours::from(2.0),
                KilowattHours::ZERO,
                KilowattHours::from(3.0),
                KilowattHours::from(7.85),
                Hours::from(1.0),
            ),
            economic: EconomicData::default(),
            decision: DecisionData {
                strategic_intent: StrategicIntent::GridCharging,
                battery_action: Kilowatts::from(5.0),
                cost_basis: KilowattHourRate::ZERO,
            },
        };
        let rendered = build_periods_table(&[period]).to_string();
        assert!(rendered.contains("GRID_CHARGING"));
    }
}
