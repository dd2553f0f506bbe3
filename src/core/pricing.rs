use crate::{core::settings::PriceSettings, quantity::rate::KilowattHourRate};

/// Turns raw spot prices into what the household actually pays and receives.
///
/// Input length follows the day: 23, 24, or 25 entries around DST transitions, times the
/// period resolution. The model is length-agnostic; callers align the arrays to the
/// horizon.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct PriceModel {
    settings: PriceSettings,
}

impl PriceModel {
    pub const fn new(settings: PriceSettings) -> Self {
        Self { settings }
    }

    pub fn buy_prices(&self, spot: &[KilowattHourRate]) -> Vec<KilowattHourRate> {
        spot.iter()
            .map(|price| {
                if self.settings.use_actual_price {
                    (*price + self.settings.markup) * self.settings.vat_multiplier
                        + self.settings.additional_costs
                } else {
                    *price
                }
            })
            .collect()
    }

    pub fn sell_prices(&self, spot: &[KilowattHourRate]) -> Vec<KilowattHourRate> {
        spot.iter()
            .map(|price| {
                if self.settings.use_actual_price {
                    *price + self.settings.tax_reduction
                } else {
                    *price
                }
            })
            .collect()
    }

    /// Wear cost as the optimizer should see it: VAT applies to the battery the same way
    /// it applies to the energy bought through it.
    pub fn effective_cycle_cost(&self, cycle_cost: KilowattHourRate) -> KilowattHourRate {
        if self.settings.use_actual_price {
            cycle_cost * self.settings.vat_multiplier
        } else {
            cycle_cost
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::core::settings::tests::test_price_settings;

    #[test]
    fn test_buy_price_composition() {
        let model = PriceModel::new(test_price_settings());
        let buy = model.buy_prices(&[KilowattHourRate::from(1.0)]);
        assert_abs_diff_eq!(buy[0].0.0, (1.0 + 0.08) * 1.25 + 1.03, epsilon = 1e-9);
    }

    #[test]
    fn test_sell_price_composition() {
        let model = PriceModel::new(test_price_settings());
        let sell = model.sell_prices(&[KilowattHourRate::from(1.0)]);
        assert_abs_diff_eq!(sell[0].0.0, 1.0 + 0.6518, epsilon = 1e-9);
    }

    #[test]
    fn test_raw_prices_pass_through() {
        let mut settings = test_price_settings();
        settings.use_actual_price = false;
        let model = PriceModel::new(settings);
        let spot = vec![KilowattHourRate::from(0.42); 23];
        assert_eq!(model.buy_prices(&spot), spot);
        assert_eq!(model.sell_prices(&spot), spot);
        assert_eq!(
            model.effective_cycle_cost(KilowattHourRate::from(0.4)),
            KilowattHourRate::from(0.4),
        );
    }

    #[test]
    fn test_cycle_cost_carries_vat() {
        let model = PriceModel::new(test_price_settings());
        assert_abs_diff_eq!(
            model.effective_cycle_cost(KilowattHourRate::from(0.4)).0.0,
            0.5,
            epsilon = 1e-9,
        );
    }

    #[test]
    fn test_dst_lengths_accepted() {
        let model = PriceModel::new(test_price_settings());
        for length in [23, 24, 25] {
            let spot = vec![KilowattHourRate::from(0.5); length];
            assert_eq!(model.buy_prices(&spot).len(), length);
            assert_eq!(model.sell_prices(&spot).len(), length);
        }
    }
}
