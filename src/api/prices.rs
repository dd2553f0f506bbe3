use std::{fs, path::PathBuf};

use chrono::{DateTime, Days, Local, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::{prelude::*, quantity::rate::KilowattHourRate};

/// One raw spot price as published by the market, before markup and VAT.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct SpotPrice {
    pub starts_at: DateTime<Local>,
    pub price: KilowattHourRate,
}

/// Day-ahead market feed. A day has 23, 24, or 25 hourly entries around DST
/// transitions; tomorrow's prices only exist after the daily auction.
pub trait PriceSource {
    fn today_prices(&self) -> Result<Vec<SpotPrice>>;
    fn tomorrow_prices(&self) -> Result<Vec<SpotPrice>>;
}

fn spread_over_day(prices: &[f64], day_start: DateTime<Local>) -> Vec<SpotPrice> {
    prices
        .iter()
        .enumerate()
        .map(|(hour, price)| SpotPrice {
            starts_at: day_start + TimeDelta::hours(hour.try_into().unwrap_or(i64::MAX)),
            price: KilowattHourRate::from(*price),
        })
        .collect()
}

fn local_midnight() -> Result<DateTime<Local>> {
    Local::now()
        .with_time(NaiveTime::MIN)
        .single()
        .context("midnight is ambiguous in this timezone")
}

/// Price feed read from a JSON file, e.g. one maintained by a fetch cron job:
/// `{"today": [0.31, …], "tomorrow": [0.28, …]}`.
#[must_use]
pub struct JsonPriceFile {
    path: PathBuf,
}

#[derive(Deserialize)]
struct PriceFileContents {
    today: Vec<f64>,
    #[serde(default)]
    tomorrow: Option<Vec<f64>>,
}

impl JsonPriceFile {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<PriceFileContents> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read prices from {:?}", self.path))?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed price file {:?}", self.path))
    }
}

impl PriceSource for JsonPriceFile {
    fn today_prices(&self) -> Result<Vec<SpotPrice>> {
        let contents = self.read()?;
        ensure!(!contents.today.is_empty(), "the price file has no prices for today");
        Ok(spread_over_day(&contents.today, local_midnight()?))
    }

    fn tomorrow_prices(&self) -> Result<Vec<SpotPrice>> {
        let contents = self.read()?;
        let tomorrow = contents
            .tomorrow
            .filter(|prices| !prices.is_empty())
            .context("tomorrow's prices are not yet available")?;
        let day_start = local_midnight()?
            .checked_add_days(Days::new(1))
            .context("tomorrow does not exist in this calendar")?;
        Ok(spread_over_day(&tomorrow, day_start))
    }
}

/// Fixed in-memory price feed.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct StaticPrices {
    pub today: Vec<f64>,
    pub tomorrow: Option<Vec<f64>>,
}

impl StaticPrices {
    pub fn new(today: Vec<f64>) -> Self {
        Self { today, tomorrow: None }
    }
}

impl PriceSource for StaticPrices {
    fn today_prices(&self) -> Result<Vec<SpotPrice>> {
        ensure!(!self.today.is_empty(), "no prices configured for today");
        Ok(spread_over_day(&self.today, local_midnight()?))
    }

    fn tomorrow_prices(&self) -> Result<Vec<SpotPrice>> {
        let tomorrow =
            self.tomorrow.as_ref().context("tomorrow's prices are not yet available")?;
        let day_start = local_midnight()?
            .checked_add_days(Days::new(1))
            .context("tomorrow does not exist in this calendar")?;
        Ok(spread_over_day(tomorrow, day_start))
    }
}
