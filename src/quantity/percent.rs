use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Percentage as the hardware reports and accepts it.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    PartialEq,
    PartialOrd,
    Serialize,
    derive_more::Add,
    derive_more::From,
    derive_more::FromStr,
    derive_more::Sub,
)]
#[must_use]
pub struct Percent(pub f64);

impl Percent {
    pub const ZERO: Self = Self(0.0);
    pub const HUNDRED: Self = Self(100.0);

    /// Dimensionless ratio, `100 % == 1.0`.
    #[must_use]
    pub const fn ratio(self) -> f64 {
        self.0 / 100.0
    }

    pub fn from_ratio(ratio: f64) -> Self {
        Self(ratio * 100.0)
    }

    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn into_u8(self) -> u8 {
        self.0.round().clamp(0.0, 100.0) as u8
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0.0 && self.0 <= 100.0
    }
}

impl From<u8> for Percent {
    fn from(percent: u8) -> Self {
        Self(f64::from(percent))
    }
}

impl Display for Percent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} %", self.0)
    }
}

impl Debug for Percent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}
