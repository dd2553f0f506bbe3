use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::quantity::power::Kilowatts;

/// Phase current in amperes.
#[derive(
    Clone,
    Copy,
    Deserialize,
    PartialEq,
    PartialOrd,
    Serialize,
    derive_more::From,
    derive_more::FromStr,
)]
#[must_use]
pub struct Amperes(pub f64);

impl Amperes {
    pub const ZERO: Self = Self(0.0);

    /// Single-phase power at the given line voltage.
    pub fn at_voltage(self, volts: f64) -> Kilowatts {
        Kilowatts::from_watts(self.0 * volts)
    }
}

impl Display for Amperes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} A", self.0)
    }
}

impl Debug for Amperes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}A", self.0)
    }
}
