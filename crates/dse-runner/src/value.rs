use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DseError;

/// A parameter value or bound: a plain integer or a quantity string such as
/// `"32kB"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Quantity(String),
}

impl ParamValue {
    /// Coerces bound text the way the plan grammar does: all-digit text is an
    /// integer, anything else stays a quantity string.
    pub fn coerce(text: &str) -> Self {
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(v) = text.parse::<i64>() {
                return ParamValue::Int(v);
            }
        }
        ParamValue::Quantity(text.to_string())
    }

    pub fn is_int(&self) -> bool {
        matches!(self, ParamValue::Int(_))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Quantity(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::coerce(v)
    }
}

/// Magnitude plus unit suffix, e.g. `2kB` or `4GB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantity {
    pub magnitude: u64,
    pub unit: String,
}

impl Quantity {
    pub fn new(magnitude: u64, unit: impl Into<String>) -> Self {
        Self {
            magnitude,
            unit: unit.into(),
        }
    }
}

impl Quantity {
    /// Power of two the unit scales by (`kB` is 10, `MB` is 20). `None` for
    /// units outside the byte-size family.
    pub fn unit_shift(&self) -> Option<u32> {
        match self.unit.as_str() {
            "B" => Some(0),
            "kB" | "KB" | "KiB" => Some(10),
            "MB" | "MiB" => Some(20),
            "GB" | "GiB" => Some(30),
            "TB" | "TiB" => Some(40),
            _ => None,
        }
    }
}

impl FromStr for Quantity {
    type Err = DseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| DseError::InvalidQuantity(s.to_string()))?;
        let (digits, unit) = s.split_at(split);
        if digits.is_empty() || !unit.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DseError::InvalidQuantity(s.to_string()));
        }
        let magnitude = digits
            .parse::<u64>()
            .map_err(|_| DseError::InvalidQuantity(s.to_string()))?;
        Ok(Quantity::new(magnitude, unit))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit)
    }
}
