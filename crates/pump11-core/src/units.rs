//! Physical Quantities
//!
//! The pump reports and accepts values with units ("0.2 ml/min", "14.43 mm",
//! "1.2 nl/min to 104 ml/min"). The protocol engine only needs two things from
//! a unit library, so it consumes them through the [`UnitConverter`] trait:
//! - `parse_quantity`: text with a unit → number in a target unit
//! - `format_quantity`: number + unit → text
//!
//! [`SiUnits`] is the built-in implementation covering the dimensions a
//! syringe pump deals with:
//! - Volume: l, ml, ul, nl, pl
//! - Length: m, cm, mm, um
//! - Time: h, min, s
//! - Flow rate: any volume over any time (ml/min, ul/h, ...)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Canonical flow rate unit used on the wire
pub const FLOW_RATE_UNIT: &str = "ml/min";
/// Canonical volume unit used on the wire
pub const VOLUME_UNIT: &str = "ml";
/// Canonical length unit used for syringe diameters
pub const LENGTH_UNIT: &str = "mm";

/// Errors from parsing or converting quantities
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("Cannot parse quantity from {0:?}")]
    Malformed(String),

    #[error("Unknown unit {0:?}")]
    UnknownUnit(String),

    #[error("Cannot convert {from} to {to}")]
    Incompatible { from: String, to: String },
}

/// A number together with its unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Magnitude
    pub value: f64,
    /// Unit symbol, e.g. "ml/min"
    pub unit: String,
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    /// Flow rate in ml/min
    pub fn flow_rate(value: f64) -> Self {
        Self::new(value, FLOW_RATE_UNIT)
    }

    /// Volume in ml
    pub fn volume(value: f64) -> Self {
        Self::new(value, VOLUME_UNIT)
    }

    /// Length in mm
    pub fn length(value: f64) -> Self {
        Self::new(value, LENGTH_UNIT)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

impl FromStr for Quantity {
    type Err = UnitError;

    /// Split "0.2 ml/min" into its magnitude and unit, without checking the unit
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = quantity_regex()
            .captures(s)
            .ok_or_else(|| UnitError::Malformed(s.to_string()))?;
        let value = caps[1]
            .parse::<f64>()
            .map_err(|_| UnitError::Malformed(s.to_string()))?;
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        Ok(Quantity::new(value, unit))
    }
}

/// Unit-aware parse/format capability consumed by the protocol engine
pub trait UnitConverter: Send + Sync {
    /// Parse `text` (number + unit) and express it in `target_unit`
    fn parse_quantity(&self, text: &str, target_unit: &str) -> Result<f64, UnitError>;

    /// Render `value` in `unit` as text
    fn format_quantity(&self, value: f64, unit: &str) -> String;

    /// Express a quantity in `target_unit`
    fn convert(&self, quantity: &Quantity, target_unit: &str) -> Result<f64, UnitError> {
        self.parse_quantity(
            &self.format_quantity(quantity.value, &quantity.unit),
            target_unit,
        )
    }
}

fn quantity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*(\S*)\s*$")
            .expect("quantity pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Volume,
    Length,
    Time,
    FlowRate,
    Dimensionless,
}

/// Factor to milliliters
fn volume_factor(unit: &str) -> Option<f64> {
    match unit {
        "l" | "L" => Some(1000.0),
        "ml" | "mL" => Some(1.0),
        "ul" | "uL" | "µl" | "µL" | "μl" | "μL" => Some(1e-3),
        "nl" | "nL" => Some(1e-6),
        "pl" | "pL" => Some(1e-9),
        _ => None,
    }
}

/// Factor to millimeters
fn length_factor(unit: &str) -> Option<f64> {
    match unit {
        "m" => Some(1000.0),
        "cm" => Some(10.0),
        "mm" => Some(1.0),
        "um" | "µm" | "μm" => Some(1e-3),
        _ => None,
    }
}

/// Factor to minutes
fn time_factor(unit: &str) -> Option<f64> {
    match unit {
        "h" | "hr" | "hour" => Some(60.0),
        "min" | "m" => Some(1.0),
        "s" | "sec" => Some(1.0 / 60.0),
        _ => None,
    }
}

/// Resolve a unit symbol to its dimension and factor to the canonical unit
fn resolve(unit: &str) -> Result<(Dimension, f64), UnitError> {
    let unit = unit.trim();
    if unit.is_empty() || unit == "%" {
        return Ok((Dimension::Dimensionless, 1.0));
    }

    if let Some((num, den)) = unit.split_once('/') {
        let vol = volume_factor(num).ok_or_else(|| UnitError::UnknownUnit(unit.to_string()))?;
        let time = time_factor(den).ok_or_else(|| UnitError::UnknownUnit(unit.to_string()))?;
        return Ok((Dimension::FlowRate, vol / time));
    }

    if let Some(f) = volume_factor(unit) {
        return Ok((Dimension::Volume, f));
    }
    if let Some(f) = length_factor(unit) {
        return Ok((Dimension::Length, f));
    }
    if let Some(f) = time_factor(unit) {
        return Ok((Dimension::Time, f));
    }
    Err(UnitError::UnknownUnit(unit.to_string()))
}

/// Built-in converter for volume, length, time and flow rate units
#[derive(Debug, Clone, Copy, Default)]
pub struct SiUnits;

impl SiUnits {
    /// Convert `value` from one unit to another
    pub fn convert_value(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
        let (from_dim, from_factor) = resolve(from)?;
        let (to_dim, to_factor) = resolve(to)?;
        if from_dim != to_dim {
            return Err(UnitError::Incompatible {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(value * from_factor / to_factor)
    }
}

impl UnitConverter for SiUnits {
    fn parse_quantity(&self, text: &str, target_unit: &str) -> Result<f64, UnitError> {
        let quantity: Quantity = text.parse()?;
        if quantity.unit.is_empty() {
            // Bare numbers are already in the target unit
            resolve(target_unit)?;
            return Ok(quantity.value);
        }
        self.convert_value(quantity.value, &quantity.unit, target_unit)
    }

    fn format_quantity(&self, value: f64, unit: &str) -> String {
        format!("{} {}", value, unit)
    }
}
