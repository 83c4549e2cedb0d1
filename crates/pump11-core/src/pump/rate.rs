//! Flow rate bounding
//!
//! The pump refuses rates outside the limits it derives from the syringe
//! diameter. Requested rates are clamped into those limits first, and the
//! adjustment is reported instead of failing.

use serde::Serialize;
use tracing::warn;

use crate::protocol::ProtocolError;
use crate::units::{Quantity, UnitConverter, FLOW_RATE_UNIT};

/// Relative distance to a limit below which a rate is sent as the limit itself
const LIMIT_TOLERANCE: f64 = 1e-9;

/// Numbers as the pump parses them: shortest exact decimal, never exponent form
pub(crate) fn device_number(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

/// Rate argument in the pump's short unit syntax, e.g. "1.2 n/m" for nl/min
fn wire_rate(rate: &Quantity) -> Option<String> {
    let (volume, time) = rate.unit.split_once('/')?;
    let volume = match volume {
        "ml" | "mL" => "m",
        "ul" | "uL" | "µl" | "µL" | "μl" | "μL" => "u",
        "nl" | "nL" => "n",
        "pl" | "pL" => "p",
        _ => return None,
    };
    let time = match time {
        "h" | "hr" => "h",
        "min" | "m" => "m",
        "s" | "sec" => "s",
        _ => return None,
    };
    Some(format!("{} {}/{}", device_number(rate.value), volume, time))
}

/// Rate limits reported by the pump, in ml/min
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimits {
    pub lower: f64,
    pub upper: f64,
    /// Both ends as the pump wrote them
    #[serde(skip)]
    reported: Option<(Quantity, Quantity)>,
}

impl RateLimits {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower,
            upper,
            reported: None,
        }
    }

    /// Parse a limits reply body, e.g. "1.20457 nl/min to 104.115 ml/min".
    ///
    /// The two ends usually come in different units.
    pub fn parse(body: &str, units: &dyn UnitConverter) -> Result<Self, ProtocolError> {
        let (lower, upper) = body
            .split_once(" to ")
            .ok_or_else(|| ProtocolError::MalformedReply(body.to_string()))?;

        let parse = |text: &str| {
            units
                .parse_quantity(text, FLOW_RATE_UNIT)
                .map_err(|e| ProtocolError::MalformedReply(format!("{}: {}", body, e)))
        };
        let mut limits = Self::new(parse(lower)?, parse(upper)?);
        if let (Ok(lower), Ok(upper)) = (lower.parse::<Quantity>(), upper.parse::<Quantity>()) {
            limits.reported = Some((lower, upper));
        }

        if limits.lower > limits.upper {
            return Err(ProtocolError::MalformedReply(format!(
                "rate limits out of order: {}",
                body
            )));
        }
        Ok(limits)
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.lower && rate <= self.upper
    }

    /// Argument for a rate command setting `rate` ml/min.
    ///
    /// The limits went through a unit conversion, so a rate at (or within
    /// rounding of) a limit is sent as the limit the pump reported, in its own
    /// unit. Anything else is sent in ml/min at full precision.
    pub fn wire_argument(&self, rate: f64) -> String {
        let reported = self.reported.as_ref();
        let at_limit = if rate <= self.lower * (1.0 + LIMIT_TOLERANCE) {
            reported.map(|(lower, _)| lower)
        } else if rate >= self.upper * (1.0 - LIMIT_TOLERANCE) {
            reported.map(|(_, upper)| upper)
        } else {
            None
        };

        at_limit
            .and_then(wire_rate)
            .unwrap_or_else(|| format!("{} m/m", device_number(rate)))
    }
}

/// Which limit a requested rate was moved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Clamp {
    /// Raised to the lower limit
    ToLower,
    /// Lowered to the upper limit
    ToUpper,
}

/// Rate to send to the pump, in ml/min
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundedRate {
    pub value: f64,
    /// Requested rate converted to ml/min
    pub requested: f64,
    pub clamp: Option<Clamp>,
}

impl BoundedRate {
    pub fn was_clamped(&self) -> bool {
        self.clamp.is_some()
    }

    pub fn quantity(&self) -> Quantity {
        Quantity::flow_rate(self.value)
    }
}

/// Clamps requested flow rates into device limits
pub struct RateBounder<'a> {
    units: &'a dyn UnitConverter,
}

impl<'a> RateBounder<'a> {
    pub fn new(units: &'a dyn UnitConverter) -> Self {
        Self { units }
    }

    /// Convert `requested` to ml/min and clamp it into `limits`
    pub fn bound(
        &self,
        requested: &Quantity,
        limits: &RateLimits,
    ) -> Result<BoundedRate, ProtocolError> {
        let rate = self.units.convert(requested, FLOW_RATE_UNIT)?;
        if !rate.is_finite() || rate < 0.0 {
            return Err(ProtocolError::Configuration(format!(
                "invalid flow rate {}",
                requested
            )));
        }

        let (value, clamp) = if rate < limits.lower {
            (limits.lower, Some(Clamp::ToLower))
        } else if rate > limits.upper {
            (limits.upper, Some(Clamp::ToUpper))
        } else {
            (rate, None)
        };

        if clamp.is_some() {
            warn!(
                requested = %requested,
                lower = limits.lower,
                upper = limits.upper,
                "Requested rate outside pump limits, using {} {} instead",
                value,
                FLOW_RATE_UNIT
            );
        }

        Ok(BoundedRate {
            value,
            requested: rate,
            clamp,
        })
    }
}
