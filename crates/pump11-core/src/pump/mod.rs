//! Pump control
//!
//! Session-level operations on top of the protocol engine: initialization,
//! capability detection, gated motion, rate bounding and volume budgeting.

mod budget;
mod info;
mod rate;
mod session;

pub use budget::{BudgetedPump, VolumeBudget};
pub use info::PumpInfo;
pub use rate::{BoundedRate, Clamp, RateBounder, RateLimits};
pub use session::{PumpSession, PumpState, RunOutcome, DIAMETER_RANGE_MM};
