//! # pump11 Core Library
//!
//! Command/response engine for Protocol11 syringe pumps (Harvard Apparatus
//! Elite 11 and compatible).
//!
//! This library provides:
//! - Command framing and reply parsing for the Protocol11 serial protocol
//! - Shared serial channels for daisy-chained pumps
//! - Pump sessions with capability detection and gated motion commands
//! - Unit-aware flow rate bounding against device limits
//! - A simulated pump for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use pump11_core::prelude::*;
//!
//! let registry = ChannelRegistry::new();
//! let config = PumpConfig::new(ConnectionSettings::new("/dev/ttyUSB0"), "14.43 mm", "10 ml");
//!
//! let mut pump = PumpSession::new(&registry, config)?;
//! pump.initialize()?;
//! pump.set_infusion_rate(&Quantity::new(0.5, "ml/min"))?;
//! pump.infuse_run()?;
//! pump.wait_until_idle()?;
//! ```

pub mod config;
pub mod demo;
pub mod protocol;
pub mod pump;
pub mod units;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConnectionSettings, PumpConfig};
    pub use crate::protocol::{
        Channel, ChannelRegistry, ErrorCategory, MotionStatus, ProtocolError,
    };
    pub use crate::pump::{BudgetedPump, PumpInfo, PumpSession, RunOutcome, VolumeBudget};
    pub use crate::units::{Quantity, SiUnits, UnitConverter};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
