//! Pump session
//!
//! A [`PumpSession`] drives one pump at one address. Sessions for pumps on the
//! same cable share a [`Channel`] through the [`ChannelRegistry`]; a session
//! only holds a weak reference, so closing the registry closes the port.
//!
//! Motion commands need [`PumpSession::initialize`] first: it sets the syringe
//! up, finds out whether the pump can withdraw and zeroes its counters.

use serde::Serialize;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::info::PumpInfo;
use super::rate::{device_number, BoundedRate, RateBounder, RateLimits};
use crate::config::PumpConfig;
use crate::protocol::{
    parse_all, Channel, ChannelRegistry, Command, CommandBuilder, CommandCatalog,
    CommandTemplate, MotionStatus, ProtocolError, Reply, MAX_ADDRESS, STATUS_POLL_INTERVAL_MS,
};
use crate::units::{Quantity, SiUnits, UnitConverter, FLOW_RATE_UNIT, LENGTH_UNIT, VOLUME_UNIT};

/// Syringe diameters the pump accepts, in mm
pub const DIAMETER_RANGE_MM: std::ops::RangeInclusive<f64> = 1.0..=33.0;

/// Session-local view of the pump, never persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PumpState {
    /// Pump reported it can withdraw
    pub withdraw_enabled: bool,
    /// Liquid in the syringe, ml; tracked by the volume budget
    pub stored_volume: f64,
    /// Target volume last set through this session, ml
    pub target_volume: Option<f64>,
}

/// Result of a run request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Started,
    /// The pump was already moving; nothing was sent
    AlreadyMoving,
}

/// One pump on a (possibly shared) serial channel
pub struct PumpSession {
    config: PumpConfig,
    address: Option<u8>,
    channel: Weak<Channel>,
    units: Arc<dyn UnitConverter>,
    state: PumpState,
    initialized: bool,
}

impl PumpSession {
    /// Session for the pump described by `config`, using the built-in units
    pub fn new(registry: &ChannelRegistry, config: PumpConfig) -> Result<Self, ProtocolError> {
        Self::with_converter(registry, config, Arc::new(SiUnits))
    }

    /// Session using `units` to parse and format quantities
    pub fn with_converter(
        registry: &ChannelRegistry,
        config: PumpConfig,
        units: Arc<dyn UnitConverter>,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let channel = registry.acquire(&config.connection)?;
        Ok(Self::attach(&channel, config, units))
    }

    /// Session on an already open channel
    pub fn attach(
        channel: &Arc<Channel>,
        config: PumpConfig,
        units: Arc<dyn UnitConverter>,
    ) -> Self {
        Self {
            address: config.address,
            config,
            channel: Arc::downgrade(channel),
            units,
            state: PumpState::default(),
            initialized: false,
        }
    }

    /// Display name, "Pump <port>:<address>" unless configured
    pub fn name(&self) -> String {
        match self.address {
            Some(address) => self.config.display_name(address),
            None => self
                .config
                .name
                .clone()
                .unwrap_or_else(|| format!("Pump {}:?", self.config.connection.port)),
        }
    }

    /// Pump address, once known
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    pub fn port(&self) -> &str {
        &self.config.connection.port
    }

    pub fn state(&self) -> &PumpState {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn set_stored_volume(&mut self, volume: f64) {
        self.state.stored_volume = volume;
    }

    fn channel(&self) -> Result<Arc<Channel>, ProtocolError> {
        self.channel
            .upgrade()
            .ok_or_else(|| ProtocolError::ChannelClosed(self.port().to_string()))
    }

    fn require_address(&self) -> Result<u8, ProtocolError> {
        self.address.ok_or(ProtocolError::NotInitialized)
    }

    fn ensure_initialized(&self) -> Result<(), ProtocolError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ProtocolError::NotInitialized)
        }
    }

    /// Guard for operations needing withdraw capabilities
    fn ensure_withdraw_enabled(&self) -> Result<(), ProtocolError> {
        self.ensure_initialized()?;
        if self.state.withdraw_enabled {
            Ok(())
        } else {
            Err(ProtocolError::Capability(format!(
                "{} is infuse-only and cannot withdraw",
                self.name()
            )))
        }
    }

    fn command(&self, template: CommandTemplate, argument: &str) -> Result<Command, ProtocolError> {
        CommandBuilder::new(self.require_address()?).command_with(template, argument)
    }

    /// Send a command, returning the checked reply
    fn send(&self, template: CommandTemplate, argument: &str) -> Result<Reply, ProtocolError> {
        let command = self.command(template, argument)?;
        self.channel()?.exchange(&command)
    }

    /// Send an argument-less command, returning its first body line
    fn query(&self, template: CommandTemplate) -> Result<String, ProtocolError> {
        Ok(self.send(template, "")?.first_body().to_string())
    }

    fn parse_body(&self, body: &str, unit: &str) -> Result<Quantity, ProtocolError> {
        let value = self
            .units
            .parse_quantity(body, unit)
            .map_err(|e| ProtocolError::MalformedReply(format!("{}: {}", body, e)))?;
        Ok(Quantity::new(value, unit))
    }

    fn query_quantity(
        &self,
        template: CommandTemplate,
        unit: &str,
    ) -> Result<Quantity, ProtocolError> {
        let body = self.query(template)?;
        self.parse_body(&body, unit)
    }

    /// Quantity from configuration text, in `unit`
    fn configured(
        &self,
        text: Option<&str>,
        what: &str,
        unit: &str,
    ) -> Result<Quantity, ProtocolError> {
        let text = text.ok_or_else(|| {
            ProtocolError::Configuration(format!("the syringe {} must be given explicitly", what))
        })?;
        Ok(Quantity::new(self.units.parse_quantity(text, unit)?, unit))
    }

    /// Connect to the pump and set it up.
    ///
    /// Autodetects the address when none is configured, sets syringe diameter
    /// and volume, checks whether the pump can withdraw and clears all volume
    /// counters.
    pub fn initialize(&mut self) -> Result<(), ProtocolError> {
        let channel = self.channel()?;

        if self.address.is_none() {
            let address = channel.autodetect_address()?;
            if address >= MAX_ADDRESS {
                return Err(ProtocolError::InvalidAddress(address));
            }
            debug!(port = %self.port(), address, "Address autodetected");
            self.address = Some(address);
        }

        let diameter =
            self.configured(self.config.diameter.as_deref(), "diameter", LENGTH_UNIT)?;
        let volume = self.configured(
            self.config.syringe_volume.as_deref(),
            "volume",
            VOLUME_UNIT,
        )?;
        self.set_syringe_diameter(&diameter)?;
        self.set_syringe_volume(&volume)?;

        let address = self.require_address()?;
        info!(
            "Connected to pump '{}' on port {}:{}",
            self.name(),
            self.port(),
            address
        );

        let pump_info = self.pump_info()?;
        self.state.withdraw_enabled = !pump_info.infuse_only;
        debug!(
            pump = %self.name(),
            description = %pump_info.pump_description,
            withdraw = self.state.withdraw_enabled,
            "Pump capabilities detected"
        );

        self.clear_volumes()?;
        self.initialized = true;
        Ok(())
    }

    /// Firmware version, e.g. "11 ELITE I/W Single 3.0.4"
    pub fn version(&self) -> Result<String, ProtocolError> {
        self.query(CommandCatalog::GET_VERSION)
    }

    /// Motion status from the prompt of an empty command.
    ///
    /// Unlike other commands this reports a stall as a status instead of
    /// failing, so a caller can see the pump waits for acknowledgement.
    pub fn status(&self) -> Result<MotionStatus, ProtocolError> {
        let command = self.command(CommandCatalog::EMPTY_MESSAGE, "")?;
        let lines = self.channel()?.write_and_read(&command)?;
        parse_all(&lines, command.address())?
            .status()
            .ok_or(ProtocolError::NoResponse {
                address: command.address(),
            })
    }

    pub fn is_moving(&self) -> Result<bool, ProtocolError> {
        Ok(self.status()?.is_moving())
    }

    pub fn is_idle(&self) -> Result<bool, ProtocolError> {
        Ok(!self.is_moving()?)
    }

    /// Block until the pump stops moving
    pub fn wait_until_idle(&self) -> Result<(), ProtocolError> {
        while self.is_moving()? {
            thread::sleep(Duration::from_millis(STATUS_POLL_INTERVAL_MS));
        }
        Ok(())
    }

    fn start(
        &self,
        template: CommandTemplate,
        direction: &str,
    ) -> Result<RunOutcome, ProtocolError> {
        self.ensure_initialized()?;
        if self.is_moving()? {
            warn!(pump = %self.name(), "Cannot start pump: already moving!");
            return Ok(RunOutcome::AlreadyMoving);
        }

        self.send(template, "")?;
        info!(pump = %self.name(), "Pump movement started ({})", direction);
        Ok(RunOutcome::Started)
    }

    /// Run in the direction used last
    pub fn run(&self) -> Result<RunOutcome, ProtocolError> {
        self.start(CommandCatalog::RUN, "direction unspecified")
    }

    /// Run opposite to the direction used last
    pub fn inverse_run(&self) -> Result<RunOutcome, ProtocolError> {
        self.start(CommandCatalog::REVERSE_RUN, "reverse direction")
    }

    pub fn infuse_run(&self) -> Result<RunOutcome, ProtocolError> {
        self.start(CommandCatalog::INFUSE, "infuse")
    }

    pub fn withdraw_run(&self) -> Result<RunOutcome, ProtocolError> {
        self.ensure_withdraw_enabled()?;
        self.start(CommandCatalog::WITHDRAW, "withdraw")
    }

    pub fn stop(&self) -> Result<(), ProtocolError> {
        self.send(CommandCatalog::STOP, "")?;
        info!(pump = %self.name(), "Pump stopped");
        Ok(())
    }

    /// Current rate limits; they follow the syringe diameter.
    ///
    /// Infuse and withdraw limits are the same.
    pub fn rate_limits(&self) -> Result<RateLimits, ProtocolError> {
        let body = self.query(CommandCatalog::GET_INFUSE_RATE_LIMITS)?;
        RateLimits::parse(&body, self.units.as_ref())
    }

    fn set_rate(
        &self,
        template: CommandTemplate,
        rate: &Quantity,
    ) -> Result<BoundedRate, ProtocolError> {
        let limits = self.rate_limits()?;
        let bounded = RateBounder::new(self.units.as_ref()).bound(rate, &limits)?;
        self.send(template, &limits.wire_argument(bounded.value))?;
        Ok(bounded)
    }

    pub fn get_infusion_rate(&self) -> Result<Quantity, ProtocolError> {
        self.query_quantity(CommandCatalog::GET_INFUSE_RATE, FLOW_RATE_UNIT)
    }

    /// Set the infusion rate, clamped into the pump limits
    pub fn set_infusion_rate(&self, rate: &Quantity) -> Result<BoundedRate, ProtocolError> {
        self.set_rate(CommandCatalog::SET_INFUSE_RATE, rate)
    }

    pub fn get_withdrawing_rate(&self) -> Result<Quantity, ProtocolError> {
        self.ensure_withdraw_enabled()?;
        self.query_quantity(CommandCatalog::GET_WITHDRAW_RATE, FLOW_RATE_UNIT)
    }

    /// Set the withdraw rate, clamped into the pump limits
    pub fn set_withdrawing_rate(&self, rate: &Quantity) -> Result<BoundedRate, ProtocolError> {
        self.ensure_withdraw_enabled()?;
        self.set_rate(CommandCatalog::SET_WITHDRAW_RATE, rate)
    }

    /// Rate the plunger is moving at, `None` when the pump is not moving
    pub fn get_current_flow_rate(&self) -> Result<Option<Quantity>, ProtocolError> {
        if !self.is_moving()? {
            warn!(pump = %self.name(), "Pump is not moving, cannot provide moving rate!");
            return Ok(None);
        }
        self.query_quantity(CommandCatalog::CURRENT_MOVING_RATE, FLOW_RATE_UNIT)
            .map(Some)
    }

    pub fn get_infused_volume(&self) -> Result<Quantity, ProtocolError> {
        self.query_quantity(CommandCatalog::INFUSED_VOLUME, VOLUME_UNIT)
    }

    /// Volume withdrawn since the counter was last cleared
    pub fn get_withdrawn_volume(&self) -> Result<Quantity, ProtocolError> {
        self.ensure_withdraw_enabled()?;
        self.query_quantity(CommandCatalog::WITHDRAWN_VOLUME, VOLUME_UNIT)
    }

    pub fn clear_infused_volume(&self) -> Result<(), ProtocolError> {
        self.send(CommandCatalog::CLEAR_INFUSED_VOLUME, "")?;
        Ok(())
    }

    pub fn clear_withdrawn_volume(&self) -> Result<(), ProtocolError> {
        self.ensure_withdraw_enabled()?;
        self.send(CommandCatalog::CLEAR_WITHDRAWN_VOLUME, "")?;
        Ok(())
    }

    pub fn clear_infused_withdrawn_volume(&self) -> Result<(), ProtocolError> {
        self.ensure_withdraw_enabled()?;
        self.send(CommandCatalog::CLEAR_INFUSED_WITHDRAWN_VOLUME, "")?;
        Ok(())
    }

    /// Clear the target and every volume counter the pump has
    pub fn clear_volumes(&mut self) -> Result<(), ProtocolError> {
        self.clear_target_volume()?;
        // Counter commands are checked against the pump capabilities directly:
        // this also runs during initialization.
        if self.state.withdraw_enabled {
            self.send(CommandCatalog::CLEAR_INFUSED_WITHDRAWN_VOLUME, "")?;
        } else {
            self.send(CommandCatalog::CLEAR_INFUSED_VOLUME, "")?;
        }
        Ok(())
    }

    /// Force in percent. Manufacturer suggestions:
    /// - stainless steel: 100%
    /// - plastic: 50% up to 5 ml, else 100%
    /// - glass/glass: 30% up to 20 ml, else 50%
    /// - glass/plastic: 30% up to 250 ul, 50% up to 5 ml, else 100%
    pub fn get_force(&self) -> Result<u32, ProtocolError> {
        let body = self.query(CommandCatalog::GET_FORCE)?;
        body.trim()
            .trim_end_matches('%')
            .trim()
            .parse::<u32>()
            .map_err(|_| ProtocolError::MalformedReply(body.clone()))
    }

    pub fn set_force(&self, percent: u32) -> Result<(), ProtocolError> {
        self.send(CommandCatalog::SET_FORCE, &percent.to_string())?;
        Ok(())
    }

    pub fn get_syringe_diameter(&self) -> Result<Quantity, ProtocolError> {
        self.query_quantity(CommandCatalog::GET_DIAMETER, LENGTH_UNIT)
    }

    /// Set the syringe inner diameter, 1 to 33 mm
    pub fn set_syringe_diameter(&self, diameter: &Quantity) -> Result<(), ProtocolError> {
        let mm = self.units.convert(diameter, LENGTH_UNIT)?;
        if !DIAMETER_RANGE_MM.contains(&mm) {
            return Err(ProtocolError::Configuration(format!(
                "syringe diameter {} outside the accepted range of {}-{} mm",
                diameter,
                DIAMETER_RANGE_MM.start(),
                DIAMETER_RANGE_MM.end()
            )));
        }
        self.send(CommandCatalog::SET_DIAMETER, &device_number(mm))?;
        Ok(())
    }

    pub fn get_syringe_volume(&self) -> Result<Quantity, ProtocolError> {
        self.query_quantity(CommandCatalog::GET_SYRINGE_VOLUME, VOLUME_UNIT)
    }

    pub fn set_syringe_volume(&self, volume: &Quantity) -> Result<(), ProtocolError> {
        let ml = self.units.convert(volume, VOLUME_UNIT)?;
        if !(ml > 0.0 && ml.is_finite()) {
            return Err(ProtocolError::Configuration(format!(
                "invalid syringe volume {}",
                volume
            )));
        }
        self.send(
            CommandCatalog::SET_SYRINGE_VOLUME,
            &format!("{} m", device_number(ml)),
        )?;
        Ok(())
    }

    /// Target volume, `None` if no target is set
    pub fn get_target_volume(&self) -> Result<Option<Quantity>, ProtocolError> {
        let body = self.query(CommandCatalog::GET_TARGET_VOLUME)?;
        if body.contains("Target volume not set") {
            return Ok(None);
        }
        self.parse_body(&body, VOLUME_UNIT).map(Some)
    }

    /// Set the target volume; zero clears it
    pub fn set_target_volume(&mut self, volume: &Quantity) -> Result<(), ProtocolError> {
        let ml = self.units.convert(volume, VOLUME_UNIT)?;
        if ml == 0.0 {
            return self.clear_target_volume();
        }
        if !(ml > 0.0 && ml.is_finite()) {
            return Err(ProtocolError::Configuration(format!(
                "invalid target volume {}",
                volume
            )));
        }

        self.send(
            CommandCatalog::SET_TARGET_VOLUME,
            &format!("{} m", device_number(ml)),
        )?;
        self.state.target_volume = Some(ml);
        Ok(())
    }

    pub fn clear_target_volume(&mut self) -> Result<(), ProtocolError> {
        self.send(CommandCatalog::CLEAR_TARGET_VOLUME, "")?;
        self.state.target_volume = None;
        Ok(())
    }

    /// Infuse ramp settings as reported, e.g. "Ramp not set up."
    pub fn get_infuse_ramp(&self) -> Result<String, ProtocolError> {
        self.query(CommandCatalog::GET_INFUSE_RAMP)
    }

    pub fn get_withdraw_ramp(&self) -> Result<String, ProtocolError> {
        self.ensure_withdraw_enabled()?;
        self.query(CommandCatalog::GET_WITHDRAW_RAMP)
    }

    /// Pump type and capabilities from its metrics report
    pub fn pump_info(&self) -> Result<PumpInfo, ProtocolError> {
        let reply = self.send(CommandCatalog::METRICS, "")?;
        let bodies: Vec<&str> = reply.bodies().collect();
        PumpInfo::from_metrics(&bodies)
    }
}
