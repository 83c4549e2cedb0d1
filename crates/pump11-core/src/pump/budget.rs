//! Volume budget
//!
//! Tracks how much liquid the syringe holds so that dosing requests the
//! syringe cannot satisfy are refused before anything moves. The pump itself
//! only knows volume counters since the last clear, not what is in the syringe.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::session::{PumpSession, RunOutcome};
use crate::protocol::ProtocolError;
use crate::units::{Quantity, UnitConverter, VOLUME_UNIT};

/// Syringe capacity and content, in ml
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeBudget {
    pub syringe_volume: f64,
    pub stored_volume: f64,
}

impl VolumeBudget {
    /// Budget for an empty syringe
    pub fn new(syringe_volume: f64) -> Self {
        Self {
            syringe_volume,
            stored_volume: 0.0,
        }
    }

    pub fn with_stored(mut self, stored_volume: f64) -> Self {
        self.stored_volume = stored_volume;
        self
    }

    /// Free space left in the syringe
    pub fn headroom(&self) -> f64 {
        self.syringe_volume - self.stored_volume
    }

    /// Doses are finite and positive; a zero target would leave the pump unbounded
    fn is_dose(volume: f64) -> bool {
        volume.is_finite() && volume > 0.0
    }

    pub fn can_infuse(&self, volume: f64) -> bool {
        Self::is_dose(volume) && self.stored_volume >= volume
    }

    pub fn can_withdraw(&self, volume: f64) -> bool {
        Self::is_dose(volume) && self.stored_volume + volume <= self.syringe_volume
    }

    fn check_dose(volume: f64) -> Result<(), ProtocolError> {
        if Self::is_dose(volume) {
            Ok(())
        } else {
            Err(ProtocolError::Capability(format!(
                "cannot dose {} ml: volume must be positive",
                volume
            )))
        }
    }

    /// Budget after infusing `volume`
    pub fn infuse(&self, volume: f64) -> Result<Self, ProtocolError> {
        Self::check_dose(volume)?;
        if !self.can_infuse(volume) {
            return Err(ProtocolError::Capability(format!(
                "cannot infuse {} ml: the syringe holds {} ml",
                volume, self.stored_volume
            )));
        }
        Ok(self.with_stored(self.stored_volume - volume))
    }

    /// Budget after withdrawing `volume`
    pub fn withdraw(&self, volume: f64) -> Result<Self, ProtocolError> {
        Self::check_dose(volume)?;
        if !self.can_withdraw(volume) {
            return Err(ProtocolError::Capability(format!(
                "cannot withdraw {} ml: {} ml left in a {} ml syringe",
                volume,
                self.headroom(),
                self.syringe_volume
            )));
        }
        Ok(self.with_stored(self.stored_volume + volume))
    }
}

/// A pump session that doses fixed volumes within its syringe budget
pub struct BudgetedPump {
    session: PumpSession,
    syringe_volume: f64,
}

impl BudgetedPump {
    /// Wrap an initialized session whose syringe holds `stored` to begin with
    pub fn new(
        mut session: PumpSession,
        syringe_volume: &Quantity,
        stored: &Quantity,
        units: &dyn UnitConverter,
    ) -> Result<Self, ProtocolError> {
        let syringe_volume = units.convert(syringe_volume, VOLUME_UNIT)?;
        let stored = units.convert(stored, VOLUME_UNIT)?;
        if !(syringe_volume > 0.0) || stored < 0.0 || stored > syringe_volume {
            return Err(ProtocolError::Configuration(format!(
                "stored volume {} ml does not fit a {} ml syringe",
                stored, syringe_volume
            )));
        }

        session.set_stored_volume(stored);
        Ok(Self {
            session,
            syringe_volume,
        })
    }

    pub fn session(&self) -> &PumpSession {
        &self.session
    }

    pub fn into_session(self) -> PumpSession {
        self.session
    }

    pub fn budget(&self) -> VolumeBudget {
        VolumeBudget::new(self.syringe_volume).with_stored(self.session.state().stored_volume)
    }

    /// Infuse `volume` ml: set it as target and start infusing
    pub fn infuse(&mut self, volume: f64) -> Result<RunOutcome, ProtocolError> {
        let after = self.budget().infuse(volume)?;
        self.dose(volume, after, Direction::Infuse)
    }

    /// Withdraw `volume` ml: set it as target and start withdrawing
    pub fn withdraw(&mut self, volume: f64) -> Result<RunOutcome, ProtocolError> {
        let after = self.budget().withdraw(volume)?;
        self.dose(volume, after, Direction::Withdraw)
    }

    fn dose(
        &mut self,
        volume: f64,
        after: VolumeBudget,
        direction: Direction,
    ) -> Result<RunOutcome, ProtocolError> {
        // The target must not change under a running dose
        if self.session.is_moving()? {
            warn!(pump = %self.session.name(), "Cannot start dose: already moving!");
            return Ok(RunOutcome::AlreadyMoving);
        }

        self.session.set_target_volume(&Quantity::volume(volume))?;
        let started = match direction {
            Direction::Infuse => self.session.infuse_run(),
            Direction::Withdraw => self.session.withdraw_run(),
        };
        let outcome = match started {
            Ok(outcome) => outcome,
            Err(e) => {
                // Do not leave the target of a dose that never ran on the pump
                if let Err(clear) = self.session.clear_target_volume() {
                    warn!(
                        pump = %self.session.name(),
                        error = %clear,
                        "Could not clear target volume after failed start"
                    );
                }
                return Err(e);
            }
        };

        if outcome == RunOutcome::Started {
            self.session.set_stored_volume(after.stored_volume);
            info!(
                pump = %self.session.name(),
                stored = after.stored_volume,
                "{:?} of {} ml started",
                direction,
                volume
            );
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Infuse,
    Withdraw,
}
