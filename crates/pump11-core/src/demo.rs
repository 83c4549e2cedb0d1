//! Demo Mode - Simulated Protocol11 pump
//!
//! Answers commands the way an Elite 11 in Quick Start mode does, so sessions
//! can be exercised without hardware. Motion does not advance on its own:
//! call [`SimulatedPump::finish_motion`] to end a run, or
//! [`SimulatedPump::stall`] to jam the plunger.
//!
//! Several simulated pumps can share one [`MockLink`] to model a daisy chain.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::{MockLink, MotionStatus};

/// Rate limit scale with the square of the syringe diameter (mm)
const MAX_RATE_PER_MM2: f64 = 0.5; // ml/min
const MIN_RATE_PER_MM2: f64 = 4.82e-9; // ml/min

#[derive(Debug, Clone)]
struct SimState {
    address: u8,
    infuse_only: bool,
    status: MotionStatus,
    /// Direction of the last run, for `run` and `rrun`
    last_direction: MotionStatus,
    diameter_mm: f64,
    syringe_volume_ml: f64,
    infuse_rate: f64,
    withdraw_rate: f64,
    infused_ml: f64,
    withdrawn_ml: f64,
    target_ml: Option<f64>,
    force_percent: u32,
}

/// A simulated pump at one address
#[derive(Clone)]
pub struct SimulatedPump {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPump {
    /// Infuse/withdraw pump at `address`
    pub fn new(address: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                address,
                infuse_only: false,
                status: MotionStatus::Idle,
                last_direction: MotionStatus::Infusing,
                diameter_mm: 14.43,
                syringe_volume_ml: 10.0,
                infuse_rate: 1.0,
                withdraw_rate: 1.0,
                infused_ml: 0.0,
                withdrawn_ml: 0.0,
                target_ml: None,
                force_percent: 30,
            })),
        }
    }

    /// Infuse-only pump at `address`
    pub fn infuse_only(address: u8) -> Self {
        let pump = Self::new(address);
        pump.lock().infuse_only = true;
        pump
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn address(&self) -> u8 {
        self.lock().address
    }

    pub fn status(&self) -> MotionStatus {
        self.lock().status
    }

    pub fn diameter_mm(&self) -> f64 {
        self.lock().diameter_mm
    }

    pub fn syringe_volume_ml(&self) -> f64 {
        self.lock().syringe_volume_ml
    }

    pub fn infuse_rate(&self) -> f64 {
        self.lock().infuse_rate
    }

    pub fn withdraw_rate(&self) -> f64 {
        self.lock().withdraw_rate
    }

    pub fn target_ml(&self) -> Option<f64> {
        self.lock().target_ml
    }

    pub fn force_percent(&self) -> u32 {
        self.lock().force_percent
    }

    /// End the current run. With a target set the pump reports "target
    /// reached" and counts the target volume; otherwise it goes idle.
    pub fn finish_motion(&self) {
        let mut s = self.lock();
        let moved = s.target_ml.unwrap_or(0.0);
        match s.status {
            MotionStatus::Infusing => s.infused_ml += moved,
            MotionStatus::Withdrawing => s.withdrawn_ml += moved,
            _ => return,
        }
        s.status = if s.target_ml.is_some() {
            MotionStatus::TargetReached
        } else {
            MotionStatus::Idle
        };
    }

    /// Jam the pump; only [`SimulatedPump::acknowledge`] clears it
    pub fn stall(&self) {
        self.lock().status = MotionStatus::Stalled;
    }

    /// Operator pressed the display after a stall
    pub fn acknowledge(&self) {
        self.lock().status = MotionStatus::Idle;
    }

    /// [`MockLink`] with only this pump connected
    pub fn link(&self) -> MockLink {
        Self::chain(std::slice::from_ref(self))
    }

    /// [`MockLink`] with several pumps daisy chained on it.
    ///
    /// A line without an address is answered by the first pump in the chain.
    pub fn chain(pumps: &[SimulatedPump]) -> MockLink {
        let pumps = pumps.to_vec();
        MockLink::new(move |line| {
            let address = line.get(..2).and_then(|a| a.parse::<u8>().ok());
            let target = match address {
                Some(a) => pumps.iter().find(|p| p.address() == a),
                None => pumps.first(),
            };
            match target {
                Some(pump) => pump.respond(line),
                None => Vec::new(),
            }
        })
    }

    /// Reply lines for one written command line
    pub fn respond(&self, line: &str) -> Vec<String> {
        let mut s = self.lock();
        let text = line.get(2..).unwrap_or("").trim();
        let (code, arg) = match text.split_once(' ') {
            Some((code, arg)) => (code, arg.trim()),
            None => (text, ""),
        };

        let result = if s.status == MotionStatus::Stalled {
            // A stalled pump only shows its prompt until acknowledged
            Ok(Vec::new())
        } else {
            s.execute(code, arg)
        };

        let prompt = s.prompt();
        match result {
            Ok(body) => {
                let mut reply = vec![String::new()];
                reply.extend(body.into_iter().map(|b| format!("{}{}", prompt, b)));
                reply.push(prompt);
                reply
            }
            Err(marker) => vec![String::new(), format!("{}{}", prompt, marker)],
        }
    }
}

fn number(arg: &str) -> Result<f64, &'static str> {
    arg.split_whitespace()
        .next()
        .and_then(|n| n.parse::<f64>().ok())
        .ok_or("Argument error")
}

/// Rate argument in ml/min, e.g. "0.5 m/m" or "1.2 n/m"
fn rate(arg: &str) -> Result<f64, &'static str> {
    let value = number(arg)?;
    let scale = match arg.split_whitespace().nth(1) {
        None | Some("m/m") => 1.0,
        Some("u/m") => 1e-3,
        Some("n/m") => 1e-6,
        Some("m/h") => return Ok(value / 60.0),
        Some(_) => return Err("Argument error"),
    };
    Ok(value * scale)
}

impl SimState {
    fn prompt(&self) -> String {
        let suffix = match self.status {
            MotionStatus::TargetReached => "T*".to_string(),
            other => other.prompt_char().to_string(),
        };
        format!("{:02}{}", self.address, suffix)
    }

    /// Limits as reported: lower in nl/min to 5 decimals, upper in ml/min to 3
    fn reported_limits(&self) -> (f64, f64) {
        let area = self.diameter_mm * self.diameter_mm;
        let low_nl = (MIN_RATE_PER_MM2 * area * 1e6 * 1e5).round() / 1e5;
        let high = (MAX_RATE_PER_MM2 * area * 1e3).round() / 1e3;
        (low_nl, high)
    }

    /// Limits in ml/min
    fn rate_limits(&self) -> (f64, f64) {
        let (low_nl, high) = self.reported_limits();
        (low_nl * 1e-6, high)
    }

    fn start(&mut self, direction: MotionStatus) -> Result<Vec<String>, &'static str> {
        if direction == MotionStatus::Withdrawing && self.infuse_only {
            return Err("Unknown command");
        }
        self.status = direction;
        self.last_direction = direction;
        Ok(Vec::new())
    }

    fn set_rate(&mut self, arg: &str, withdraw: bool) -> Result<Vec<String>, &'static str> {
        let rate = rate(arg)?;
        let (low, high) = self.rate_limits();
        if rate < low || rate > high {
            return Err("Out of range");
        }
        if withdraw {
            self.withdraw_rate = rate;
        } else {
            self.infuse_rate = rate;
        }
        Ok(vec![format!("{} ml/min", rate)])
    }

    fn metrics(&self) -> Vec<String> {
        let direction = if self.infuse_only {
            "Infuse only"
        } else {
            "Infuse/withdraw"
        };
        let description = if self.infuse_only {
            "11 ELITE I Single"
        } else {
            "11 ELITE I/W Single"
        };
        vec![
            "Pump type          Pump 11".to_string(),
            format!("Pump type string   {}", description),
            "Display type       Sharp".to_string(),
            "Steps per rev      400".to_string(),
            "Gear ratio         1:1".to_string(),
            "Pulley ratio       2.4:1".to_string(),
            "Lead screw         24 threads per inch".to_string(),
            "Microstepping      16 microsteps per step".to_string(),
            "Low speed limit    27 seconds".to_string(),
            "High speed limit   26 microseconds".to_string(),
            "Motor polarity     Reverse".to_string(),
            "Min syringe size   0.1 mm".to_string(),
            "Max syringe size   33 mm".to_string(),
            "Min raw force %    20%".to_string(),
            "Max raw force %    80%".to_string(),
            "Encoder            100 lines".to_string(),
            format!("Direction          {}", direction),
            "Programmable       Yes".to_string(),
            "Limit switches     No".to_string(),
            "Command set        None".to_string(),
        ]
    }

    fn execute(&mut self, code: &str, arg: &str) -> Result<Vec<String>, &'static str> {
        let withdraw_code = matches!(
            code,
            "wrun" | "wrate" | "wramp" | "wvolume" | "cwvolume" | "cvolume"
        );
        if withdraw_code && self.infuse_only {
            return Err("Unknown command");
        }

        match (code, arg) {
            ("", _) => Ok(Vec::new()),
            ("VER", _) => Ok(vec!["11 ELITE I/W Single 3.0.4".to_string()]),
            ("run", _) => self.start(self.last_direction),
            ("rrun", _) => {
                let reverse = if self.last_direction == MotionStatus::Withdrawing {
                    MotionStatus::Infusing
                } else {
                    MotionStatus::Withdrawing
                };
                self.start(reverse)
            }
            ("irun", _) => self.start(MotionStatus::Infusing),
            ("wrun", _) => self.start(MotionStatus::Withdrawing),
            ("stp", _) => {
                self.status = MotionStatus::Idle;
                Ok(Vec::new())
            }
            ("FORCE", "") => Ok(vec![format!("{}%", self.force_percent)]),
            ("FORCE", arg) => {
                let force = number(arg)?;
                if !(1.0..=100.0).contains(&force) {
                    return Err("Out of range");
                }
                self.force_percent = force as u32;
                Ok(vec![format!("{}%", self.force_percent)])
            }
            ("diameter", "") => Ok(vec![format!("{:.4} mm", self.diameter_mm)]),
            ("diameter", arg) => {
                let d = number(arg)?;
                if !(0.1..=33.0).contains(&d) {
                    return Err("Out of range");
                }
                self.diameter_mm = d;
                Ok(vec![format!("{:.4} mm", d)])
            }
            ("metrics", _) => Ok(self.metrics()),
            ("crate", _) => {
                let rate = match self.status {
                    MotionStatus::Infusing => self.infuse_rate,
                    MotionStatus::Withdrawing => self.withdraw_rate,
                    _ => 0.0,
                };
                Ok(vec![format!("{} ml/min", rate)])
            }
            ("iramp" | "wramp", "") => Ok(vec!["Ramp not set up.".to_string()]),
            ("iramp" | "wramp", _) => Err("Argument error"),
            ("irate" | "wrate", "lim") => {
                let (low_nl, high) = self.reported_limits();
                Ok(vec![format!("{:.5} nl/min to {:.3} ml/min", low_nl, high)])
            }
            ("irate", "") => Ok(vec![format!("{} ml/min", self.infuse_rate)]),
            ("wrate", "") => Ok(vec![format!("{} ml/min", self.withdraw_rate)]),
            ("irate", arg) => self.set_rate(arg, false),
            ("wrate", arg) => self.set_rate(arg, true),
            ("ivolume", _) => Ok(vec![format!("{} ml", self.infused_ml)]),
            ("wvolume", _) => Ok(vec![format!("{} ml", self.withdrawn_ml)]),
            ("svolume", "") => Ok(vec![format!("{} ml", self.syringe_volume_ml)]),
            ("svolume", arg) => {
                let v = number(arg)?;
                if v <= 0.0 {
                    return Err("Out of range");
                }
                self.syringe_volume_ml = v;
                Ok(vec![format!("{} ml", v)])
            }
            ("tvolume", "") => Ok(vec![match self.target_ml {
                Some(v) => format!("{} ml", v),
                None => "Target volume not set".to_string(),
            }]),
            ("tvolume", arg) => {
                let v = number(arg)?;
                if v <= 0.0 || v > self.syringe_volume_ml {
                    return Err("Argument error");
                }
                self.target_ml = Some(v);
                Ok(vec![format!("{} ml", v)])
            }
            ("civolume", _) => {
                self.infused_ml = 0.0;
                Ok(Vec::new())
            }
            ("cwvolume", _) => {
                self.withdrawn_ml = 0.0;
                Ok(Vec::new())
            }
            ("cvolume", _) => {
                self.infused_ml = 0.0;
                self.withdrawn_ml = 0.0;
                Ok(Vec::new())
            }
            ("ctvolume", _) => {
                self.target_ml = None;
                if self.status == MotionStatus::TargetReached {
                    self.status = MotionStatus::Idle;
                }
                Ok(Vec::new())
            }
            _ => Err("Command error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SerialLink;

    #[test]
    fn test_version_reply() {
        let pump = SimulatedPump::new(0);
        assert_eq!(
            pump.respond("00VER \r\n"),
            vec!["", "00:11 ELITE I/W Single 3.0.4", "00:"]
        );
    }

    #[test]
    fn test_prompt_follows_motion() {
        let pump = SimulatedPump::new(3);
        assert_eq!(pump.respond("03irun \r\n"), vec!["", "03>"]);
        assert_eq!(pump.status(), MotionStatus::Infusing);
        assert_eq!(pump.respond("03stp \r\n"), vec!["", "03:"]);
    }

    #[test]
    fn test_target_reached_prompt() {
        let pump = SimulatedPump::new(1);
        pump.respond("01tvolume 2 m\r\n");
        pump.respond("01irun \r\n");
        pump.finish_motion();
        assert_eq!(pump.status(), MotionStatus::TargetReached);
        assert_eq!(pump.respond("01  \r\n"), vec!["", "01T*"]);
        assert_eq!(pump.respond("01ivolume \r\n")[1], "01T*2 ml");
    }

    #[test]
    fn test_rejections() {
        let pump = SimulatedPump::infuse_only(0);
        assert_eq!(pump.respond("00wrun \r\n"), vec!["", "00:Unknown command"]);
        assert_eq!(pump.respond("00bogus \r\n"), vec!["", "00:Command error"]);
        assert_eq!(pump.respond("00irate 9000 m/m\r\n"), vec!["", "00:Out of range"]);
    }

    #[test]
    fn test_rate_limits_follow_diameter() {
        let pump = SimulatedPump::new(0);
        let wide = pump.respond("00irate lim \r\n")[1].clone();
        pump.respond("00diameter 4.6\r\n");
        let narrow = pump.respond("00irate lim \r\n")[1].clone();
        assert_ne!(wide, narrow);
        assert!(narrow.contains(" to "));
    }

    #[test]
    fn test_rate_units() {
        let pump = SimulatedPump::new(0);
        assert_eq!(pump.respond("00irate 30 m/h\r\n")[1], "00:0.5 ml/min");
        pump.respond("00irate 2 u/m\r\n");
        assert_eq!(pump.infuse_rate(), 0.002);
        assert_eq!(pump.respond("00irate 1 furlong/m\r\n")[1], "00:Argument error");
    }

    #[test]
    fn test_stall_shows_only_prompt() {
        let pump = SimulatedPump::new(0);
        pump.stall();
        assert_eq!(pump.respond("00VER \r\n"), vec!["", "00*"]);
        pump.acknowledge();
        assert_eq!(pump.status(), MotionStatus::Idle);
    }

    #[test]
    fn test_chain_routes_by_address() {
        let a = SimulatedPump::new(0);
        let b = SimulatedPump::new(1);
        let mut link = SimulatedPump::chain(&[a.clone(), b.clone()]);
        link.write_all(b"01irun \r\n").unwrap();
        assert_eq!(b.status(), MotionStatus::Infusing);
        assert_eq!(a.status(), MotionStatus::Idle);
    }
}
