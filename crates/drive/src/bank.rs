use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{
    DriveError,
    command::{DriveLevels, switch_sequence},
};

/// BCM pin numbers for an L298N-style dual H-bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinAssignment {
    pub a_in1: u8,
    pub a_in2: u8,
    pub a_enable: u8,
    pub b_in1: u8,
    pub b_in2: u8,
    pub b_enable: u8,
}

impl Default for PinAssignment {
    fn default() -> Self {
        Self {
            a_in1: 17,
            a_in2: 27,
            a_enable: 22,
            b_in1: 23,
            b_in2: 24,
            b_enable: 25,
        }
    }
}

/// Fixed PWM applied to both enable lines for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedSetting {
    pub duty_cycle: f64,
    pub frequency_hz: f64,
}

impl SpeedSetting {
    pub fn new(duty_cycle: f64, frequency_hz: f64) -> Result<Self, DriveError> {
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(DriveError::Config(format!(
                "duty cycle {duty_cycle} outside 0.0..=1.0"
            )));
        }
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(DriveError::Config(format!(
                "PWM frequency {frequency_hz} must be positive"
            )));
        }
        Ok(Self {
            duty_cycle,
            frequency_hz,
        })
    }
}

impl Default for SpeedSetting {
    fn default() -> Self {
        Self {
            duty_cycle: 0.75,
            frequency_hz: 1_000.0,
        }
    }
}

/// The physical (or simulated) direction outputs.
pub trait OutputBank: Send {
    fn name(&self) -> &'static str;

    /// Drive both channels to `levels` before returning.
    fn write(&mut self, levels: DriveLevels) -> Result<(), DriveError>;
}

#[derive(Debug, Default)]
struct SimulatedWires {
    wires: [bool; 4],
    levels: Option<DriveLevels>,
    writes: u64,
    history: Vec<[bool; 4]>,
}

/// In-memory bank for dry runs and tests. Every intermediate wire state is
/// kept so callers can check transitions as well as end states.
pub struct SimulatedBank {
    state: Arc<Mutex<SimulatedWires>>,
}

/// Read side of a [`SimulatedBank`].
#[derive(Clone)]
pub struct SimulatedProbe {
    state: Arc<Mutex<SimulatedWires>>,
}

impl SimulatedBank {
    pub fn new() -> (Self, SimulatedProbe) {
        let state = Arc::new(Mutex::new(SimulatedWires::default()));
        (
            Self {
                state: state.clone(),
            },
            SimulatedProbe { state },
        )
    }
}

impl OutputBank for SimulatedBank {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn write(&mut self, levels: DriveLevels) -> Result<(), DriveError> {
        let mut state = self.state.lock().map_err(|_| DriveError::Poisoned)?;
        let target = levels.wires();
        for (wire, level) in switch_sequence(state.wires, target) {
            state.wires[wire.index()] = level;
            let snapshot = state.wires;
            state.history.push(snapshot);
        }
        state.levels = Some(levels);
        state.writes += 1;
        debug!(a = ?levels.a, b = ?levels.b, "simulated drive write");
        Ok(())
    }
}

impl SimulatedProbe {
    /// Levels from the most recent write, `None` before the first.
    pub fn levels(&self) -> Option<DriveLevels> {
        self.state.lock().ok().and_then(|s| s.levels)
    }

    pub fn wires(&self) -> [bool; 4] {
        self.state.lock().map(|s| s.wires).unwrap_or_default()
    }

    pub fn writes(&self) -> u64 {
        self.state.lock().map(|s| s.writes).unwrap_or_default()
    }

    /// Every wire state the bank passed through, one entry per edge.
    pub fn history(&self) -> Vec<[bool; 4]> {
        self.state
            .lock()
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }
}
