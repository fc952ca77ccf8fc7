use std::sync::Mutex;

use tracing::{debug, info};

use crate::{
    DriveError,
    bank::OutputBank,
    command::{DriveLevels, MotionCommand},
};

/// Sole writer of the drive outputs.
///
/// Writes are serialised by one mutex, so two concurrent `apply` calls can
/// never interleave their edges on the bank.
pub struct Actuator {
    bank: Mutex<Box<dyn OutputBank>>,
}

impl Actuator {
    pub fn new(bank: Box<dyn OutputBank>) -> Self {
        info!(bank = bank.name(), "actuator ready");
        Self {
            bank: Mutex::new(bank),
        }
    }

    /// Drive the outputs for `command`, returning the levels written.
    pub fn apply(&self, command: MotionCommand) -> Result<DriveLevels, DriveError> {
        let levels = command.drive_levels();
        let mut bank = self.bank.lock().map_err(|_| DriveError::Poisoned)?;
        bank.write(levels)?;
        debug!(%command, a = ?levels.a, b = ?levels.b, "drive applied");
        Ok(levels)
    }

    /// Both channels off.
    pub fn stop(&self) -> Result<(), DriveError> {
        self.apply(MotionCommand::Idle).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{
        bank::SimulatedBank,
        command::{ChannelState, is_exclusive},
    };

    #[test]
    fn apply_writes_command_levels() {
        let (bank, probe) = SimulatedBank::new();
        let actuator = Actuator::new(Box::new(bank));
        let levels = actuator.apply(MotionCommand::TurnRight).unwrap();
        assert_eq!(levels.a, ChannelState::Forward);
        assert_eq!(levels.b, ChannelState::Backward);
        assert_eq!(probe.levels(), Some(levels));
        assert_eq!(probe.wires(), [true, false, false, true]);
    }

    #[test]
    fn repeated_idle_commands_leave_outputs_untouched() {
        let (bank, probe) = SimulatedBank::new();
        let actuator = Actuator::new(Box::new(bank));
        actuator.apply(MotionCommand::parse("warp speed")).unwrap();
        actuator.apply(MotionCommand::parse("warp speed")).unwrap();
        assert_eq!(probe.wires(), [false; 4]);
        assert!(probe.history().is_empty());
        assert_eq!(probe.writes(), 2);
    }

    #[test]
    fn concurrent_commands_never_tear_a_channel() {
        let (bank, probe) = SimulatedBank::new();
        let actuator = Arc::new(Actuator::new(Box::new(bank)));
        let handles: Vec<_> = MotionCommand::ALL
            .into_iter()
            .map(|command| {
                let actuator = actuator.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        actuator.apply(command).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(probe.writes(), 300);
        assert!(probe.history().into_iter().all(is_exclusive));
        let last = probe.levels().unwrap();
        assert_eq!(probe.wires(), last.wires());
    }
}
