//! Drive control for the rover's two tracked channels.
//!
//! A [`MotionCommand`] maps to a pair of [`ChannelState`]s; the [`Actuator`]
//! pushes those levels to an [`OutputBank`] under a single lock. The GPIO bank
//! is available with the `rpi` feature, [`SimulatedBank`] everywhere.

mod actuator;
mod bank;
mod command;
#[cfg(feature = "rpi")]
mod gpio;

use thiserror::Error;

pub use actuator::Actuator;
pub use bank::{OutputBank, PinAssignment, SimulatedBank, SimulatedProbe, SpeedSetting};
pub use command::{
    ChannelState, DriveLevels, MotionCommand, Wire, is_exclusive, switch_sequence,
};
#[cfg(feature = "rpi")]
pub use gpio::GpioBank;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("drive configuration rejected: {0}")]
    Config(String),
    #[error("drive output failed: {0}")]
    Hardware(String),
    #[error("drive bank lock poisoned")]
    Poisoned,
}
