//! Raspberry Pi GPIO bank through `rppal`.

use rppal::gpio::{Gpio, OutputPin};
use tracing::info;

use crate::{
    DriveError,
    bank::{OutputBank, PinAssignment, SpeedSetting},
    command::{DriveLevels, switch_sequence},
};

/// Direction and enable lines of the H-bridge.
///
/// The enable lines carry a software PWM at the configured duty cycle from
/// construction onwards; commands only ever touch the direction lines.
pub struct GpioBank {
    wires: [OutputPin; 4],
    _enables: [OutputPin; 2],
    current: [bool; 4],
}

impl GpioBank {
    pub fn open(pins: PinAssignment, speed: SpeedSetting) -> Result<Self, DriveError> {
        let gpio = Gpio::new().map_err(hardware)?;
        let output = |pin: u8| -> Result<OutputPin, DriveError> {
            Ok(gpio.get(pin).map_err(hardware)?.into_output_low())
        };

        let wires = [
            output(pins.a_in1)?,
            output(pins.a_in2)?,
            output(pins.b_in1)?,
            output(pins.b_in2)?,
        ];
        let mut enables = [output(pins.a_enable)?, output(pins.b_enable)?];
        for enable in enables.iter_mut() {
            enable
                .set_pwm_frequency(speed.frequency_hz, speed.duty_cycle)
                .map_err(hardware)?;
        }
        info!(
            ?pins,
            duty = speed.duty_cycle,
            frequency = speed.frequency_hz,
            "GPIO drive bank ready"
        );

        Ok(Self {
            wires,
            _enables: enables,
            current: [false; 4],
        })
    }
}

impl OutputBank for GpioBank {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn write(&mut self, levels: DriveLevels) -> Result<(), DriveError> {
        for (wire, level) in switch_sequence(self.current, levels.wires()) {
            let pin: &mut OutputPin = &mut self.wires[wire.index()];
            if level {
                pin.set_high();
            } else {
                pin.set_low();
            }
            self.current[wire.index()] = level;
        }
        Ok(())
    }
}

fn hardware(err: rppal::gpio::Error) -> DriveError {
    DriveError::Hardware(err.to_string())
}
