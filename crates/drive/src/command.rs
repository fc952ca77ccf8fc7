use std::fmt;

/// Discrete motion requests accepted from the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MotionCommand {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    LowerSensor,
    Idle,
}

impl MotionCommand {
    pub const ALL: [MotionCommand; 6] = [
        MotionCommand::Forward,
        MotionCommand::Backward,
        MotionCommand::TurnLeft,
        MotionCommand::TurnRight,
        MotionCommand::LowerSensor,
        MotionCommand::Idle,
    ];

    /// Map an operator string onto a command.
    ///
    /// Accepts the dashboard phrases ("Moving Forward", "Turning Left", ...)
    /// and the bare verbs, ignoring case and surrounding whitespace. Anything
    /// else is `Idle`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "moving forward" | "forward" => MotionCommand::Forward,
            "moving backward" | "backward" => MotionCommand::Backward,
            "turning left" | "left" => MotionCommand::TurnLeft,
            "turning right" | "right" => MotionCommand::TurnRight,
            "lowering sensor" | "lower" => MotionCommand::LowerSensor,
            _ => MotionCommand::Idle,
        }
    }

    /// Channel levels this command drives.
    ///
    /// Turning spins the tracks against each other. Lowering the soil probe
    /// holds both channels off so the rover stays put while sampling.
    pub fn drive_levels(self) -> DriveLevels {
        use ChannelState::*;
        let (a, b) = match self {
            MotionCommand::Forward => (Forward, Forward),
            MotionCommand::Backward => (Backward, Backward),
            MotionCommand::TurnLeft => (Backward, Forward),
            MotionCommand::TurnRight => (Forward, Backward),
            MotionCommand::LowerSensor | MotionCommand::Idle => (Off, Off),
        };
        DriveLevels { a, b }
    }

    pub fn label(self) -> &'static str {
        match self {
            MotionCommand::Forward => "forward",
            MotionCommand::Backward => "backward",
            MotionCommand::TurnLeft => "turn_left",
            MotionCommand::TurnRight => "turn_right",
            MotionCommand::LowerSensor => "lower_sensor",
            MotionCommand::Idle => "idle",
        }
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State of one two-wire drive channel. Having exactly three variants is what
/// keeps both wires of a channel from ever being asserted together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Forward,
    Backward,
    Off,
}

impl ChannelState {
    /// `(in1, in2)` wire levels.
    pub fn wires(self) -> (bool, bool) {
        match self {
            ChannelState::Forward => (true, false),
            ChannelState::Backward => (false, true),
            ChannelState::Off => (false, false),
        }
    }
}

/// Output levels for both drive channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DriveLevels {
    pub a: ChannelState,
    pub b: ChannelState,
}

impl DriveLevels {
    pub const OFF: DriveLevels = DriveLevels {
        a: ChannelState::Off,
        b: ChannelState::Off,
    };

    /// Wire levels in [`Wire`] order.
    pub fn wires(self) -> [bool; 4] {
        let (a1, a2) = self.a.wires();
        let (b1, b2) = self.b.wires();
        [a1, a2, b1, b2]
    }
}

/// Direction lines, in the order used by [`DriveLevels::wires`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wire {
    AIn1,
    AIn2,
    BIn1,
    BIn2,
}

impl Wire {
    pub const ALL: [Wire; 4] = [Wire::AIn1, Wire::AIn2, Wire::BIn1, Wire::BIn2];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Order of single-wire writes taking `current` to `next` without passing
/// through a state where a channel has both wires high: every falling edge is
/// written before any rising edge.
pub fn switch_sequence(current: [bool; 4], next: [bool; 4]) -> Vec<(Wire, bool)> {
    let falling = Wire::ALL
        .into_iter()
        .filter(|w| current[w.index()] && !next[w.index()])
        .map(|w| (w, false));
    let rising = Wire::ALL
        .into_iter()
        .filter(|w| !current[w.index()] && next[w.index()])
        .map(|w| (w, true));
    falling.chain(rising).collect()
}

/// True when neither channel has both direction wires asserted.
pub fn is_exclusive(wires: [bool; 4]) -> bool {
    !(wires[0] && wires[1]) && !(wires[2] && wires[3])
}
