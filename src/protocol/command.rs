//! Outbound command frames.
//!
//! Every command is a single ASCII line terminated by `\n`:
//!
//! | Command | Frame |
//! |---------|-------|
//! | Move | `UP`, `DOWN`, `LEFT`, `RIGHT`, `STOP` |
//! | Light / horn | `<LABEL> ON`, `<LABEL> OFF` |
//! | Speed | `SLIDER <0-100>` |
//! | Temperature request | `GET_TEMP` |
//! | Handshake | `CONNECTED` |

use bytes::Bytes;

use crate::error::{Error, Result};

/// Frame sent to request a temperature report.
pub const GET_TEMP: &str = "GET_TEMP";

/// Frame sent once after the link comes up.
pub const HANDSHAKE: &str = "CONNECTED";

/// Line terminator appended to every frame.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Discrete drive direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Drive forward.
    Up,
    /// Drive backward.
    Down,
    /// Turn left.
    Left,
    /// Turn right.
    Right,
    /// Stop all motors.
    Stop,
}

impl Direction {
    /// Quantise an analogue joystick vector into a direction.
    ///
    /// `x` grows to the right and `y` grows upward, both nominally in
    /// `-1.0..=1.0`. Vectors shorter than `dead_zone` (or non-finite) map to
    /// [`Direction::Stop`]; otherwise the dominant axis wins, with ties going
    /// to the vertical axis.
    pub fn from_joystick(x: f64, y: f64, dead_zone: f64) -> Self {
        if !(x.is_finite() && y.is_finite()) || x.hypot(y) < dead_zone {
            return Self::Stop;
        }

        if y.abs() >= x.abs() {
            if y > 0.0 {
                Self::Up
            } else {
                Self::Down
            }
        } else if x > 0.0 {
            Self::Right
        } else {
            Self::Left
        }
    }

    /// The wire verb for this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Stop => "STOP",
        }
    }
}

/// Switchable lights on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Light {
    /// Front headlights.
    Head,
    /// Rear lights.
    Tail,
    /// Left indicator.
    IndicatorLeft,
    /// Right indicator.
    IndicatorRight,
}

impl Light {
    /// All lights, in a stable order.
    pub const ALL: [Light; 4] = [
        Light::Head,
        Light::Tail,
        Light::IndicatorLeft,
        Light::IndicatorRight,
    ];

    /// The wire label for this light.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Head => "HEADLIGHT",
            Self::Tail => "TAILLIGHT",
            Self::IndicatorLeft => "LEFT_INDICATOR",
            Self::IndicatorRight => "RIGHT_INDICATOR",
        }
    }
}

/// Wire label for the horn.
pub const HORN_LABEL: &str = "HORN";

/// Motor speed as a percentage, guaranteed to be in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Speed(u8);

impl Speed {
    /// The highest speed.
    pub const MAX: Speed = Speed(100);

    /// Create a speed, rejecting values above 100.
    pub fn new(percent: u8) -> Result<Self> {
        if percent > 100 {
            return Err(Error::InvalidParameter {
                name: "speed".to_string(),
                value: percent.to_string(),
            });
        }
        Ok(Self(percent))
    }

    /// Create a speed from a slider position, clamping into `0..=100`.
    ///
    /// Non-finite positions map to zero.
    pub fn from_slider(position: f64) -> Self {
        if !position.is_finite() {
            return Self(0);
        }
        Self(position.round().clamp(0.0, 100.0) as u8)
    }

    /// The percentage value.
    pub fn percent(&self) -> u8 {
        self.0
    }
}

/// A user intent addressed to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    /// Drive in a direction.
    Move(Direction),
    /// Switch a light on or off.
    SetLight(Light, bool),
    /// Sound or silence the horn.
    SetHorn(bool),
    /// Set the motor speed.
    SetSpeed(Speed),
    /// Ask the vehicle for a temperature report.
    RequestTemperature,
    /// Announce the new connection.
    Handshake,
}

impl Command {
    /// Convenience constructor validating the speed percentage.
    pub fn set_speed(percent: u8) -> Result<Self> {
        Speed::new(percent).map(Self::SetSpeed)
    }

    /// Encode this command as a newline-terminated frame.
    pub fn encode(&self) -> Bytes {
        encode(self)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Move(direction) => f.write_str(direction.as_str()),
            Self::SetLight(light, on) => write!(f, "{} {}", light.label(), on_off(*on)),
            Self::SetHorn(on) => write!(f, "{} {}", HORN_LABEL, on_off(*on)),
            Self::SetSpeed(speed) => write!(f, "SLIDER {}", speed.percent()),
            Self::RequestTemperature => f.write_str(GET_TEMP),
            Self::Handshake => f.write_str(HANDSHAKE),
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Encode a command as a newline-terminated ASCII frame.
pub fn encode(command: &Command) -> Bytes {
    let mut frame = command.to_string().into_bytes();
    frame.push(FRAME_TERMINATOR);
    Bytes::from(frame)
}
