//! API-level data types shared between the HTTP layer, the sequence store and
//! the controller.

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Switch position for [Light::switch] that turns the light on; any other
/// position switches off
pub const SWITCH_ON: &str = "on";
/// Color name selecting the white sub-command instead of a palette entry
pub const WHITE: &str = "white";

/// Named palette color supported by the device
///
/// The device addresses colors on a fixed hue wheel; "white" is a separate
/// sub-command and deliberately not part of this palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Color {
    Red,
    Orange,
    Yellow,
    ChartreuseGreen,
    Green,
    SpringGreen,
    Cyan,
    Azure,
    Blue,
    Violet,
    Magenta,
    Rose,
}

impl Color {
    /// Protocol byte for this palette entry
    pub fn palette_byte(self) -> u8 {
        match self {
            Self::Red => 0x00,
            Self::Orange => 0x15,
            Self::Yellow => 0x2A,
            Self::ChartreuseGreen => 0x3F,
            Self::Green => 0x55,
            Self::SpringGreen => 0x6A,
            Self::Cyan => 0x7F,
            Self::Azure => 0x94,
            Self::Blue => 0xAA,
            Self::Violet => 0xBF,
            Self::Magenta => 0xD4,
            Self::Rose => 0xE9,
        }
    }
}

/// Partially-specified light state
///
/// Every field is optional; absent fields are no-ops when the state is
/// processed by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    /// Color name from [Color], or the literal "white"
    pub color: Option<String>,
    /// Brightness level, clamped to 0..=100 by the protocol layer
    pub brightness: Option<i32>,
    /// "on" to switch on, anything else switches off
    pub switch: Option<String>,
}

/// Named, ordered list of timed light states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub steps: Vec<SequenceStep>,
}

/// Single step of a [Sequence]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub light: Light,
    /// Time to hold this state, in milliseconds. Zero advances immediately.
    pub duration: u64,
}

/// Playback state of the sequencer
///
/// Any requested state other than "running" is treated as a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SeqState {
    Running,
    Stopped,
}

impl From<String> for SeqState {
    fn from(state: String) -> Self {
        if state == "running" {
            Self::Running
        } else {
            Self::Stopped
        }
    }
}

impl From<SeqState> for String {
    fn from(state: SeqState) -> Self {
        match state {
            SeqState::Running => "running".to_owned(),
            SeqState::Stopped => "stopped".to_owned(),
        }
    }
}

/// Sequencer status as reported and controlled through the HTTP API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    #[serde(default)]
    pub name: String,
    pub state: SeqState,
}
