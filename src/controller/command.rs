use thiserror::Error;

use crate::milight::{LightController, MilightError};
use crate::models::{Color, SWITCH_ON, WHITE};

/// Color name outside the palette and not "white"
#[derive(Debug, Error)]
#[error("unsupported color: {0}")]
pub struct UnsupportedColor(pub String);

/// Queued light-control command, consumed exactly once by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Switch(bool),
    Brightness(u8),
    Color(Color),
    White,
}

impl Command {
    pub fn switch(position: &str) -> Self {
        Self::Switch(position == SWITCH_ON)
    }

    pub fn brightness(level: i32) -> Self {
        Self::Brightness(level.clamp(0, i32::from(u8::MAX)) as u8)
    }

    /// Parse a color name; "white" selects the white sub-command
    pub fn color(name: &str) -> Result<Self, UnsupportedColor> {
        if name == WHITE {
            return Ok(Self::White);
        }

        name.parse::<Color>()
            .map(Self::Color)
            .map_err(|_| UnsupportedColor(name.to_owned()))
    }

    pub async fn exec(&self, light: &dyn LightController) -> Result<(), MilightError> {
        match self {
            Self::Switch(true) => light.on().await,
            Self::Switch(false) => light.off().await,
            Self::Brightness(level) => light.brightness(*level).await,
            Self::Color(color) => light.color(*color).await,
            Self::White => light.white().await,
        }
    }
}
