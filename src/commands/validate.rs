// commands/validate.rs
use crate::models::{BulbId, BulbState, Envelope, PowerState};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use validator::Validate;

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#?[A-Fa-f0-9]{6}$").expect("hex color pattern compiles"));

/// A validated control instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub state: PowerState,
    pub brightness: u8,
    pub color: String,
}

impl Command {
    pub fn envelope(&self, bulb: BulbId) -> Envelope {
        Envelope {
            id: bulb,
            state: self.state,
            brightness: self.brightness,
            color: self.color.clone(),
        }
    }
}

impl From<Command> for BulbState {
    fn from(command: Command) -> Self {
        Self {
            state: command.state,
            brightness: command.brightness,
            color: command.color,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing state, brightness, or color.")]
    MissingFields,
    #[error("Invalid state: {0} - must be 'on' or 'off'.")]
    InvalidState(String),
    #[error("Invalid brightness: {0} - must be a number between 1 and 100.")]
    InvalidBrightness(String),
    #[error("Invalid color: {0} - must be a hex color code.")]
    InvalidColor(String),
}

#[derive(Validate)]
struct Levels {
    #[validate(range(min = 1, max = 100))]
    brightness: i64,
    #[validate(regex(path = *HEX_COLOR))]
    color: Option<String>,
}

/// Checks a raw control payload. Fields are checked in the order state,
/// brightness, color and the first problem found is reported.
pub fn validate(raw: &Value) -> Result<Command, ValidationError> {
    let fields = raw.as_object().ok_or(ValidationError::MissingFields)?;
    let (Some(state), Some(brightness), Some(color)) = (
        fields.get("state"),
        fields.get("brightness"),
        fields.get("color"),
    ) else {
        return Err(ValidationError::MissingFields);
    };

    let power = state
        .as_str()
        .and_then(PowerState::parse)
        .ok_or_else(|| ValidationError::InvalidState(display(state)))?;
    let invalid_brightness = || ValidationError::InvalidBrightness(display(brightness));
    let level = brightness.as_i64().ok_or_else(invalid_brightness)?;

    let levels = Levels {
        brightness: level,
        color: color.as_str().map(str::to_owned),
    };
    if let Err(errors) = levels.validate() {
        if errors.errors().contains_key("brightness") {
            return Err(invalid_brightness());
        }
        return Err(ValidationError::InvalidColor(display(color)));
    }

    Ok(Command {
        state: power,
        brightness: u8::try_from(levels.brightness).map_err(|_| invalid_brightness())?,
        color: levels
            .color
            .ok_or_else(|| ValidationError::InvalidColor(display(color)))?,
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
