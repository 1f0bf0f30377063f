// models.rs
use crate::{broker::Publisher, commands::Dispatcher, devices::{BulbStateStore, Catalog}};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, sync::Arc};
use utoipa::{IntoParams, ToSchema};

pub type BulbId = u32;
pub type HouseId = u32;

/// Static bulb definition. Everything besides `id` is opaque and echoed back to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bulb {
    pub id: BulbId,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct House {
    pub id: HouseId,
    #[serde(default)]
    pub bulbs: Vec<BulbId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last commanded attributes of a bulb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BulbState {
    pub state: PowerState,
    pub brightness: u8,
    pub color: String,
}

impl Default for BulbState {
    fn default() -> Self {
        Self {
            state: PowerState::On,
            brightness: 100,
            color: "#fcd34d".to_string(),
        }
    }
}

/// Message published to a house queue. Downstream agents rely on these exact field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub id: BulbId,
    pub state: PowerState,
    pub brightness: u8,
    pub color: String,
}

/// Bulb config merged with its current state, as returned by `GET /api/bulbs`.
pub type BulbView = Map<String, Value>;

#[derive(Debug, Serialize, ToSchema)]
pub struct BulbListResponse {
    pub success: bool,
    #[schema(value_type = Vec<Object>)]
    pub bulbs: Vec<BulbView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<Vec<BulbId>>,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            failed: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            failed: None,
        }
    }
}

/// Body accepted by the control routes. Handlers read it as raw JSON and run it
/// through `commands::validate`, so this type only feeds the OpenAPI document.
#[allow(dead_code)]
#[derive(Debug, ToSchema)]
pub struct ControlRequest {
    #[schema(example = "on")]
    pub state: String,
    #[schema(minimum = 1, maximum = 100, example = 80)]
    pub brightness: u8,
    #[schema(example = "#fcd34d")]
    pub color: String,
}

#[derive(Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HouseFilter {
    /// House id; omitted or empty means every bulb. Only the first `house` key counts.
    pub house: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub broker: String,
}

pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub store: Arc<BulbStateStore>,
    pub publisher: Arc<Publisher>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(catalog: Arc<Catalog>, store: Arc<BulbStateStore>, publisher: Arc<Publisher>, dispatcher: Dispatcher) -> Self {
        Self {
            catalog,
            store,
            publisher,
            dispatcher,
        }
    }
}
