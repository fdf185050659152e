use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use uipilot_model::Color;
use uipilot_model::InputAction;
use uipilot_model::Point;
use uipilot_model::Rect;

/// Revision of the wire protocol. Bumped whenever the envelope or an
/// operation's shape changes incompatibly.
pub const PROTOCOL_VERSION: &str = "1.2";

/// One operation of the control catalog, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "params", rename_all = "snake_case")]
pub enum ControlRequest {
    GetWindows,
    GetMainWindow,
    GetElement {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope_id: Option<String>,
    },
    GetProperty {
        element_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_type: Option<String>,
    },
    SetProperty {
        element_id: String,
        name: String,
        value: String,
        value_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_type: Option<String>,
    },
    GetEffectiveBackground {
        element_id: String,
    },
    GetCoordinates {
        element_id: String,
    },
    RegisterSerializer {
        type_name: String,
        insert_index: usize,
    },
    GetVersion,
    RegisterForEvent {
        event_id: String,
        element_id: String,
        event_name: String,
    },
    UnregisterForEvent {
        event_id: String,
    },
    GetEventInvocations {
        event_id: String,
    },
    SendInput {
        actions: Vec<InputAction>,
    },
    MoveKeyboardFocus {
        element_id: String,
    },
    CaptureScreen {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element_id: Option<String>,
    },
    Ping,
    Shutdown,
}

/// Request envelope: one per line, newline-delimited JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    #[serde(flatten)]
    pub op: ControlRequest,
}

/// Response envelope. `result` is the operation's result object; every
/// result object carries an `error_messages` list, empty on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: u64,
    pub result: Value,
}

impl WireResponse {
    pub fn new<T: Serialize>(id: u64, result: &T) -> WireResponse {
        match serde_json::to_value(result) {
            Ok(value) => WireResponse { id, result: value },
            Err(e) => WireResponse::failure(id, format!("response encoding failed: {e}")),
        }
    }

    /// Transport-level failure, e.g. an unparseable request line.
    pub fn failure(id: u64, message: impl Into<String>) -> WireResponse {
        WireResponse {
            id,
            result: json!({ "error_messages": [message.into()] }),
        }
    }
}

/// Identity and declared type of a resolved element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub identity: String,
    pub declared_type: String,
}

/// Result objects that only report success or failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementListResult {
    #[serde(default)]
    pub elements: Vec<ElementHandle>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementResult {
    #[serde(default)]
    pub element: Option<ElementHandle>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

/// Property read/write result. A present property with no registered
/// serializer comes back with both fields absent and no error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyResult {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColorResult {
    #[serde(default)]
    pub color: Option<Color>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RectResult {
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionResult {
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventIdResult {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

/// Recorded firings of a registered event, oldest first. Each invocation is
/// the stringified argument list of one firing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationsResult {
    #[serde(default)]
    pub invocations: Vec<Vec<String>>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorResult {
    #[serde(default)]
    pub cursor: Option<Point>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenshotResult {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub data_base64: Option<String>,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

/// Common access to the `error_messages` list every result object carries.
pub trait OpResult {
    fn error_messages(&self) -> &[String];

    /// A failed result carrying only `messages`.
    fn from_errors(messages: Vec<String>) -> Self
    where
        Self: Sized;
}

macro_rules! carries_errors {
    ($($ty:ty),* $(,)?) => {$(
        impl OpResult for $ty {
            fn error_messages(&self) -> &[String] {
                &self.error_messages
            }

            fn from_errors(messages: Vec<String>) -> Self {
                Self {
                    error_messages: messages,
                    ..Default::default()
                }
            }
        }
    )*};
}

carries_errors!(
    Ack,
    ElementListResult,
    ElementResult,
    PropertyResult,
    ColorResult,
    RectResult,
    VersionResult,
    EventIdResult,
    InvocationsResult,
    CursorResult,
    ScreenshotResult,
);
