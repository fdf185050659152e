use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::geometry::Point;
use crate::geometry::Rect;
use crate::node::NodeRef;

/// Root access to the application's window tree.
///
/// The control host calls every method except [`Scene::request_shutdown`]
/// from the UI thread. `request_shutdown` may arrive from a host worker
/// thread, so implementations must make it safe to call from anywhere.
pub trait Scene: Send + Sync {
    /// All top-level windows, in z-order (frontmost first).
    fn windows(&self) -> Vec<NodeRef>;

    /// The application's main window, if one is designated.
    fn main_window(&self) -> Option<NodeRef>;

    /// Moves keyboard focus to the target. Returns false when the target
    /// cannot take focus.
    fn move_keyboard_focus(&self, target: &NodeRef) -> bool;

    /// Asks the application to close. Default does nothing; applications
    /// that want remote shutdown hook their event loop here.
    fn request_shutdown(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// One step of a synthetic input sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputAction {
    MouseMove { x: f64, y: f64 },
    MouseDown { button: MouseButton },
    MouseUp { button: MouseButton },
    KeyDown { key: String },
    KeyUp { key: String },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("input rejected: {0}")]
pub struct InputRejected(pub String);

/// Delivers synthetic input to the application.
///
/// Called on the UI thread, one action at a time, in sequence order.
pub trait InputInjector: Send + Sync {
    fn perform(&self, action: &InputAction) -> Result<(), InputRejected>;

    /// Pointer position after the most recent action.
    fn cursor_position(&self) -> Point;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("screen capture failed: {0}")]
pub struct CaptureFailed(pub String);

/// An encoded screenshot, e.g. `format: "png"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: String,
    pub bytes: Vec<u8>,
}

/// Renders the current frame, or a region of it, to an encoded image.
pub trait ScreenshotSource: Send + Sync {
    fn capture(&self, region: Option<Rect>) -> Result<EncodedImage, CaptureFailed>;
}
