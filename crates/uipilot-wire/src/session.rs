use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use base64::Engine;

use uipilot_model::Color;
use uipilot_model::InputAction;
use uipilot_model::Point;
use uipilot_model::Rect;

use crate::channel::ControlChannel;
use crate::error::ChannelError;
use crate::protocol::Ack;
use crate::protocol::ColorResult;
use crate::protocol::ControlRequest;
use crate::protocol::CursorResult;
use crate::protocol::ElementHandle;
use crate::protocol::ElementListResult;
use crate::protocol::ElementResult;
use crate::protocol::EventIdResult;
use crate::protocol::InvocationsResult;
use crate::protocol::OpResult;
use crate::protocol::PropertyResult;
use crate::protocol::RectResult;
use crate::protocol::ScreenshotResult;
use crate::protocol::VersionResult;

/// Flag the launcher appends so the application knows who is driving it.
pub const PARENT_PID_FLAG: &str = "--pilot-parent-pid";
/// Flag carrying an application-specific payload path, when one is given.
pub const APP_PATH_FLAG: &str = "--pilot-app";

const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Extracts the driving process pid from a launched application's argv.
/// Applications pass `std::env::args()` here during startup.
pub fn parent_pid_from_args<I>(args: I) -> Option<u32>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == PARENT_PID_FLAG {
            return args.next()?.parse().ok();
        }
    }
    None
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    connect_timeout: Duration,
    app_path: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn new() -> Self {
        LaunchOptions {
            connect_timeout: Duration::from_secs(10),
            app_path: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_app_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.app_path = Some(path.into());
        self
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        LaunchOptions::new()
    }
}

/// A live connection to one application under control.
///
/// `launch` spawns the application and owns the child process; `attach`
/// takes an already-running pid. Either way the session is keyed by the
/// target's pid, which also determines the socket address.
pub struct Session {
    pid: u32,
    child: Option<Child>,
    channel: ControlChannel,
}

impl Session {
    pub fn launch<P, I, A>(
        program: P,
        args: I,
        options: LaunchOptions,
    ) -> Result<Session, ChannelError>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command
            .args(args)
            .arg(PARENT_PID_FLAG)
            .arg(std::process::id().to_string())
            .stdin(Stdio::null());
        if let Some(path) = &options.app_path {
            command.arg(APP_PATH_FLAG).arg(path);
        }

        let mut child = command.spawn().map_err(ChannelError::Spawn)?;
        let pid = child.id();
        tracing::debug!(pid, "launched application, waiting for control channel");

        match ControlChannel::connect(pid, options.connect_timeout) {
            Ok(channel) => Ok(Session {
                pid,
                child: Some(child),
                channel,
            }),
            Err(e) => {
                // Startup failed; do not leave an orphan behind.
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Attaches to an application some other party started.
    pub fn attach(pid: u32, connect_timeout: Duration) -> Result<Session, ChannelError> {
        let channel = ControlChannel::connect(pid, connect_timeout)?;
        Ok(Session {
            pid,
            child: None,
            channel,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The raw channel, for operations the typed wrappers do not cover.
    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    fn lift<T: OpResult>(result: T) -> Result<T, ChannelError> {
        if result.error_messages().is_empty() {
            Ok(result)
        } else {
            Err(ChannelError::Remote {
                messages: result.error_messages().to_vec(),
            })
        }
    }

    pub fn ping(&self) -> Result<(), ChannelError> {
        let result: Ack = self.channel.call(ControlRequest::Ping)?;
        Self::lift(result).map(|_| ())
    }

    pub fn windows(&self) -> Result<Vec<ElementHandle>, ChannelError> {
        let result: ElementListResult = self.channel.call(ControlRequest::GetWindows)?;
        Self::lift(result).map(|r| r.elements)
    }

    pub fn main_window(&self) -> Result<ElementHandle, ChannelError> {
        let result: ElementResult = self.channel.call(ControlRequest::GetMainWindow)?;
        Self::lift(result)?.element.ok_or_else(Self::missing_payload)
    }

    /// Resolves a query against the main window.
    pub fn element(&self, query: &str) -> Result<ElementHandle, ChannelError> {
        self.resolve(query, None)
    }

    /// Resolves a query against an already-resolved element.
    pub fn element_in(
        &self,
        scope: &ElementHandle,
        query: &str,
    ) -> Result<ElementHandle, ChannelError> {
        self.resolve(query, Some(scope.identity.clone()))
    }

    fn resolve(
        &self,
        query: &str,
        scope_id: Option<String>,
    ) -> Result<ElementHandle, ChannelError> {
        let result: ElementResult = self.channel.call(ControlRequest::GetElement {
            query: query.to_string(),
            scope_id,
        })?;
        Self::lift(result)?.element.ok_or_else(Self::missing_payload)
    }

    /// Reads a property. `None` means the property exists but no serializer
    /// covers its type.
    pub fn property(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<RemoteValue>, ChannelError> {
        self.property_request(element, name, None)
    }

    /// Like [`Session::property`] but qualifies the lookup with the owning
    /// type of an attached property.
    pub fn property_with_owner(
        &self,
        element: &ElementHandle,
        name: &str,
        owner_type: &str,
    ) -> Result<Option<RemoteValue>, ChannelError> {
        self.property_request(element, name, Some(owner_type.to_string()))
    }

    fn property_request(
        &self,
        element: &ElementHandle,
        name: &str,
        owner_type: Option<String>,
    ) -> Result<Option<RemoteValue>, ChannelError> {
        let result: PropertyResult = self.channel.call(ControlRequest::GetProperty {
            element_id: element.identity.clone(),
            name: name.to_string(),
            owner_type,
        })?;
        Ok(RemoteValue::from_result(Self::lift(result)?))
    }

    /// Writes a property and returns the value read back after the write.
    pub fn set_property(
        &self,
        element: &ElementHandle,
        name: &str,
        value: &str,
        value_type: &str,
    ) -> Result<Option<RemoteValue>, ChannelError> {
        self.set_property_request(element, name, value, value_type, None)
    }

    pub fn set_property_with_owner(
        &self,
        element: &ElementHandle,
        name: &str,
        value: &str,
        value_type: &str,
        owner_type: &str,
    ) -> Result<Option<RemoteValue>, ChannelError> {
        self.set_property_request(element, name, value, value_type, Some(owner_type.to_string()))
    }

    fn set_property_request(
        &self,
        element: &ElementHandle,
        name: &str,
        value: &str,
        value_type: &str,
        owner_type: Option<String>,
    ) -> Result<Option<RemoteValue>, ChannelError> {
        let result: PropertyResult = self.channel.call(ControlRequest::SetProperty {
            element_id: element.identity.clone(),
            name: name.to_string(),
            value: value.to_string(),
            value_type: value_type.to_string(),
            owner_type,
        })?;
        Ok(RemoteValue::from_result(Self::lift(result)?))
    }

    /// First non-transparent background color on the element's parent chain.
    pub fn effective_background(&self, element: &ElementHandle) -> Result<Color, ChannelError> {
        let result: ColorResult = self.channel.call(ControlRequest::GetEffectiveBackground {
            element_id: element.identity.clone(),
        })?;
        Self::lift(result)?.color.ok_or_else(Self::missing_payload)
    }

    /// Bounding box of the element in window coordinates.
    pub fn coordinates(&self, element: &ElementHandle) -> Result<Rect, ChannelError> {
        let result: RectResult = self.channel.call(ControlRequest::GetCoordinates {
            element_id: element.identity.clone(),
        })?;
        Self::lift(result)?.rect.ok_or_else(Self::missing_payload)
    }

    /// Asks the host to instantiate a named serializer and splice it into
    /// its chain at `insert_index`. Index 0 takes priority over everything.
    pub fn register_serializer(
        &self,
        type_name: &str,
        insert_index: usize,
    ) -> Result<(), ChannelError> {
        let result: Ack = self.channel.call(ControlRequest::RegisterSerializer {
            type_name: type_name.to_string(),
            insert_index,
        })?;
        Self::lift(result).map(|_| ())
    }

    pub fn version(&self) -> Result<VersionResult, ChannelError> {
        let result: VersionResult = self.channel.call(ControlRequest::GetVersion)?;
        Self::lift(result)
    }

    /// Starts recording firings of `event_name` on `element` under the
    /// caller-chosen `event_id`. The host echoes the id back.
    pub fn register_for_event(
        &self,
        event_id: &str,
        element: &ElementHandle,
        event_name: &str,
    ) -> Result<String, ChannelError> {
        let result: EventIdResult = self.channel.call(ControlRequest::RegisterForEvent {
            event_id: event_id.to_string(),
            element_id: element.identity.clone(),
            event_name: event_name.to_string(),
        })?;
        Self::lift(result)?.event_id.ok_or_else(Self::missing_payload)
    }

    pub fn unregister_event(&self, event_id: &str) -> Result<(), ChannelError> {
        let result: Ack = self.channel.call(ControlRequest::UnregisterForEvent {
            event_id: event_id.to_string(),
        })?;
        Self::lift(result).map(|_| ())
    }

    /// Snapshot of everything recorded for `event_id` so far, oldest first.
    pub fn event_invocations(&self, event_id: &str) -> Result<Vec<Vec<String>>, ChannelError> {
        let result: InvocationsResult = self.channel.call(ControlRequest::GetEventInvocations {
            event_id: event_id.to_string(),
        })?;
        Self::lift(result).map(|r| r.invocations)
    }

    /// Performs a synthetic input sequence and returns the pointer position
    /// after the last action.
    pub fn send_input(&self, actions: &[InputAction]) -> Result<Point, ChannelError> {
        let result: CursorResult = self.channel.call(ControlRequest::SendInput {
            actions: actions.to_vec(),
        })?;
        Self::lift(result)?.cursor.ok_or_else(Self::missing_payload)
    }

    pub fn move_keyboard_focus(&self, element: &ElementHandle) -> Result<(), ChannelError> {
        let result: Ack = self.channel.call(ControlRequest::MoveKeyboardFocus {
            element_id: element.identity.clone(),
        })?;
        Self::lift(result).map(|_| ())
    }

    /// Captures the whole frame, or just `element`'s bounds when given.
    pub fn capture_screen(
        &self,
        element: Option<&ElementHandle>,
    ) -> Result<CapturedImage, ChannelError> {
        let result: ScreenshotResult = self.channel.call(ControlRequest::CaptureScreen {
            element_id: element.map(|e| e.identity.clone()),
        })?;
        let result = Self::lift(result)?;
        let format = result.format.ok_or_else(Self::missing_payload)?;
        let encoded = result.data_base64.ok_or_else(Self::missing_payload)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| ChannelError::Protocol(format!("screenshot payload is not base64: {e}")))?;
        Ok(CapturedImage { format, bytes })
    }

    /// Asks the application to exit, then reaps the child when this session
    /// launched it. Kills the child if it ignores the request.
    pub fn shutdown(mut self) -> Result<(), ChannelError> {
        let result: Ack = self.channel.call(ControlRequest::Shutdown)?;
        Self::lift(result)?;

        if let Some(mut child) = self.child.take() {
            let deadline = Instant::now() + SHUTDOWN_WAIT;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() >= deadline => {
                        tracing::warn!(pid = self.pid, "application ignored shutdown, killing it");
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                    Ok(None) => std::thread::sleep(SHUTDOWN_POLL_INTERVAL),
                    Err(e) => return Err(ChannelError::ChannelFault(e)),
                }
            }
        }
        Ok(())
    }

    fn missing_payload() -> ChannelError {
        ChannelError::Protocol("result object is missing its payload".to_string())
    }
}

/// A property value as it crossed the wire: the serialized text plus the
/// declared type name that selected the serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValue {
    pub value_type: String,
    pub value: String,
}

impl RemoteValue {
    fn from_result(result: PropertyResult) -> Option<RemoteValue> {
        match (result.value, result.value_type) {
            (Some(value), Some(value_type)) => Some(RemoteValue { value_type, value }),
            _ => None,
        }
    }
}

/// A decoded screenshot as returned by [`Session::capture_screen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub format: String,
    pub bytes: Vec<u8>,
}
