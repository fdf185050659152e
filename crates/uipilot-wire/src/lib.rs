#![deny(clippy::all)]

mod channel;
mod error;
mod protocol;
mod session;

pub use channel::socket_dir;
pub use channel::socket_path_for_pid;
pub use channel::ControlChannel;
pub use error::ChannelError;
pub use protocol::Ack;
pub use protocol::ColorResult;
pub use protocol::ControlRequest;
pub use protocol::CursorResult;
pub use protocol::ElementHandle;
pub use protocol::ElementListResult;
pub use protocol::ElementResult;
pub use protocol::EventIdResult;
pub use protocol::InvocationsResult;
pub use protocol::OpResult;
pub use protocol::PropertyResult;
pub use protocol::RectResult;
pub use protocol::ScreenshotResult;
pub use protocol::VersionResult;
pub use protocol::WireRequest;
pub use protocol::WireResponse;
pub use protocol::PROTOCOL_VERSION;
pub use session::parent_pid_from_args;
pub use session::CapturedImage;
pub use session::LaunchOptions;
pub use session::RemoteValue;
pub use session::Session;
pub use session::APP_PATH_FLAG;
pub use session::PARENT_PID_FLAG;
