#![deny(clippy::all)]

mod event;
pub mod fixture;
mod geometry;
mod node;
mod scene;
mod value;

pub use event::EventShape;
pub use event::EventSource;
pub use event::HandlerFn;
pub use event::ParamKind;
pub use event::Subscription;
pub use geometry::Color;
pub use geometry::Point;
pub use geometry::Rect;
pub use geometry::Size;
pub use node::descendants;
pub use node::same_node;
pub use node::NodeRef;
pub use node::UiNode;
pub use scene::CaptureFailed;
pub use scene::EncodedImage;
pub use scene::InputAction;
pub use scene::InputInjector;
pub use scene::InputRejected;
pub use scene::MouseButton;
pub use scene::Scene;
pub use scene::ScreenshotSource;
pub use value::UiValue;
pub use value::ValueType;
