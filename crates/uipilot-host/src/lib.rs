#![deny(clippy::all)]

mod config;
mod dispatch;
mod error;
mod events;
mod query;
mod registry;
mod serialize;
mod server;
mod service;

pub use config::HostConfig;
pub use dispatch::UiDispatcher;
pub use dispatch::UiWorkQueue;
pub use error::HostError;
pub use error::QueryError;
pub use error::ServiceError;
pub use events::EventRegistrar;
pub use query::parse_query;
pub use query::Segment;
pub use registry::ElementRegistry;
pub use serialize::SerializerCatalog;
pub use serialize::SerializerChain;
pub use serialize::ValueSerializer;
pub use server::ControlHost;
pub use server::ControlHostBuilder;
pub use service::ControlService;
