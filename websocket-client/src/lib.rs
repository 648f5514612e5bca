// websocket-client/src/lib.rs
pub mod driver;
pub mod error;
pub mod listeners;
pub mod transport;

pub use driver::{ConnectionDriver, DriverHandle, DriverState, ReconnectPolicy};
pub use error::DriverError;
pub use listeners::{DriverEvent, EventCategory, ListenerId, ListenerRegistry};
pub use transport::{Connector, TungsteniteConnector};
