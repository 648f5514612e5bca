// websocket-server/src/lib.rs
pub mod actors;
pub mod admission;
pub mod registry;
pub mod routing;
