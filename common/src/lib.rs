pub mod auth;
pub mod config;
pub mod messages;
pub mod models;
pub mod utils;

pub use config::*;
pub use messages::*;
pub use models::ConnectionRecord;
pub use utils::*;
