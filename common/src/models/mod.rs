pub mod connection;

pub use connection::ConnectionRecord;
