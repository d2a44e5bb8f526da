pub mod codec;
pub mod config;
pub mod connection;
pub mod frame;
pub mod pipeline;
pub mod server;
pub mod stats;
pub mod upstream;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
