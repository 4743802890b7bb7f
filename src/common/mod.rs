#![forbid(unsafe_code)]

pub use config::Config;
pub use error::Error;

pub mod config;
pub mod error;

pub type Result<T> = std::result::Result<T, Error>;
