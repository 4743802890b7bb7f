#[macro_use]
mod macros;
pub mod common;
pub(crate) mod cutils;
mod demo;
pub(crate) mod log;
mod session;
pub mod system;

pub use common::{Config, Error};
pub use demo::main as demo_main;
pub use log::SysdepLogger;
pub use session::Session;
