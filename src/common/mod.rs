mod config;
mod error;
mod logging;
mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;
