pub mod config;
pub mod error;
pub mod types;

pub use config::HuskyConfig;
pub use error::{HuskyError, Result};
pub use types::*;
