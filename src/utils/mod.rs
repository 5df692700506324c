pub mod error;
pub mod linalg;
pub mod logger;
#[cfg(feature = "cli")]
pub mod monitor;
pub mod validation;
