pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;
pub use crate::config::IdentConfig;

pub use crate::core::fnsi::{Fnsi, KnlSummary, NlCoeff};
pub use crate::core::lti::ConversionMethod;
pub use crate::core::modal::{modal_properties, stabilization, Mode, StabilizationDiagram};
pub use crate::core::optimize::OptimizeOptions;
pub use crate::core::subspace::{subspace, BdMethod, SubspaceOptions, SubspaceResult};
pub use crate::core::workflow::{IdentReport, IdentWorkflow};
pub use crate::domain::model::{NonlinearStateSpace, StateSpace};
pub use crate::domain::nonlin::{NonlinearBank, NonlinearElement, Polynomial, TanhDryFriction};
pub use crate::domain::signal::Signal;
pub use crate::utils::error::{Result, VibError};
