pub mod fnsi;
pub mod lti;
pub mod modal;
pub mod optimize;
pub mod subspace;
pub mod workflow;

pub use crate::core::fnsi::Fnsi;
pub use crate::core::workflow::{IdentReport, IdentWorkflow};
