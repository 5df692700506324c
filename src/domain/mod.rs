pub mod model;
pub mod nonlin;
pub mod signal;
