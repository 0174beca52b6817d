//! Port traits decoupling the engine from its config, data and report sources.

pub mod config_port;
pub mod data_port;
pub mod report_port;
