//! Collaborator seams: configuration and market data.

pub mod config_port;
pub mod data_port;
