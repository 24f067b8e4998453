pub mod config;
pub mod lightning;
pub mod logging;
pub mod splice;
