pub mod config;
pub mod error;
pub mod platform;
pub mod settings;
pub mod status;
