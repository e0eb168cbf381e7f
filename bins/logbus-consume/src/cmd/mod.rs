pub mod backend;
pub mod config;
pub mod consume;
pub mod error;
