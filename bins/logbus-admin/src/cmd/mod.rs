pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod report;
