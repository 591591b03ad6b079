pub mod cli;
pub mod config;
pub mod contracts;
pub mod core;
pub mod error;
pub mod runner;
pub mod stages;
pub mod utils;


pub use error::HarnessError;
