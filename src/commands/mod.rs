pub mod agent;
pub mod utils;

pub use agent::run_command;
