// Redlog process host: configuration, logging, storage bootstrap and the
// operator command line

pub mod command; // Operator CLI commands
pub mod model; // Configuration
pub mod startup; // Logging and storage bootstrap

pub use model::config::Configuration;
