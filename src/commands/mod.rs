//! Command implementations for the CLI
//!
//! - start: Start the gateway server
//! - reload: Ask a running instance to reload its configuration
//! - test: Test configuration validity
//! - config: Configuration display and validation
//! - token: Mint a signed role token

pub mod config;
pub mod reload;
pub mod start;
pub mod test;
pub mod token;
