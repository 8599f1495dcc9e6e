pub mod cli;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod envkey;
pub mod errors;
pub mod identity;
pub mod keystore;
pub mod secrets;
pub mod server;
pub mod token;
