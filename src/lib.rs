pub mod anvil;
pub mod api;
pub mod artifacts;
pub mod chain;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod workspace;

#[cfg(test)]
pub mod testing;
