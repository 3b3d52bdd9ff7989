pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod execution;
pub mod feeds;
pub mod models;
pub mod risk;
pub mod server;
pub mod state;
