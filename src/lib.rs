pub mod api;
pub mod blockchain;
pub mod cli;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod services;
pub mod utils;
