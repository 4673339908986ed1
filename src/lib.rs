// Preservica export - library root

pub mod config;
pub mod error;
pub mod auth;
pub mod cache;
pub mod http_client;
pub mod orchestrator;
pub mod timing;
