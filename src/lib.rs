pub mod auth;
pub mod config;
pub mod error;
pub mod grpc;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod rules;
