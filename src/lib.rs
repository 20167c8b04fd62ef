pub mod app;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod output;
pub mod suggest;
