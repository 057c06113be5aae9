pub mod binding_manager;
pub mod client_cache;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod errors;
pub mod local_client;
pub mod models;
pub mod pending_queue;
pub mod platform;
pub mod proxy;
pub mod remote;
pub mod state_navigator;
pub mod store;

pub use controller::Controller;
pub use errors::CoreError;
