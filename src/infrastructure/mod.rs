pub mod config;
pub mod error;
pub mod memory_store;
pub mod store;
