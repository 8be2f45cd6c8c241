pub mod engine;
pub mod mirror;
pub mod session_log;
pub mod timer;
