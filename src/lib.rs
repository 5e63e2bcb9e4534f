pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use models::*;
pub use services::*;
