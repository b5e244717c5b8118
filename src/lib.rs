pub mod config;
pub mod error;
pub mod fetch;
pub mod services;
pub mod storage;
pub mod universe;
pub mod utils;

pub use error::{AppError, Result};
