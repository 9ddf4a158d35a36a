pub mod config;
pub mod database;
pub mod entities;
pub mod error;
pub mod events;
pub mod external;
pub mod models;
pub mod repositories;
pub mod services;
pub mod tasks;
pub mod utils;

pub use config::Config;
pub use error::{AppError, AppResult};
