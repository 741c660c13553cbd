pub mod app;
pub mod config;
pub mod error;
pub mod generate;
pub mod generator;
pub mod image_processing;
pub mod logging;
pub mod record;
pub mod replicate;
pub mod storage;
pub mod url_validation;
pub mod web_pages;

pub use app::{AppState, build_router};
pub use config::AppConfig;
pub use error::AppError;
