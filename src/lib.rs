pub mod config;
pub mod error;
pub mod logging;
pub mod ranking;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod store;

pub use error::{RecipeError, Result};
pub use service::{DeletionMode, RecipeService};
