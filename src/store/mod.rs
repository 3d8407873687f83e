//! Data API integration

pub mod api;
pub mod games;

pub use api::{ApiClient, ApiError};
pub use games::GameStore;
