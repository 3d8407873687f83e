//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::lobby::MatchService;
use crate::store::{ApiClient, ApiError, GameStore};
use crate::util::rate_limit::{create_limiter, Limiter, MATCH_CREATION_RATE_LIMIT};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lobby: Arc<MatchService>,
    pub match_registry: Arc<MatchRegistry>,
    pub creation_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let config = Arc::new(config);

        let game_store = GameStore::new(ApiClient::new(&config)?);
        let match_registry = Arc::new(MatchRegistry::new());
        let lobby = Arc::new(MatchService::new(
            config.clone(),
            match_registry.clone(),
            game_store.clone(),
        ));

        Ok(Self {
            config,
            lobby,
            match_registry,
            creation_limiter: create_limiter(MATCH_CREATION_RATE_LIMIT),
        })
    }
}
