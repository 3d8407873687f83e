//! Match creation on behalf of the lobby

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::game::roster::MatchVariant;
use crate::game::{GameMatch, MatchRegistry};
use crate::store::GameStore;
use crate::ws::protocol::{League, PlayMode};

/// Body of `POST /matches`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMatchRequest {
    #[serde(default)]
    pub match_id: Option<Uuid>,
    pub mode: PlayMode,
    /// Ladder tier; picks the chest colours of ranked games
    #[serde(default)]
    pub league: League,
    pub players: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedMatch {
    pub match_id: Uuid,
    pub mode: PlayMode,
    pub players: Vec<Uuid>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("A match needs one or two players, got {0}")]
    PlayerCount(usize),

    #[error("A player is listed twice")]
    DuplicatePlayer,

    #[error("Mode {0:?} does not fit {1} player(s)")]
    ModeMismatch(PlayMode, usize),

    #[error("Match {0} already exists")]
    AlreadyExists(Uuid),
}

/// Checks a creation request before anything is spawned
pub fn validate(request: &CreateMatchRequest) -> Result<MatchVariant, LobbyError> {
    let count = request.players.len();
    if !(1..=2).contains(&count) {
        return Err(LobbyError::PlayerCount(count));
    }
    let unique: HashSet<&Uuid> = request.players.iter().collect();
    if unique.len() != count {
        return Err(LobbyError::DuplicatePlayer);
    }
    let variant = MatchVariant::for_players(count);
    if request.mode.is_vs_ai() != (variant == MatchVariant::VsAi) {
        return Err(LobbyError::ModeMismatch(request.mode, count));
    }
    Ok(variant)
}

/// Spawns match tasks and keeps the registry in sync with them
pub struct MatchService {
    config: Arc<Config>,
    registry: Arc<MatchRegistry>,
    store: GameStore,
}

impl MatchService {
    pub fn new(config: Arc<Config>, registry: Arc<MatchRegistry>, store: GameStore) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }

    pub fn create_match(&self, request: CreateMatchRequest) -> Result<CreatedMatch, LobbyError> {
        let variant = validate(&request)?;
        let match_id = request.match_id.unwrap_or_else(Uuid::new_v4);

        let seed = rand::random::<u64>();
        let (game_match, handle) = GameMatch::new(
            match_id,
            seed,
            self.config.game_config(request.mode, request.league),
            request.players.clone(),
            self.store.clone(),
        );
        if !self.registry.try_insert(handle) {
            return Err(LobbyError::AlreadyExists(match_id));
        }

        info!(
            match_id = %match_id,
            mode = ?request.mode,
            league = ?request.league,
            variant = ?variant,
            "Created new match"
        );

        let registry = self.registry.clone();
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove(&match_id);
            info!(match_id = %match_id, "Match removed from registry");
        });

        Ok(CreatedMatch {
            match_id,
            mode: request.mode,
            players: request.players,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: PlayMode, players: Vec<Uuid>) -> CreateMatchRequest {
        CreateMatchRequest {
            match_id: None,
            mode,
            league: League::default(),
            players,
        }
    }

    #[test]
    fn player_count_picks_the_variant() {
        let solo = request(PlayMode::CasualVsAi, vec![Uuid::new_v4()]);
        assert_eq!(validate(&solo), Ok(MatchVariant::VsAi));
        let duel = request(PlayMode::Ranked, vec![Uuid::new_v4(), Uuid::new_v4()]);
        assert_eq!(validate(&duel), Ok(MatchVariant::Pvp));
    }

    #[test]
    fn bad_requests_are_refused() {
        assert_eq!(
            validate(&request(PlayMode::Casual, vec![])),
            Err(LobbyError::PlayerCount(0))
        );
        let p = Uuid::new_v4();
        assert_eq!(
            validate(&request(PlayMode::Casual, vec![p, p])),
            Err(LobbyError::DuplicatePlayer)
        );
        assert!(matches!(
            validate(&request(PlayMode::Ranked, vec![p])),
            Err(LobbyError::ModeMismatch(PlayMode::Ranked, 1))
        ));
    }

    #[test]
    fn request_accepts_missing_match_id() {
        let raw = r#"{"mode":"practice","players":["6f1c2b54-3f65-4b8e-9d43-7f3b0f0f5a10"]}"#;
        let req: CreateMatchRequest = serde_json::from_str(raw).unwrap();
        assert!(req.match_id.is_none());
        assert_eq!(req.mode, PlayMode::Practice);
        assert_eq!(req.league, League::Bronze);
    }

    fn service() -> MatchService {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".into(),
            api_url: "http://127.0.0.1:9".into(),
            api_key: "test".into(),
            api_timeout: std::time::Duration::from_secs(1),
            jwt_secret: "secret".into(),
            internal_api_key: "lobby".into(),
            client_origin: "http://localhost:8080".into(),
            gating: crate::game::engine::ActionGating::Cooldown,
            cooldown_coefficient: 1.0,
            explicit_rejections: false,
            max_audience_score: 2000,
        };
        let store = GameStore::new(crate::store::ApiClient::with_client(
            reqwest::Client::new(),
            config.api_url.clone(),
            config.api_key.clone(),
        ));
        MatchService::new(Arc::new(config), Arc::new(MatchRegistry::new()), store)
    }

    #[tokio::test]
    async fn second_match_with_the_same_id_is_refused() {
        let lobby = service();
        let id = Uuid::new_v4();
        let first = CreateMatchRequest {
            match_id: Some(id),
            ..request(PlayMode::CasualVsAi, vec![Uuid::new_v4()])
        };
        let second = CreateMatchRequest {
            match_id: Some(id),
            ..request(PlayMode::Practice, vec![Uuid::new_v4()])
        };

        let created = lobby.create_match(first).unwrap();
        assert_eq!(created.match_id, id);
        assert_eq!(lobby.create_match(second).unwrap_err(), LobbyError::AlreadyExists(id));
        assert_eq!(
            lobby.registry.get(&id).map(|h| h.mode),
            Some(PlayMode::CasualVsAi)
        );
    }
}
