//! Rosters in, match results out

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::game::engine::OutcomeRecord;
use crate::game::roster::RosterData;
use crate::ws::protocol::{ClientMsg, GameOutcome, PlayMode, TeamId};

use super::api::{ApiClient, ApiError};

/// Reward write-back for one player
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate<'a> {
    pub uid: Uuid,
    pub game_id: Uuid,
    pub mode: PlayMode,
    pub spells_used: bool,
    pub outcomes: &'a GameOutcome,
}

/// Kinds of player action kept in the per-game action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameActionKind {
    SpellUse,
    ItemUse,
    Move,
    Attack,
}

impl GameActionKind {
    /// `None` for commands the log skips
    pub fn of(msg: &ClientMsg) -> Option<Self> {
        match msg {
            ClientMsg::Spell { .. } => Some(Self::SpellUse),
            ClientMsg::UseItem { .. } => Some(Self::ItemUse),
            ClientMsg::Move { .. } => Some(Self::Move),
            ClientMsg::Attack { .. } => Some(Self::Attack),
            _ => None,
        }
    }
}

/// One entry of the action log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameActionEntry {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub action_type: GameActionKind,
    pub details: ClientMsg,
}

/// Final record of a match
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedGame {
    pub game_id: Uuid,
    #[serde(rename = "winnerUID")]
    pub winner_uid: Option<Uuid>,
    pub winner_team: Option<TeamId>,
    pub duration_ms: u64,
    pub ended_at: DateTime<Utc>,
}

/// Game data operations against the data API
#[derive(Clone)]
pub struct GameStore {
    client: ApiClient,
}

impl GameStore {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Active roster of a player
    pub async fn fetch_roster(&self, user_id: Uuid) -> Result<RosterData, ApiError> {
        self.client
            .get("rosterData", &[("uid", user_id.to_string())])
            .await
    }

    pub async fn post_game_update(&self, game_id: Uuid, record: &OutcomeRecord) -> Result<(), ApiError> {
        let update = GameUpdate {
            uid: record.user_id,
            game_id,
            mode: record.mode,
            spells_used: record.spells_used,
            outcomes: &record.outcome,
        };
        self.client.post("postGameUpdate", &update).await
    }

    pub async fn insert_game_action(&self, entry: &GameActionEntry) -> Result<(), ApiError> {
        self.client.post("insertGameAction", entry).await
    }

    pub async fn complete_game(&self, game: &CompletedGame) -> Result<(), ApiError> {
        self.client.post("completeGame", game).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::GameOutcome;

    #[test]
    fn update_payload_uses_camel_case_keys() {
        let outcome = GameOutcome {
            is_winner: true,
            gold: 120,
            xp: 60,
            elo: None,
            grade: "A".to_string(),
            raw_grade: 0.82,
            score: 300,
            key: None,
            chests: Vec::new(),
            characters: Vec::new(),
        };
        let update = GameUpdate {
            uid: Uuid::nil(),
            game_id: Uuid::nil(),
            mode: PlayMode::Casual,
            spells_used: true,
            outcomes: &outcome,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("gameId").is_some());
        assert_eq!(json["spellsUsed"], true);
        assert_eq!(json["outcomes"]["gold"], 120);
        assert_eq!(json["outcomes"]["isWinner"], true);
        assert_eq!(json["outcomes"]["rawGrade"], 0.82);
        assert!(json["outcomes"].get("is_winner").is_none());
    }

    #[test]
    fn action_log_skips_non_gameplay_commands() {
        let spell = ClientMsg::Spell {
            num: 1,
            x: 2,
            y: 3,
            index: 0,
            target_team: None,
            target: None,
        };
        assert_eq!(GameActionKind::of(&spell), Some(GameActionKind::SpellUse));
        assert_eq!(GameActionKind::of(&ClientMsg::PassTurn { num: 1 }), None);
        assert_eq!(GameActionKind::of(&ClientMsg::AbandonGame), None);

        let entry = GameActionEntry {
            game_id: Uuid::nil(),
            player_id: Uuid::nil(),
            action_type: GameActionKind::SpellUse,
            details: spell,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["actionType"], "spell_use");
        assert_eq!(json["details"]["type"], "spell");
        assert!(json.get("playerId").is_some());
    }

    #[test]
    fn completed_game_names_the_winner() {
        let winner = Uuid::new_v4();
        let game = CompletedGame {
            game_id: Uuid::nil(),
            winner_uid: Some(winner),
            winner_team: Some(1),
            duration_ms: 90_000,
            ended_at: Utc::now(),
        };
        let json = serde_json::to_value(&game).unwrap();
        assert_eq!(json["winnerUID"], winner.to_string());
        assert_eq!(json["durationMs"], 90_000);
    }
}
