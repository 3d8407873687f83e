//! WebSocket protocol message definitions
//! These are the wire types for client-server communication. Event names
//! are lowercase (`useitem`, `hpchange`) except the few camelCase ones the
//! client listens for (`gameStatus`, `gameEnd`); every field is camelCase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Team identifier, always 1 or 2
pub type TeamId = u8;

/// Grid coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
}

impl Tile {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Terrain covering a tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    #[default]
    None,
    /// Burns whoever stands on or walks through it
    Fire,
    /// Obstacle that freezes its occupant
    Ice,
}

/// Timed status conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEffect {
    Freeze,
    Burn,
    Poison,
    Sleep,
    Paralyze,
    Mute,
    Haste,
}

impl StatusEffect {
    pub const ALL: [StatusEffect; 7] = [
        StatusEffect::Freeze,
        StatusEffect::Burn,
        StatusEffect::Poison,
        StatusEffect::Sleep,
        StatusEffect::Paralyze,
        StatusEffect::Mute,
        StatusEffect::Haste,
    ];

    /// Everything except Haste
    pub fn is_negative(self) -> bool {
        !matches!(self, StatusEffect::Haste)
    }
}

/// Game mode, drives reward coefficients and elo
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    Practice,
    #[default]
    Casual,
    CasualVsAi,
    Ranked,
    RankedVsAi,
}

impl PlayMode {
    pub fn is_ranked(self) -> bool {
        matches!(self, PlayMode::Ranked | PlayMode::RankedVsAi)
    }

    pub fn is_vs_ai(self) -> bool {
        matches!(self, PlayMode::Practice | PlayMode::CasualVsAi | PlayMode::RankedVsAi)
    }
}

/// Ranked ladder tier of a match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum League {
    #[default]
    Bronze,
    Silver,
    Gold,
    Zenith,
    Apex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChestColor {
    Bronze,
    Silver,
    Gold,
}

/// A chest earned from the audience score; contents are rolled when opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChestReward {
    pub color: ChestColor,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Move a unit to a tile
    Move { num: usize, tile: Tile },

    /// Melee attack on an adjacent unit
    Attack {
        num: usize,
        target: usize,
        /// Team of the target; defaults to the opposing team
        #[serde(default)]
        target_team: Option<TeamId>,
    },

    /// Break an adjacent ice obstacle
    ObstacleAttack { num: usize, x: i32, y: i32 },

    /// Use the item in inventory slot `index`
    UseItem {
        num: usize,
        x: i32,
        y: i32,
        index: usize,
        #[serde(default)]
        target_team: Option<TeamId>,
        #[serde(default)]
        target: Option<usize>,
    },

    /// Cast the spell in spell slot `index`
    Spell {
        num: usize,
        x: i32,
        y: i32,
        index: usize,
        #[serde(default)]
        target_team: Option<TeamId>,
        #[serde(default)]
        target: Option<usize>,
    },

    /// Give up the current turn (turn-queue gating)
    #[serde(rename = "passTurn")]
    PassTurn { num: usize },

    /// Forfeit the match
    #[serde(rename = "abandonGame")]
    AbandonGame,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: Uuid, server_time: u64 },

    /// Full snapshot of the match from one team's perspective
    #[serde(rename = "gameStatus")]
    GameStatus(Box<GameStatus>),

    Move {
        team: TeamId,
        num: usize,
        tile: Tile,
    },

    Attack {
        team: TeamId,
        num: usize,
        target_team: TeamId,
        target: usize,
        /// Signed HP delta applied to the target
        damage: i32,
        hp: i32,
        is_kill: bool,
        same_team: bool,
    },

    ObstacleAttack {
        team: TeamId,
        num: usize,
        x: i32,
        y: i32,
    },

    UseItem {
        team: TeamId,
        num: usize,
        item: u32,
        name: String,
        animation: String,
    },

    HpChange {
        team: TeamId,
        num: usize,
        hp: i32,
        delta: i32,
    },

    MpChange {
        team: TeamId,
        num: usize,
        mp: i32,
        delta: i32,
    },

    #[serde(rename = "statuseffectchange")]
    StatusChange {
        team: TeamId,
        num: usize,
        statuses: BTreeMap<StatusEffect, u32>,
    },

    /// A spell entered its cast window
    Cast {
        team: TeamId,
        num: usize,
        spell: u32,
        location: Tile,
    },

    /// A cast window closed
    EndCast { team: TeamId, num: usize },

    /// Cooldown assigned to one of the receiving team's units (ms)
    Cooldown { num: usize, cooldown: u64 },

    Inventory {
        num: usize,
        inventory: Vec<InventoryEntry>,
    },

    Terrain { updates: Vec<TerrainUpdate> },

    /// Receiving team's audience score
    Score { score: u32 },

    /// Next unit to act under turn-queue gating
    Turn { team: TeamId, num: usize },

    #[serde(rename = "gameEnd")]
    GameEnd(GameOutcome),

    /// Action refused by the server
    Rejected { reason: String },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// One tile's terrain after a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainUpdate {
    pub x: i32,
    pub y: i32,
    pub terrain: Terrain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub item: u32,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub match_id: Uuid,
    pub mode: PlayMode,
    pub team: TeamId,
    pub grid_width: i32,
    pub grid_height: i32,
    pub player: TeamView,
    pub opponent: TeamView,
    pub terrain: Vec<TerrainUpdate>,
    pub started: bool,
    pub game_over: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    pub team: TeamId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    /// Hidden for the opposing team
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    pub units: Vec<UnitSnapshot>,
}

/// Unit state; private fields only appear for the owning team
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSnapshot {
    pub num: usize,
    pub name: String,
    pub portrait: String,
    pub class: String,
    pub level: u32,
    pub x: i32,
    pub y: i32,
    pub hp: i32,
    pub max_hp: i32,
    pub casting: bool,
    pub statuses: BTreeMap<StatusEffect, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spells: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<InventoryEntry>>,
}

/// End-of-game rewards for one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOutcome {
    pub is_winner: bool,
    pub gold: u32,
    pub xp: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elo: Option<i32>,
    pub grade: String,
    pub raw_grade: f64,
    pub score: u32,
    /// Chest key; never handed out in practice
    pub key: Option<ChestColor>,
    pub chests: Vec<ChestReward>,
    pub characters: Vec<CharacterUpdate>,
}

/// Per-character progression produced by a finished game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdate {
    pub num: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub xp: u32,
    pub new_xp: u32,
    pub level: u32,
    pub leveled_up: bool,
}
