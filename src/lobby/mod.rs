//! Lobby-facing match creation

pub mod service;

pub use service::{CreateMatchRequest, CreatedMatch, LobbyError, MatchService};
