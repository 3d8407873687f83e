//! Arena rules and the per-match task

pub mod ai;
pub mod character;
pub mod combat;
pub mod effects;
pub mod engine;
pub mod grid;
pub mod r#match;
pub mod rewards;
pub mod roster;
pub mod scheduler;
pub mod team;
pub mod terrain;
pub mod turns;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry};
