//! Team aggregation: members, audience score, engagement counters, transport

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::{CharacterUpdate, ServerMsg, TeamId};

use super::character::{Character, UnitRef};
use super::rewards::xp_to_next_level;

/// Outbound channel to the team's connected client
pub type Transport = mpsc::UnboundedSender<ServerMsg>;

const MULTIHIT_SCORE_BASE: u32 = 6;
const KILL_SCORE_BONUS: f64 = 100.0;
const HEAL_SCORE_BONUS: f64 = 20.0;
const TERRAIN_SCORE_BONUS: u32 = 20;
const STATUS_SCORE_BONUS: u32 = 15;
const REVIVE_SCORE_BONUS: u32 = 50;
const FIRST_BLOOD_BONUS: u32 = 50;
pub const AUDIENCE_TICK_BONUS: u32 = 10;

/// Counters that only ever go up during a match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Engagement {
    pub actions: u32,
    pub offensive_actions: u32,
    pub spell_casts: u32,
    pub items_used: u32,
    pub moves: u32,
    pub statuses_inflicted: u32,
    pub hp_healed: u32,
    pub kills: u32,
    pub kill_streak: u32,
    pub best_kill_streak: u32,
}

/// The socket currently bound to a team
#[derive(Debug)]
struct Connection {
    id: Uuid,
    tx: Transport,
}

/// Account behind a human team
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProfile {
    pub user_id: Uuid,
    pub name: String,
    pub level: u32,
    pub elo: i32,
}

#[derive(Debug)]
pub struct Team {
    pub id: TeamId,
    pub members: Vec<Character>,
    pub player: Option<PlayerProfile>,
    pub engagement: Engagement,
    score: u32,
    score_snapshot: u32,
    max_score: u32,
    connection: Option<Connection>,
}

impl Team {
    pub fn new(id: TeamId, max_score: u32) -> Self {
        Self {
            id,
            members: Vec::new(),
            player: None,
            engagement: Engagement::default(),
            score: 0,
            score_snapshot: 0,
            max_score,
            connection: None,
        }
    }

    /// Replace the roster, numbering units 1..=n
    pub fn set_members(&mut self, members: Vec<Character>) {
        self.members = members
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                c.unit = UnitRef::new(self.id, i + 1);
                c
            })
            .collect();
    }

    pub fn member(&self, num: usize) -> Option<&Character> {
        num.checked_sub(1).and_then(|i| self.members.get(i))
    }

    pub fn member_mut(&mut self, num: usize) -> Option<&mut Character> {
        num.checked_sub(1).and_then(move |i| self.members.get_mut(i))
    }

    pub fn living(&self) -> impl Iterator<Item = &Character> {
        self.members.iter().filter(|c| c.is_alive())
    }

    /// No member left standing
    pub fn is_defeated(&self) -> bool {
        self.members.iter().all(|c| !c.is_alive())
    }

    pub fn total_level(&self) -> u32 {
        self.members.iter().map(|c| c.level).sum()
    }

    pub fn hp_left(&self) -> i32 {
        self.members.iter().map(|c| c.hp).sum()
    }

    pub fn total_hp(&self) -> i32 {
        self.members.iter().map(|c| c.max_hp()).sum()
    }

    // ------------------------------------------------------------------
    // Score
    // ------------------------------------------------------------------

    pub fn score(&self) -> u32 {
        self.score
    }

    fn add_score(&mut self, amount: u32) {
        self.score = self.score.saturating_add(amount).min(self.max_score);
    }

    pub fn increase_score_from_damage(&mut self, damage: u32) {
        self.add_score(damage);
    }

    /// Kills are worth more when the killer is low on health
    pub fn increase_score_from_kill(&mut self, killer_hp_ratio: f64) {
        self.engagement.kills += 1;
        self.engagement.kill_streak += 1;
        self.engagement.best_kill_streak =
            self.engagement.best_kill_streak.max(self.engagement.kill_streak);
        let bonus = KILL_SCORE_BONUS * (1.0 + (1.0 - killer_hp_ratio.clamp(0.0, 1.0)));
        self.add_score(bonus.round() as u32);
    }

    /// Heals are worth more the lower the target was
    pub fn increase_score_from_heal(&mut self, target_prev_hp_ratio: f64, amount: u32) {
        self.engagement.hp_healed += amount;
        let bonus = HEAL_SCORE_BONUS * (1.0 + (1.0 - target_prev_hp_ratio.clamp(0.0, 1.0)));
        self.add_score(bonus.round() as u32);
    }

    pub fn increase_score_from_multi_hits(&mut self, hits: usize) {
        if hits > 1 {
            let bonus = MULTIHIT_SCORE_BASE
                .checked_pow(hits as u32)
                .unwrap_or(u32::MAX);
            self.add_score(bonus);
        }
    }

    pub fn increase_score_from_spell(&mut self, base: u32) {
        self.add_score(base);
    }

    pub fn increase_score_from_terrain(&mut self) {
        self.add_score(TERRAIN_SCORE_BONUS);
    }

    pub fn increase_score_from_status(&mut self) {
        self.engagement.statuses_inflicted += 1;
        self.add_score(STATUS_SCORE_BONUS);
    }

    pub fn increase_score_from_revive(&mut self, revived: usize) {
        self.add_score(REVIVE_SCORE_BONUS * revived as u32);
    }

    pub fn increase_score_from_first_blood(&mut self) {
        self.add_score(FIRST_BLOOD_BONUS);
    }

    pub fn increase_score_from_audience(&mut self) {
        self.add_score(AUDIENCE_TICK_BONUS);
    }

    pub fn reset_kill_streak(&mut self) {
        self.engagement.kill_streak = 0;
    }

    /// Remember the score so a later flush only reports real changes
    pub fn snapshot_score(&mut self) {
        self.score_snapshot = self.score;
    }

    /// New score if it moved since the last snapshot
    pub fn take_score_update(&mut self) -> Option<u32> {
        if self.score == self.score_snapshot {
            return None;
        }
        self.score_snapshot = self.score;
        Some(self.score)
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Bind connection `conn_id`, replacing whichever one was bound before
    pub fn connect(&mut self, conn_id: Uuid, transport: Transport) {
        self.connection = Some(Connection {
            id: conn_id,
            tx: transport,
        });
    }

    /// Unbind `conn_id`; a connection that was already replaced changes nothing
    pub fn disconnect(&mut self, conn_id: Uuid) -> bool {
        match &self.connection {
            Some(c) if c.id == conn_id => {
                self.connection = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Deliver to the team's client; a closed channel drops the transport
    pub fn send(&mut self, msg: ServerMsg) {
        if let Some(c) = &self.connection {
            if c.tx.send(msg).is_err() {
                debug!(team = self.id, "Team transport closed");
                self.connection = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Progression
    // ------------------------------------------------------------------

    /// Split `xp` among members in proportion to the units each interacted with
    pub fn distribute_xp(&mut self, xp: u32) -> Vec<CharacterUpdate> {
        let total: usize = self.members.iter().map(|c| c.interacted_count()).sum();
        self.members
            .iter_mut()
            .map(|c| {
                let share = if total == 0 {
                    0
                } else {
                    (xp as f64 * c.interacted_count() as f64 / total as f64).round() as u32
                };
                let mut new_xp = c.xp + share;
                let mut level = c.level;
                while new_xp >= xp_to_next_level(level) {
                    new_xp -= xp_to_next_level(level);
                    level += 1;
                }
                let update = CharacterUpdate {
                    num: c.num(),
                    id: c.roster_id.clone(),
                    xp: share,
                    new_xp,
                    level,
                    leveled_up: level > c.level,
                };
                c.xp = new_xp;
                c.level = level;
                update
            })
            .collect()
    }
}
