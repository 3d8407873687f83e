//! Authoritative game orchestrator
//!
//! `Game` owns the board, both teams, the terrain, the turn queue and the
//! deferred-cast scheduler. It is driven from a single task: client and AI
//! actions come in through [`Game::process_team_action`], time moves forward
//! through [`Game::advance`]. Every client-supplied action is validated here
//! before anything changes, and rejected actions leave the state untouched.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ws::protocol::{
    ClientMsg, GameOutcome, GameStatus, League, PlayMode, ServerMsg, StatusEffect, TeamId,
    TeamView, Terrain, Tile,
};

use super::ai;
use super::character::{Character, Stats, UnitRef, TERRAIN_BURN_TICKS};
use super::combat::CombatSystem;
use super::effects::{self, Effect, EffectOutcome, Targeting};
use super::grid::{self, Grid, GRID_HEIGHT, GRID_WIDTH};
use super::rewards::{self, TeamReport};
use super::roster::spawn_tile;
use super::scheduler::{EventId, Scheduler};
use super::team::{PlayerProfile, Team, Transport};
use super::terrain::{TerrainManager, TerrainSideEffect, TerrainTransition};
use super::turns::{SpeedClass, TurnSystem};

/// What decides whether a unit may act right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActionGating {
    /// Any unit whose cooldown has run out
    #[default]
    Cooldown,
    /// Only the unit at the head of the turn queue
    TurnQueue,
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub grid_width: i32,
    pub grid_height: i32,
    pub mode: PlayMode,
    pub league: League,
    pub gating: ActionGating,
    pub cooldown_coefficient: f64,
    pub explicit_rejections: bool,
    pub max_score: u32,
    pub move_cooldown_ms: u64,
    pub attack_cooldown_ms: u64,
    pub status_tick_ms: u64,
    pub ai_tick_ms: u64,
    pub audience_tick_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            mode: PlayMode::Casual,
            league: League::Bronze,
            gating: ActionGating::Cooldown,
            cooldown_coefficient: 1.0,
            explicit_rejections: false,
            max_score: 2000,
            move_cooldown_ms: 1500,
            attack_cooldown_ms: 2000,
            status_tick_ms: 1000,
            ai_tick_ms: 500,
            audience_tick_ms: 30_000,
        }
    }
}

/// Why an action was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("game is not running")]
    GameNotRunning,
    #[error("connection is not bound to a team")]
    UnknownActor,
    #[error("message is not a game action")]
    NotAnAction,
    #[error("no such unit")]
    UnknownUnit,
    #[error("unit is knocked out")]
    Dead,
    #[error("unit is on cooldown")]
    OnCooldown,
    #[error("unit is casting")]
    Casting,
    #[error("unit is incapacitated")]
    Incapacitated,
    #[error("unit is muted")]
    Muted,
    #[error("not this unit's turn")]
    NotYourTurn,
    #[error("destination out of range")]
    OutOfRange,
    #[error("destination blocked")]
    Blocked,
    #[error("target not adjacent")]
    NotAdjacent,
    #[error("invalid target")]
    InvalidTarget,
    #[error("empty slot")]
    InvalidSlot,
    #[error("item would have no effect")]
    NotApplicable,
    #[error("not enough MP")]
    NotEnoughMp,
    #[error("no obstacle there")]
    NoObstacle,
}

/// A validated-shape command for one of the acting team's units
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Move {
        num: usize,
        tile: Tile,
    },
    Attack {
        num: usize,
        target: UnitRef,
    },
    ObstacleAttack {
        num: usize,
        tile: Tile,
    },
    UseItem {
        num: usize,
        tile: Tile,
        index: usize,
        target: Option<UnitRef>,
    },
    CastSpell {
        num: usize,
        tile: Tile,
        index: usize,
        target: Option<UnitRef>,
    },
    Pass {
        num: usize,
    },
}

pub fn other_team(team: TeamId) -> TeamId {
    if team == 1 {
        2
    } else {
        1
    }
}

fn target_ref(team: Option<TeamId>, default: TeamId, num: usize) -> Result<UnitRef, ActionError> {
    match team.unwrap_or(default) {
        t @ (1 | 2) => Ok(UnitRef::new(t, num)),
        _ => Err(ActionError::InvalidTarget),
    }
}

impl Action {
    pub fn num(&self) -> usize {
        match self {
            Action::Move { num, .. }
            | Action::Attack { num, .. }
            | Action::ObstacleAttack { num, .. }
            | Action::UseItem { num, .. }
            | Action::CastSpell { num, .. }
            | Action::Pass { num } => *num,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Move { .. } => "move",
            Action::Attack { .. } => "attack",
            Action::ObstacleAttack { .. } => "obstacleattack",
            Action::UseItem { .. } => "useitem",
            Action::CastSpell { .. } => "spell",
            Action::Pass { .. } => "passTurn",
        }
    }

    /// Interpret a client message sent by `team`. Targets default to the
    /// opposing team for attacks and spells, and to the sender's own team
    /// for items.
    pub fn from_client(msg: &ClientMsg, team: TeamId) -> Result<Self, ActionError> {
        let action = match msg {
            ClientMsg::Move { num, tile } => Action::Move {
                num: *num,
                tile: *tile,
            },
            ClientMsg::Attack {
                num,
                target,
                target_team,
            } => Action::Attack {
                num: *num,
                target: target_ref(*target_team, other_team(team), *target)?,
            },
            ClientMsg::ObstacleAttack { num, x, y } => Action::ObstacleAttack {
                num: *num,
                tile: Tile::new(*x, *y),
            },
            ClientMsg::UseItem {
                num,
                x,
                y,
                index,
                target_team,
                target,
            } => Action::UseItem {
                num: *num,
                tile: Tile::new(*x, *y),
                index: *index,
                target: target
                    .map(|t| target_ref(*target_team, team, t))
                    .transpose()?,
            },
            ClientMsg::Spell {
                num,
                x,
                y,
                index,
                target_team,
                target,
            } => Action::CastSpell {
                num: *num,
                tile: Tile::new(*x, *y),
                index: *index,
                target: target
                    .map(|t| target_ref(*target_team, other_team(team), t))
                    .transpose()?,
            },
            ClientMsg::PassTurn { num } => Action::Pass { num: *num },
            ClientMsg::AbandonGame | ClientMsg::Ping { .. } => {
                return Err(ActionError::NotAnAction)
            }
        };
        Ok(action)
    }
}

/// Spell waiting for its cast window to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCast {
    pub caster: UnitRef,
    pub spell: u32,
    pub location: Tile,
    pub target: Option<UnitRef>,
}

/// Rewards owed to a human team, queued for write-back
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub team: TeamId,
    pub user_id: Uuid,
    pub mode: PlayMode,
    pub spells_used: bool,
    pub outcome: GameOutcome,
}

fn team_index(team: TeamId) -> usize {
    if team == 2 {
        1
    } else {
        0
    }
}

fn unit_in(teams: &[Team; 2], unit: UnitRef) -> Option<&Character> {
    match unit.team {
        1 | 2 => teams[team_index(unit.team)].member(unit.num),
        _ => None,
    }
}

fn is_alive_in(teams: &[Team; 2], unit: UnitRef) -> bool {
    unit_in(teams, unit).is_some_and(|c| c.is_alive())
}

pub struct Game {
    pub id: Uuid,
    config: GameConfig,
    grid: Grid,
    occupancy: HashMap<Tile, UnitRef>,
    terrain: TerrainManager,
    teams: [Team; 2],
    ai_teams: [bool; 2],
    turns: TurnSystem,
    current_turn: Option<UnitRef>,
    scheduler: Scheduler<PendingCast>,
    /// Scheduled cast of each unit still in its cast window
    cast_events: HashMap<UnitRef, EventId>,
    rng: ChaCha8Rng,
    connections: HashMap<Uuid, TeamId>,
    clock_ms: u64,
    started_at: Option<u64>,
    game_over: bool,
    winner: Option<TeamId>,
    first_blood: bool,
    status_timer_ms: u64,
    ai_timer_ms: u64,
    audience_timer_ms: u64,
    outcomes: Vec<OutcomeRecord>,
}

impl Game {
    pub fn new(id: Uuid, seed: u64, config: GameConfig) -> Self {
        let grid = Grid::new(config.grid_width, config.grid_height);
        let max_score = config.max_score;
        Self {
            id,
            config,
            grid,
            occupancy: HashMap::new(),
            terrain: TerrainManager::default(),
            teams: [Team::new(1, max_score), Team::new(2, max_score)],
            ai_teams: [false, false],
            turns: TurnSystem::new(),
            current_turn: None,
            scheduler: Scheduler::new(),
            cast_events: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            connections: HashMap::new(),
            clock_ms: 0,
            started_at: None,
            game_over: false,
            winner: None,
            first_blood: false,
            status_timer_ms: 0,
            ai_timer_ms: 0,
            audience_timer_ms: 0,
            outcomes: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn terrain(&self) -> &TerrainManager {
        &self.terrain
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_over(&self) -> bool {
        self.game_over
    }

    pub fn winner(&self) -> Option<TeamId> {
        self.winner
    }

    pub fn current_turn(&self) -> Option<UnitRef> {
        self.current_turn
    }

    pub fn pending_casts(&self) -> usize {
        self.scheduler.len()
    }

    pub fn team(&self, team: TeamId) -> &Team {
        &self.teams[team_index(team)]
    }

    fn team_mut(&mut self, team: TeamId) -> &mut Team {
        &mut self.teams[team_index(team)]
    }

    pub fn unit(&self, unit: UnitRef) -> Option<&Character> {
        unit_in(&self.teams, unit)
    }

    fn unit_mut(&mut self, unit: UnitRef) -> Option<&mut Character> {
        match unit.team {
            1 | 2 => self.teams[team_index(unit.team)].member_mut(unit.num),
            _ => None,
        }
    }

    fn all_units(&self) -> Vec<UnitRef> {
        self.teams
            .iter()
            .flat_map(|t| t.members.iter().map(|c| c.unit))
            .collect()
    }

    pub fn occupant(&self, tile: Tile) -> Option<UnitRef> {
        self.occupancy.get(&tile).copied()
    }

    pub fn duration_ms(&self) -> u64 {
        self.started_at
            .map(|start| self.clock_ms.saturating_sub(start))
            .unwrap_or(0)
    }

    pub fn team_of(&self, user_id: Uuid) -> Option<TeamId> {
        self.connections.get(&user_id).copied()
    }

    pub fn is_ai_team(&self, team: TeamId) -> bool {
        self.ai_teams[team_index(team)]
    }

    /// Queued reward records, emptied on read
    pub fn take_outcomes(&mut self) -> Vec<OutcomeRecord> {
        std::mem::take(&mut self.outcomes)
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Put a roster on the board at the team's spawn tiles
    pub fn install_team(
        &mut self,
        team: TeamId,
        members: Vec<Character>,
        player: Option<PlayerProfile>,
    ) {
        let width = self.grid.width;
        self.occupancy.retain(|_, unit| unit.team != team);
        let t = self.team_mut(team);
        t.set_members(members);
        t.player = player;
        for (i, member) in t.members.iter_mut().enumerate() {
            member.position = spawn_tile(i, team, width);
        }
        let placed: Vec<(Tile, UnitRef)> = t.members.iter().map(|c| (c.position, c.unit)).collect();
        self.occupancy.extend(placed);
    }

    pub fn set_ai_team(&mut self, team: TeamId) {
        self.ai_teams[team_index(team)] = true;
    }

    /// Bind a connection to a team; rejoining replaces the old transport
    pub fn connect(&mut self, user_id: Uuid, team: TeamId, conn_id: Uuid, transport: Transport) {
        self.connections.insert(user_id, team);
        self.team_mut(team).connect(conn_id, transport);
        info!(match_id = %self.id, user_id = %user_id, team, conn_id = %conn_id, "Client bound to team");
        if self.is_started() {
            let status = self.game_status(team);
            self.send_to(team, ServerMsg::GameStatus(Box::new(status)));
        }
    }

    /// Unbind `conn_id` unless a newer connection already took its place
    pub fn disconnect(&mut self, user_id: Uuid, conn_id: Uuid) {
        let Some(team) = self.team_of(user_id) else {
            return;
        };
        if self.team_mut(team).disconnect(conn_id) {
            info!(match_id = %self.id, user_id = %user_id, team, "Client disconnected");
        } else {
            debug!(match_id = %self.id, user_id = %user_id, conn_id = %conn_id, "Stale connection closed");
        }
    }

    /// Lock in the rosters and open the board for actions
    pub fn start(&mut self) {
        if self.is_started() || self.game_over {
            return;
        }
        self.started_at = Some(self.clock_ms);
        let speeds: Vec<(UnitRef, i32)> = self
            .teams
            .iter()
            .flat_map(|t| t.members.iter().map(|c| (c.unit, c.stats.speed)))
            .collect();
        self.turns.initialize(speeds);

        for team in [1, 2] {
            let status = self.game_status(team);
            self.send_to(team, ServerMsg::GameStatus(Box::new(status)));
        }
        if self.config.gating == ActionGating::TurnQueue {
            self.advance_turn();
        }
        info!(
            match_id = %self.id,
            team1 = self.teams[0].members.len(),
            team2 = self.teams[1].members.len(),
            gating = ?self.config.gating,
            "Game started"
        );
    }

    /// Snapshot of the match from `team`'s side
    pub fn game_status(&self, team: TeamId) -> GameStatus {
        let view = |id: TeamId, private: bool| {
            let t = self.team(id);
            TeamView {
                team: id,
                player_name: t.player.as_ref().map(|p| p.name.clone()),
                score: private.then(|| t.score()),
                units: t.members.iter().map(|c| c.snapshot(private)).collect(),
            }
        };
        GameStatus {
            match_id: self.id,
            mode: self.config.mode,
            team,
            grid_width: self.grid.width,
            grid_height: self.grid.height,
            player: view(team, true),
            opponent: view(other_team(team), false),
            terrain: self.terrain.snapshot(),
            started: self.is_started(),
            game_over: self.game_over,
        }
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    fn send_to(&mut self, team: TeamId, msg: ServerMsg) {
        self.team_mut(team).send(msg);
    }

    fn broadcast(&mut self, msg: ServerMsg) {
        self.teams[0].send(msg.clone());
        self.teams[1].send(msg);
    }

    fn broadcast_statuses(&mut self, unit: UnitRef) {
        if let Some(c) = self.unit(unit) {
            let statuses = c.active_statuses();
            self.broadcast(ServerMsg::StatusChange {
                team: unit.team,
                num: unit.num,
                statuses,
            });
        }
    }

    fn flush_scores(&mut self) {
        for team in self.teams.iter_mut() {
            if let Some(score) = team.take_score_update() {
                team.send(ServerMsg::Score { score });
            }
        }
    }

    // ========================================================================
    // Board queries
    // ========================================================================

    pub fn is_free(&self, tile: Tile) -> bool {
        !self.occupancy.contains_key(&tile) && !self.terrain.has_obstacle(tile)
    }

    /// In the arena, free, and visible from `from`
    pub fn is_valid_destination(&self, from: Tile, to: Tile) -> bool {
        self.grid.contains(to)
            && self.is_free(to)
            && grid::line_of_sight(from, to, |c| self.is_free(c))
    }

    /// Tiles `unit` could move to right now
    pub fn reachable_tiles(&self, unit: UnitRef) -> Vec<Tile> {
        let Some(c) = self.unit(unit) else {
            return Vec::new();
        };
        self.grid
            .tiles_in_range(c.position, c.move_range)
            .into_iter()
            .filter(|t| self.is_valid_destination(c.position, *t))
            .collect()
    }

    /// Every occupant within `radius` of `center`, knocked out or not
    pub fn units_in_area(&self, center: Tile, radius: i32) -> Vec<UnitRef> {
        self.grid
            .tiles_in_area(center, radius)
            .into_iter()
            .filter_map(|t| self.occupant(t))
            .collect()
    }

    pub fn living_enemies(&self, team: TeamId) -> Vec<&Character> {
        self.team(other_team(team)).living().collect()
    }

    pub fn living_allies(&self, team: TeamId) -> Vec<&Character> {
        self.team(team).living().collect()
    }

    /// Centre tile maximising living enemies minus living allies caught in
    /// an area of `radius`, if that margin reaches `min_score`
    pub fn scan_grid_for_aoe(&self, team: TeamId, radius: i32, min_score: i32) -> Option<Tile> {
        let mut best: Option<(i32, Tile)> = None;
        for tile in self.grid.tiles() {
            let score: i32 = self
                .units_in_area(tile, radius)
                .into_iter()
                .filter(|u| is_alive_in(&self.teams, *u))
                .map(|u| if u.team == team { -1 } else { 1 })
                .sum();
            if score >= min_score && best.map_or(true, |(b, _)| score > b) {
                best = Some((score, tile));
            }
        }
        best.map(|(_, tile)| tile)
    }

    fn ensure_can_act(&self, unit: UnitRef) -> Result<&Character, ActionError> {
        let c = self.unit(unit).ok_or(ActionError::UnknownUnit)?;
        if !c.is_alive() {
            return Err(ActionError::Dead);
        }
        if c.casting {
            return Err(ActionError::Casting);
        }
        if c.is_incapacitated() {
            return Err(ActionError::Incapacitated);
        }
        match self.config.gating {
            ActionGating::Cooldown if c.cooldown_ms > 0 => Err(ActionError::OnCooldown),
            ActionGating::TurnQueue if self.current_turn != Some(unit) => {
                Err(ActionError::NotYourTurn)
            }
            _ => Ok(c),
        }
    }

    pub fn can_act(&self, unit: UnitRef) -> bool {
        self.ensure_can_act(unit).is_ok()
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Entry point for client messages; the acting team always comes from
    /// the connection, never from the payload
    pub fn process_action(&mut self, user_id: Uuid, msg: &ClientMsg) -> Result<(), ActionError> {
        let team = self.team_of(user_id).ok_or(ActionError::UnknownActor)?;
        let action = Action::from_client(msg, team).map_err(|e| {
            debug!(match_id = %self.id, user_id = %user_id, reason = %e, "Malformed action");
            e
        })?;
        self.process_team_action(team, action)
    }

    pub fn process_team_action(&mut self, team: TeamId, action: Action) -> Result<(), ActionError> {
        if !self.is_started() || self.game_over {
            return Err(ActionError::GameNotRunning);
        }
        let num = action.num();
        let name = action.name();

        self.team_mut(team).engagement.actions += 1;
        for t in self.teams.iter_mut() {
            t.snapshot_score();
        }

        let result = match action {
            Action::Move { num, tile } => self.handle_move(team, num, tile),
            Action::Attack { num, target } => self.handle_attack(team, num, target),
            Action::ObstacleAttack { num, tile } => self.handle_obstacle_attack(team, num, tile),
            Action::UseItem {
                num,
                tile,
                index,
                target,
            } => self.handle_use_item(team, num, tile, index, target),
            Action::CastSpell {
                num,
                tile,
                index,
                target,
            } => self.handle_cast(team, num, tile, index, target),
            Action::Pass { num } => self.handle_pass(team, num),
        };

        if let Err(e) = &result {
            debug!(match_id = %self.id, team, num, action = name, reason = %e, "Action rejected");
            if self.config.explicit_rejections {
                self.send_to(
                    team,
                    ServerMsg::Rejected {
                        reason: e.to_string(),
                    },
                );
            }
        }

        self.flush_scores();
        self.check_end_game();
        result
    }

    fn handle_move(&mut self, team: TeamId, num: usize, to: Tile) -> Result<(), ActionError> {
        let me = UnitRef::new(team, num);
        let (from, range) = {
            let c = self.ensure_can_act(me)?;
            (c.position, c.move_range)
        };
        if from.dist_sq(to) > range * range {
            return Err(ActionError::OutOfRange);
        }
        if !self.is_valid_destination(from, to) {
            return Err(ActionError::Blocked);
        }

        let crossed: Vec<Terrain> = grid::cells_on_the_way(from, to)
            .into_iter()
            .filter(|c| *c != from && *c != to)
            .map(|c| self.terrain.get(c))
            .filter(|t| *t != Terrain::None)
            .collect();
        let landing = self.terrain.get(to);

        self.occupancy.remove(&from);
        self.occupancy.insert(to, me);

        let base = self.config.move_cooldown_ms;
        let coefficient = self.config.cooldown_coefficient;
        let (cooldown, statuses_changed) = {
            let c = self.unit_mut(me).ok_or(ActionError::UnknownUnit)?;
            c.stop_terrain_effect();
            let mut changed = false;
            for terrain in crossed {
                changed |= c.cross_terrain(terrain);
            }
            c.position = to;
            changed |= c.set_up_terrain(landing);
            let cooldown = c.cooldown_duration(base, coefficient);
            c.set_cooldown(cooldown);
            (cooldown, changed)
        };

        self.team_mut(team).engagement.moves += 1;
        self.broadcast(ServerMsg::Move { team, num, tile: to });
        self.send_to(team, ServerMsg::Cooldown { num, cooldown });
        if statuses_changed {
            self.broadcast_statuses(me);
        }
        self.after_action(me, SpeedClass::Fast);
        Ok(())
    }

    fn handle_attack(&mut self, team: TeamId, num: usize, target: UnitRef) -> Result<(), ActionError> {
        let me = UnitRef::new(team, num);
        let (position, atk) = {
            let c = self.ensure_can_act(me)?;
            (c.position, c.stats.atk)
        };
        let (target_position, def) = match self.unit(target) {
            Some(t) if t.is_alive() && target != me => (t.position, t.stats.def),
            _ => return Err(ActionError::InvalidTarget),
        };
        if !position.is_adjacent(target_position) {
            return Err(ActionError::NotAdjacent);
        }

        let damage = CombatSystem::calculate_damage(atk, def, &mut self.rng);
        let (hp, applied, is_kill) = {
            let t = self.unit_mut(target).ok_or(ActionError::InvalidTarget)?;
            let applied = -t.change_hp(-damage);
            (t.hp, applied, !t.is_alive())
        };
        let same_team = target.team == team;

        let base = self.config.attack_cooldown_ms;
        let coefficient = self.config.cooldown_coefficient;
        let cooldown = {
            let c = self.unit_mut(me).ok_or(ActionError::UnknownUnit)?;
            c.damage_dealt += applied as u32;
            c.record_interaction(target);
            let cooldown = c.cooldown_duration(base, coefficient);
            c.set_cooldown(cooldown);
            cooldown
        };

        let t = self.team_mut(team);
        t.engagement.offensive_actions += 1;
        if !same_team {
            t.increase_score_from_damage(applied as u32);
        }
        if is_kill {
            self.on_knockout(target, Some(me));
        }
        if self.terrain.has_obstacle(target_position) {
            self.break_ice(target_position);
        }

        self.broadcast(ServerMsg::Attack {
            team,
            num,
            target_team: target.team,
            target: target.num,
            damage: -damage,
            hp,
            is_kill,
            same_team,
        });
        self.send_to(team, ServerMsg::Cooldown { num, cooldown });
        self.after_action(me, SpeedClass::Normal);
        Ok(())
    }

    fn handle_obstacle_attack(&mut self, team: TeamId, num: usize, tile: Tile) -> Result<(), ActionError> {
        let me = UnitRef::new(team, num);
        let position = self.ensure_can_act(me)?.position;
        if !position.is_adjacent(tile) {
            return Err(ActionError::NotAdjacent);
        }
        if !self.terrain.has_obstacle(tile) {
            return Err(ActionError::NoObstacle);
        }

        self.break_ice(tile);
        let base = self.config.attack_cooldown_ms;
        let coefficient = self.config.cooldown_coefficient;
        let cooldown = {
            let c = self.unit_mut(me).ok_or(ActionError::UnknownUnit)?;
            let cooldown = c.cooldown_duration(base, coefficient);
            c.set_cooldown(cooldown);
            cooldown
        };

        self.broadcast(ServerMsg::ObstacleAttack {
            team,
            num,
            x: tile.x,
            y: tile.y,
        });
        self.send_to(team, ServerMsg::Cooldown { num, cooldown });
        self.after_action(me, SpeedClass::Normal);
        Ok(())
    }

    fn handle_use_item(
        &mut self,
        team: TeamId,
        num: usize,
        tile: Tile,
        index: usize,
        target: Option<UnitRef>,
    ) -> Result<(), ActionError> {
        let me = UnitRef::new(team, num);
        let item = self
            .ensure_can_act(me)?
            .item(index)
            .ok_or(ActionError::InvalidSlot)?;

        let targets = match item.targeting {
            Targeting::Caster => vec![me],
            Targeting::Single => {
                let t = target.ok_or(ActionError::InvalidTarget)?;
                self.unit(t).ok_or(ActionError::InvalidTarget)?;
                vec![t]
            }
            Targeting::Area => self.units_in_area(tile, item.radius),
        };
        match targets.as_slice() {
            [] => return Err(ActionError::InvalidTarget),
            [single] => {
                let t = self.unit(*single).ok_or(ActionError::InvalidTarget)?;
                if !item.is_applicable(t) {
                    return Err(ActionError::NotApplicable);
                }
            }
            _ => {}
        }

        let seed = self.rng.gen();
        let outcomes = self.apply_effects(item.effects, item.status_removals, None, &targets, seed);

        let coefficient = self.config.cooldown_coefficient;
        let (cooldown, inventory) = {
            let c = self.unit_mut(me).ok_or(ActionError::UnknownUnit)?;
            c.consume_item(index);
            for t in &targets {
                c.record_interaction(*t);
            }
            let cooldown = c.cooldown_duration(item.cooldown_ms, coefficient);
            c.set_cooldown(cooldown);
            (cooldown, c.inventory_entries())
        };

        let revived = outcomes.iter().filter(|o| o.revived()).count();
        let healed: i32 = outcomes.iter().map(|o| o.hp_delta().max(0)).sum();
        let t = self.team_mut(team);
        t.engagement.items_used += 1;
        t.engagement.hp_healed += healed as u32;
        if revived > 0 {
            t.increase_score_from_revive(revived);
        }

        self.broadcast(ServerMsg::UseItem {
            team,
            num,
            item: item.id,
            name: item.name.to_string(),
            animation: item.animation.to_string(),
        });
        self.settle_outcomes(&outcomes, Some(me));
        self.send_to(team, ServerMsg::Cooldown { num, cooldown });
        self.send_to(team, ServerMsg::Inventory { num, inventory });
        self.after_action(me, SpeedClass::Fast);
        Ok(())
    }

    fn handle_cast(
        &mut self,
        team: TeamId,
        num: usize,
        tile: Tile,
        index: usize,
        target: Option<UnitRef>,
    ) -> Result<(), ActionError> {
        let me = UnitRef::new(team, num);
        let (spell, position) = {
            let c = self.ensure_can_act(me)?;
            if c.is_muted() {
                return Err(ActionError::Muted);
            }
            let spell = c.spell(index).ok_or(ActionError::InvalidSlot)?;
            if spell.cost > c.mp {
                return Err(ActionError::NotEnoughMp);
            }
            (spell, c.position)
        };

        let (location, single_target) = match spell.targeting {
            Targeting::Caster => (position, None),
            Targeting::Single => {
                let t = target.ok_or(ActionError::InvalidTarget)?;
                match self.unit(t) {
                    Some(u) if u.is_alive() && u.position == tile => (u.position, Some(t)),
                    _ => return Err(ActionError::InvalidTarget),
                }
            }
            Targeting::Area => {
                if !self.grid.contains(tile) {
                    return Err(ActionError::InvalidTarget);
                }
                (tile, None)
            }
        };

        let mp = {
            let c = self.unit_mut(me).ok_or(ActionError::UnknownUnit)?;
            c.change_mp(-spell.cost);
            c.casting = true;
            c.mp
        };
        let t = self.team_mut(team);
        t.engagement.spell_casts += 1;
        if !spell.is_healing() {
            t.engagement.offensive_actions += 1;
        }

        self.broadcast(ServerMsg::Cast {
            team,
            num,
            spell: spell.id,
            location,
        });
        self.send_to(
            team,
            ServerMsg::MpChange {
                team,
                num,
                mp,
                delta: -spell.cost,
            },
        );

        let due = self.clock_ms + spell.cast_time_ms;
        let event = self.scheduler.schedule(
            due,
            PendingCast {
                caster: me,
                spell: spell.id,
                location,
                target: single_target,
            },
        );
        self.cast_events.insert(me, event);
        debug!(match_id = %self.id, team, num, spell = spell.name, due, "Cast window opened");
        self.after_action(me, SpeedClass::Slow);
        self.resolve_due_casts();
        Ok(())
    }

    fn handle_pass(&mut self, team: TeamId, num: usize) -> Result<(), ActionError> {
        let me = UnitRef::new(team, num);
        if self.config.gating != ActionGating::TurnQueue {
            return Err(ActionError::NotAnAction);
        }
        if self.current_turn != Some(me) {
            return Err(ActionError::NotYourTurn);
        }
        self.after_action(me, SpeedClass::Pass);
        Ok(())
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn apply_effects(
        &mut self,
        effects: &[Effect],
        removals: &[StatusEffect],
        caster: Option<Stats>,
        targets: &[UnitRef],
        seed: u64,
    ) -> Vec<EffectOutcome> {
        targets
            .iter()
            .filter_map(|t| {
                let unit = self.unit_mut(*t)?;
                Some(effects::apply_to_target(
                    effects,
                    removals,
                    caster.as_ref(),
                    unit,
                    seed,
                ))
            })
            .collect()
    }

    /// Broadcast vitals changes and process knockouts
    fn settle_outcomes(&mut self, outcomes: &[EffectOutcome], source: Option<UnitRef>) {
        for o in outcomes {
            if o.hp_delta() != 0 {
                self.broadcast(ServerMsg::HpChange {
                    team: o.unit.team,
                    num: o.unit.num,
                    hp: o.hp_after,
                    delta: o.hp_delta(),
                });
            }
            if o.mp_delta() != 0 {
                self.send_to(
                    o.unit.team,
                    ServerMsg::MpChange {
                        team: o.unit.team,
                        num: o.unit.num,
                        mp: o.mp_after,
                        delta: o.mp_delta(),
                    },
                );
            }
            if o.statuses_removed > 0 {
                self.broadcast_statuses(o.unit);
            }
            if o.died() {
                self.on_knockout(o.unit, source);
            }
        }
    }

    fn resolve_due_casts(&mut self) {
        while !self.game_over {
            let Some(cast) = self.scheduler.pop_due(self.clock_ms) else {
                break;
            };
            self.cast_events.remove(&cast.caster);
            self.resolve_cast(cast);
            self.flush_scores();
            self.check_end_game();
        }
    }

    fn resolve_cast(&mut self, cast: PendingCast) {
        let me = cast.caster;
        let Some(spell) = effects::spell(cast.spell) else {
            return;
        };

        let caster_stats = match self.unit(me) {
            Some(c) if c.is_alive() => c.stats,
            _ => {
                if let Some(c) = self.unit_mut(me) {
                    c.casting = false;
                }
                debug!(match_id = %self.id, team = me.team, num = me.num, spell = spell.name, "Cast fizzled");
                self.broadcast(ServerMsg::EndCast {
                    team: me.team,
                    num: me.num,
                });
                return;
            }
        };

        let targets: Vec<UnitRef> = match spell.targeting {
            Targeting::Caster => vec![me],
            Targeting::Single => cast
                .target
                .filter(|t| {
                    self.unit(*t)
                        .is_some_and(|u| spell.effects.iter().any(|e| e.targets(u)))
                })
                .into_iter()
                .collect(),
            Targeting::Area => self
                .units_in_area(cast.location, spell.radius)
                .into_iter()
                .filter(|u| is_alive_in(&self.teams, *u))
                .collect(),
        };

        let seed = self.rng.gen();
        let outcomes = self.apply_effects(spell.effects, &[], Some(caster_stats), &targets, seed);

        let mut hits = 0;
        let mut dealt = 0u32;
        let mut enemy_damage = 0u32;
        let mut heals: Vec<(f64, u32)> = Vec::new();
        for o in &outcomes {
            let delta = o.hp_delta();
            if delta < 0 {
                hits += 1;
                dealt += (-delta) as u32;
                if o.unit.team != me.team {
                    enemy_damage += (-delta) as u32;
                }
            } else if delta > 0 {
                let max = self.unit(o.unit).map(|u| u.max_hp()).unwrap_or(1).max(1);
                heals.push((o.hp_before as f64 / max as f64, delta as u32));
            }
        }

        let coefficient = self.config.cooldown_coefficient;
        let cooldown = match self.unit_mut(me) {
            Some(c) => {
                c.casting = false;
                c.damage_dealt += dealt;
                for t in &targets {
                    c.record_interaction(*t);
                }
                let cooldown = c.cooldown_duration(spell.cooldown_ms, coefficient);
                c.set_cooldown(cooldown);
                cooldown
            }
            None => 0,
        };

        let team = self.team_mut(me.team);
        team.increase_score_from_damage(enemy_damage);
        for (ratio, amount) in heals {
            team.increase_score_from_heal(ratio, amount);
        }
        team.increase_score_from_multi_hits(hits);
        team.increase_score_from_spell(spell.score);

        self.settle_outcomes(&outcomes, Some(me));

        if let Some(terrain) = spell.terrain {
            let transitions = self
                .terrain
                .apply_spell(&self.grid, terrain, cast.location, spell.radius);
            if transitions.iter().any(|t| t.current != Terrain::None) {
                self.team_mut(me.team).increase_score_from_terrain();
            }
            self.apply_terrain_transitions(&transitions);
        }

        if let Some(infliction) = spell.status {
            for o in &outcomes {
                let roll = self.rng.gen_bool(infliction.chance.clamp(0.0, 1.0));
                let inflicted = roll
                    && self
                        .unit_mut(o.unit)
                        .is_some_and(|u| u.add_status(infliction.status, infliction.ticks));
                if inflicted {
                    self.team_mut(me.team).increase_score_from_status();
                    self.broadcast_statuses(o.unit);
                }
            }
        }

        self.send_to(
            me.team,
            ServerMsg::Cooldown {
                num: me.num,
                cooldown,
            },
        );
        self.broadcast(ServerMsg::EndCast {
            team: me.team,
            num: me.num,
        });
    }

    fn on_knockout(&mut self, victim: UnitRef, killer: Option<UnitRef>) {
        self.team_mut(victim.team).reset_kill_streak();
        if let Some(event) = self.cast_events.remove(&victim) {
            if let Some(cast) = self.scheduler.cancel(event) {
                if let Some(c) = self.unit_mut(victim) {
                    c.casting = false;
                }
                debug!(match_id = %self.id, team = victim.team, num = victim.num, spell = cast.spell, "Pending cast dropped");
                self.broadcast(ServerMsg::EndCast {
                    team: victim.team,
                    num: victim.num,
                });
            }
        }
        if let Some(killer) = killer.filter(|k| k.team != victim.team) {
            if !self.first_blood {
                self.first_blood = true;
                self.team_mut(killer.team).increase_score_from_first_blood();
            }
            let ratio = self.unit(killer).map(|c| c.hp_ratio()).unwrap_or(1.0);
            self.team_mut(killer.team).increase_score_from_kill(ratio);
        }
        info!(match_id = %self.id, team = victim.team, num = victim.num, "Unit knocked out");
    }

    fn break_ice(&mut self, tile: Tile) {
        if let Some(transition) = self.terrain.remove_ice(tile) {
            self.apply_terrain_transitions(&[transition]);
        }
    }

    /// Apply occupant side effects and broadcast the diff
    fn apply_terrain_transitions(&mut self, transitions: &[TerrainTransition]) {
        if transitions.is_empty() {
            return;
        }
        for transition in transitions {
            let Some(occupant) = self.occupant(transition.tile) else {
                continue;
            };
            let changed = match (transition.side_effect(), self.unit_mut(occupant)) {
                (Some(TerrainSideEffect::SetUp(terrain)), Some(c)) if c.is_alive() => {
                    c.set_up_terrain(terrain)
                }
                (Some(TerrainSideEffect::Remove(terrain)), Some(c)) => {
                    c.remove_terrain(terrain);
                    false
                }
                _ => false,
            };
            if changed {
                self.broadcast_statuses(occupant);
            }
        }
        self.broadcast(ServerMsg::Terrain {
            updates: transitions.iter().map(|t| t.to_update()).collect(),
        });
    }

    // ========================================================================
    // Turn queue
    // ========================================================================

    fn after_action(&mut self, unit: UnitRef, class: SpeedClass) {
        if self.config.gating != ActionGating::TurnQueue {
            return;
        }
        let speed = self.unit(unit).map(|c| c.stats.speed).unwrap_or(0);
        let teams = &self.teams;
        self.turns
            .process_action(unit, class, speed, |u| is_alive_in(teams, u), &mut self.rng);
        self.advance_turn();
    }

    fn advance_turn(&mut self) {
        let teams = &self.teams;
        self.current_turn = self.turns.next_actor(|u| is_alive_in(teams, u));
        if let Some(unit) = self.current_turn {
            self.broadcast(ServerMsg::Turn {
                team: unit.team,
                num: unit.num,
            });
        }
    }

    /// A unit that cannot act when its turn comes up passes automatically
    fn skip_unavailable_turn(&mut self) {
        match self.current_turn {
            Some(unit) if !self.unit(unit).is_some_and(|c| c.is_available()) => {
                self.after_action(unit, SpeedClass::Pass);
            }
            None => self.advance_turn(),
            _ => {}
        }
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Move the virtual clock forward by `dt_ms`
    pub fn advance(&mut self, dt_ms: u64) {
        if !self.is_started() || self.game_over {
            return;
        }
        self.clock_ms += dt_ms;
        for team in self.teams.iter_mut() {
            for c in team.members.iter_mut() {
                c.tick_cooldown(dt_ms);
            }
        }

        self.resolve_due_casts();

        let status_every = self.config.status_tick_ms.max(1);
        self.status_timer_ms += dt_ms;
        while self.status_timer_ms >= status_every && !self.game_over {
            self.status_timer_ms -= status_every;
            self.status_tick();
            self.check_end_game();
        }

        let audience_every = self.config.audience_tick_ms.max(1);
        self.audience_timer_ms += dt_ms;
        while self.audience_timer_ms >= audience_every {
            self.audience_timer_ms -= audience_every;
            for team in self.teams.iter_mut() {
                team.increase_score_from_audience();
            }
        }

        let ai_every = self.config.ai_tick_ms.max(1);
        self.ai_timer_ms += dt_ms;
        if self.ai_timer_ms >= ai_every {
            self.ai_timer_ms %= ai_every;
            self.ai_tick();
        }

        if self.config.gating == ActionGating::TurnQueue && !self.game_over {
            self.skip_unavailable_turn();
        }
        self.flush_scores();
        self.check_end_game();
    }

    fn status_tick(&mut self) {
        for unit in self.all_units() {
            let (damage, expired, hp) = {
                let Some(c) = self.unit_mut(unit) else {
                    continue;
                };
                if !c.is_alive() {
                    continue;
                }
                if c.standing_on == Terrain::Fire {
                    c.add_status(StatusEffect::Burn, TERRAIN_BURN_TICKS);
                }
                let owed = c.status_damage();
                let expired = c.tick_statuses();
                let damage = if owed > 0 { c.change_hp(-owed) } else { 0 };
                (damage, expired, c.hp)
            };
            if damage != 0 {
                self.broadcast(ServerMsg::HpChange {
                    team: unit.team,
                    num: unit.num,
                    hp,
                    delta: damage,
                });
                if hp == 0 {
                    self.on_knockout(unit, None);
                }
            }
            if expired {
                self.broadcast_statuses(unit);
            }
        }
    }

    fn ai_tick(&mut self) {
        for team in [1, 2] {
            if !self.is_ai_team(team) {
                continue;
            }
            for num in 1..=self.team(team).members.len() {
                if self.game_over {
                    return;
                }
                let me = UnitRef::new(team, num);
                if !self.can_act(me) {
                    continue;
                }
                let Some(mut brain) = self.unit_mut(me).and_then(|c| c.ai.take()) else {
                    continue;
                };
                let mut rng = ChaCha8Rng::seed_from_u64(self.rng.gen());
                let decision = ai::decide(self, me, &mut brain, &mut rng);
                if let Some(c) = self.unit_mut(me) {
                    c.ai = Some(brain);
                }
                if let Some(action) = decision {
                    let _ = self.process_team_action(team, action);
                }
            }
        }
    }

    // ========================================================================
    // End of game
    // ========================================================================

    fn check_end_game(&mut self) {
        if self.game_over || !self.is_started() {
            return;
        }
        if self.teams[0].is_defeated() {
            self.end_game(Some(2));
        } else if self.teams[1].is_defeated() {
            self.end_game(Some(1));
        }
    }

    /// Forfeit on behalf of `user_id`'s team
    pub fn abandon(&mut self, user_id: Uuid) {
        let Some(team) = self.team_of(user_id) else {
            return;
        };
        info!(match_id = %self.id, user_id = %user_id, team, "Team abandoned");
        if self.is_started() {
            self.end_game(Some(other_team(team)));
        } else {
            self.abort();
        }
    }

    fn team_report(&self, team: TeamId) -> TeamReport {
        let t = self.team(team);
        TeamReport {
            level: t.total_level(),
            actions: t.engagement.actions,
            offensive_actions: t.engagement.offensive_actions,
            hp_left: t.hp_left(),
            total_hp: t.total_hp(),
            hp_healed: t.engagement.hp_healed,
            interacted: t.members.iter().map(|c| c.interacted_count()).sum(),
        }
    }

    /// Terminal transition: compute and deliver rewards, queue write-back
    pub fn end_game(&mut self, winner: Option<TeamId>) {
        if self.game_over {
            return;
        }
        if !self.is_started() {
            self.abort();
            return;
        }
        self.game_over = true;
        self.winner = winner;
        self.scheduler.cancel_all();
        self.cast_events.clear();
        for team in self.teams.iter_mut() {
            for c in team.members.iter_mut() {
                c.casting = false;
            }
        }

        let duration = self.duration_ms();
        let mode = self.config.mode;
        let league = self.config.league;
        let reports = [self.team_report(1), self.team_report(2)];

        for team in [1u8, 2u8] {
            let i = team_index(team);
            let own = &reports[i];
            let other = &reports[1 - i];
            let is_winner = winner == Some(team);

            let grade = rewards::grade(own, other);
            let xp = rewards::compute_xp(own, other, duration, is_winner, mode);
            let gold = rewards::compute_gold(grade, is_winner, mode);
            let elo = if mode.is_ranked() {
                let own_elo = self.teams[i].player.as_ref().map(|p| p.elo);
                let other_elo = self.teams[1 - i].player.as_ref().map(|p| p.elo);
                own_elo.map(|e| e + rewards::elo_delta(e, other_elo.unwrap_or(e), is_winner))
            } else {
                None
            };

            let t = &mut self.teams[i];
            let characters = t.distribute_xp(xp);
            let score = t.score();
            let outcome = GameOutcome {
                is_winner,
                gold,
                xp,
                elo,
                grade: rewards::letter_grade(grade).to_string(),
                raw_grade: grade,
                score,
                key: rewards::chest_key(grade, mode),
                chests: rewards::compute_chests(score, mode, league),
                characters,
            };
            t.send(ServerMsg::GameEnd(outcome.clone()));

            if let Some(player) = &t.player {
                self.outcomes.push(OutcomeRecord {
                    team,
                    user_id: player.user_id,
                    mode,
                    spells_used: t.engagement.spell_casts > 0,
                    outcome,
                });
            }
        }

        info!(match_id = %self.id, winner = ?winner, duration_ms = duration, "Game over");
    }

    /// End before or during population: no winner, no rewards, nothing persisted
    pub fn abort(&mut self) {
        if self.game_over {
            return;
        }
        self.game_over = true;
        self.winner = None;
        self.scheduler.cancel_all();
        self.cast_events.clear();
        let outcome = GameOutcome {
            is_winner: false,
            gold: 0,
            xp: 0,
            elo: None,
            grade: rewards::letter_grade(0.0).to_string(),
            raw_grade: 0.0,
            score: 0,
            key: None,
            chests: Vec::new(),
            characters: Vec::new(),
        };
        self.broadcast(ServerMsg::GameEnd(outcome));
        warn!(match_id = %self.id, "Game aborted without a winner");
    }

    #[cfg(test)]
    pub(crate) fn relocate(&mut self, unit: UnitRef, tile: Tile) {
        if let Some(c) = self.unit_mut(unit) {
            let from = c.position;
            c.position = tile;
            if self.occupancy.get(&from) == Some(&unit) {
                self.occupancy.remove(&from);
            }
            self.occupancy.insert(tile, unit);
        }
    }

    #[cfg(test)]
    pub(crate) fn paint_terrain(&mut self, terrain: Terrain, tile: Tile) {
        let transitions = self.terrain.apply_spell(&self.grid, terrain, tile, 0);
        self.apply_terrain_transitions(&transitions);
    }

    #[cfg(test)]
    pub(crate) fn unit_mut_for_test(&mut self, unit: UnitRef) -> &mut Character {
        self.unit_mut(unit).expect("unit exists")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::character::{CharacterClass, InventorySlot};
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio_test::{assert_err, assert_ok};

    struct Duel {
        game: Game,
        p1: Uuid,
        p2: Uuid,
        rx1: UnboundedReceiver<ServerMsg>,
        rx2: UnboundedReceiver<ServerMsg>,
    }

    fn fighter(name: &str, stats: Stats) -> Character {
        Character::new(UnitRef::new(0, 0), name, CharacterClass::Warrior, stats)
    }

    fn sturdy() -> Stats {
        Stats {
            hp: 300,
            mp: 40,
            atk: 10,
            def: 0,
            spatk: 10,
            spdef: 0,
            speed: 10,
        }
    }

    fn profile(user_id: Uuid) -> PlayerProfile {
        PlayerProfile {
            user_id,
            name: "player".into(),
            level: 1,
            elo: 1200,
        }
    }

    fn duel_with(config: GameConfig, team1: Vec<Character>, team2: Vec<Character>) -> Duel {
        let mut game = Game::new(Uuid::new_v4(), 42, config);
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        game.install_team(1, team1, Some(profile(p1)));
        game.install_team(2, team2, Some(profile(p2)));
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        game.connect(p1, 1, Uuid::new_v4(), tx1);
        game.connect(p2, 2, Uuid::new_v4(), tx2);
        Duel {
            game,
            p1,
            p2,
            rx1,
            rx2,
        }
    }

    /// One unit each, face to face at (9,5) and (10,5)
    fn duel(gating: ActionGating) -> Duel {
        let config = GameConfig {
            gating,
            ..GameConfig::default()
        };
        let mut d = duel_with(config, vec![fighter("a", sturdy())], vec![fighter("b", sturdy())]);
        d.game.relocate(UnitRef::new(1, 1), Tile::new(9, 5));
        d.game.relocate(UnitRef::new(2, 1), Tile::new(10, 5));
        d.game.start();
        d
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn attack(target: usize) -> ClientMsg {
        ClientMsg::Attack {
            num: 1,
            target,
            target_team: None,
        }
    }

    #[test]
    fn melee_hit_lands_within_spread() {
        let mut d = duel(ActionGating::Cooldown);
        drain(&mut d.rx2);
        assert_ok!(d.game.process_action(d.p1, &attack(1)));

        let hp = d.game.unit(UnitRef::new(2, 1)).unwrap().hp;
        assert!((190..=210).contains(&hp), "{}", hp);

        let events = drain(&mut d.rx2);
        let hit = events
            .iter()
            .find_map(|m| match m {
                ServerMsg::Attack {
                    damage, same_team, ..
                } => Some((*damage, *same_team)),
                _ => None,
            })
            .unwrap();
        assert!((-110..=-90).contains(&hit.0));
        assert!(!hit.1);
    }

    #[test]
    fn second_attack_waits_for_cooldown() {
        let mut d = duel(ActionGating::Cooldown);
        assert_ok!(d.game.process_action(d.p1, &attack(1)));
        assert_eq!(
            d.game.process_action(d.p1, &attack(1)),
            Err(ActionError::OnCooldown)
        );
        d.game.advance(d.game.config().attack_cooldown_ms);
        assert_ok!(d.game.process_action(d.p1, &attack(1)));
    }

    #[test]
    fn rejected_action_changes_nothing() {
        let mut d = duel(ActionGating::Cooldown);
        let before = d.game.unit(UnitRef::new(1, 1)).unwrap().position;
        let far = ClientMsg::Move {
            num: 1,
            tile: Tile::new(2, 5),
        };
        assert_eq!(d.game.process_action(d.p1, &far), Err(ActionError::OutOfRange));
        assert_eq!(d.game.unit(UnitRef::new(1, 1)).unwrap().position, before);
        assert_eq!(d.game.unit(UnitRef::new(1, 1)).unwrap().cooldown_ms, 0);
    }

    #[test]
    fn explicit_rejections_are_reported() {
        let config = GameConfig {
            explicit_rejections: true,
            ..GameConfig::default()
        };
        let mut d = duel_with(config, vec![fighter("a", sturdy())], vec![fighter("b", sturdy())]);
        d.game.start();
        drain(&mut d.rx1);
        assert_err!(d.game.process_action(d.p1, &attack(1)));
        let events = drain(&mut d.rx1);
        assert!(events.iter().any(|m| matches!(m, ServerMsg::Rejected { .. })));
    }

    #[test]
    fn unit_numbers_resolve_inside_the_senders_team() {
        let mut d = duel(ActionGating::Cooldown);
        let step = ClientMsg::Move {
            num: 1,
            tile: Tile::new(12, 5),
        };
        assert_ok!(d.game.process_action(d.p2, &step));
        assert_eq!(d.game.unit(UnitRef::new(2, 1)).unwrap().position, Tile::new(12, 5));
        assert_eq!(d.game.unit(UnitRef::new(1, 1)).unwrap().position, Tile::new(9, 5));

        let stranger = Uuid::new_v4();
        assert_eq!(
            d.game.process_action(stranger, &step),
            Err(ActionError::UnknownActor)
        );
    }

    #[test]
    fn moves_respect_occupancy_and_sight() {
        let mut d = duel(ActionGating::Cooldown);
        let onto_enemy = ClientMsg::Move {
            num: 1,
            tile: Tile::new(10, 5),
        };
        assert_eq!(d.game.process_action(d.p1, &onto_enemy), Err(ActionError::Blocked));
        let through_enemy = ClientMsg::Move {
            num: 1,
            tile: Tile::new(11, 5),
        };
        assert_eq!(
            d.game.process_action(d.p1, &through_enemy),
            Err(ActionError::Blocked)
        );
        let around = ClientMsg::Move {
            num: 1,
            tile: Tile::new(9, 3),
        };
        assert_ok!(d.game.process_action(d.p1, &around));
        assert_eq!(d.game.occupant(Tile::new(9, 3)), Some(UnitRef::new(1, 1)));
        assert_eq!(d.game.occupant(Tile::new(9, 5)), None);
    }

    #[test]
    fn friendly_fire_is_flagged_by_the_server() {
        let config = GameConfig::default();
        let mut d = duel_with(
            config,
            vec![fighter("a", sturdy()), fighter("c", sturdy())],
            vec![fighter("b", sturdy())],
        );
        d.game.relocate(UnitRef::new(1, 1), Tile::new(4, 4));
        d.game.relocate(UnitRef::new(1, 2), Tile::new(5, 4));
        d.game.start();
        drain(&mut d.rx1);

        let hit_friend = ClientMsg::Attack {
            num: 1,
            target: 2,
            target_team: Some(1),
        };
        assert_ok!(d.game.process_action(d.p1, &hit_friend));
        let events = drain(&mut d.rx1);
        assert!(events
            .iter()
            .any(|m| matches!(m, ServerMsg::Attack { same_team: true, .. })));
        assert_eq!(d.game.team(1).score(), 0);
    }

    #[test]
    fn knockout_ends_the_game_once() {
        let mut d = duel(ActionGating::Cooldown);
        let mut swings = 0;
        while !d.game.is_over() {
            assert_ok!(d.game.process_action(d.p1, &attack(1)));
            d.game.advance(d.game.config().attack_cooldown_ms);
            swings += 1;
            assert!(swings < 10);
        }
        assert_eq!(d.game.winner(), Some(1));
        assert_eq!(
            d.game.process_action(d.p1, &attack(1)),
            Err(ActionError::GameNotRunning)
        );
        d.game.end_game(Some(2));
        assert_eq!(d.game.winner(), Some(1));

        let ends1: Vec<GameOutcome> = drain(&mut d.rx1)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::GameEnd(o) => Some(o),
                _ => None,
            })
            .collect();
        let ends2: Vec<GameOutcome> = drain(&mut d.rx2)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::GameEnd(o) => Some(o),
                _ => None,
            })
            .collect();
        assert_eq!(ends1.len(), 1);
        assert_eq!(ends2.len(), 1);
        assert!(ends1[0].is_winner);
        assert!(!ends2[0].is_winner);
        assert!(ends1[0].gold > 0);
        assert_eq!(ends2[0].gold, 0);
        assert!(ends1[0].xp > ends2[0].xp);

        let records = d.game.take_outcomes();
        assert_eq!(records.len(), 2);
        assert!(d.game.take_outcomes().is_empty());
    }

    #[test]
    fn time_stands_still_after_the_end() {
        let mut d = duel(ActionGating::Cooldown);
        assert_ok!(d.game.process_action(d.p1, &attack(1)));
        d.game.end_game(Some(1));
        let cooldown = d.game.unit(UnitRef::new(1, 1)).unwrap().cooldown_ms;
        let clock = d.game.clock_ms();
        d.game.advance(5000);
        assert_eq!(d.game.clock_ms(), clock);
        assert_eq!(d.game.unit(UnitRef::new(1, 1)).unwrap().cooldown_ms, cooldown);
    }

    fn caster_duel() -> Duel {
        let mut mage = fighter("mage", sturdy());
        mage.spells = vec![0, 3];
        let mut d = duel_with(
            GameConfig::default(),
            vec![mage],
            vec![fighter("b", sturdy()), fighter("c", sturdy())],
        );
        d.game.relocate(UnitRef::new(1, 1), Tile::new(4, 5));
        d.game.relocate(UnitRef::new(2, 1), Tile::new(12, 5));
        d.game.relocate(UnitRef::new(2, 2), Tile::new(12, 6));
        d.game.start();
        d
    }

    fn fire_at(x: i32, y: i32) -> ClientMsg {
        ClientMsg::Spell {
            num: 1,
            x,
            y,
            index: 0,
            target_team: None,
            target: None,
        }
    }

    #[test]
    fn spell_resolves_after_cast_window() {
        let mut d = caster_duel();
        drain(&mut d.rx2);
        assert_ok!(d.game.process_action(d.p1, &fire_at(12, 5)));

        let mage = d.game.unit(UnitRef::new(1, 1)).unwrap();
        assert!(mage.casting);
        assert_eq!(mage.mp, 35);
        assert_eq!(d.game.unit(UnitRef::new(2, 1)).unwrap().hp, 300);
        assert_eq!(
            d.game.process_action(d.p1, &attack(1)),
            Err(ActionError::Casting)
        );

        d.game.advance(999);
        assert_eq!(d.game.unit(UnitRef::new(2, 1)).unwrap().hp, 300);
        d.game.advance(1);
        assert!(!d.game.unit(UnitRef::new(1, 1)).unwrap().casting);
        assert!(d.game.unit(UnitRef::new(2, 1)).unwrap().hp < 300);
        assert!(d.game.unit(UnitRef::new(2, 2)).unwrap().hp < 300);
        assert_eq!(d.game.terrain().get(Tile::new(12, 5)), Terrain::Fire);

        let events = drain(&mut d.rx2);
        assert!(events.iter().any(|m| matches!(m, ServerMsg::Cast { .. })));
        assert!(events.iter().any(|m| matches!(m, ServerMsg::EndCast { .. })));
        assert!(events.iter().any(|m| matches!(m, ServerMsg::Terrain { .. })));
        let burning = d.game.unit(UnitRef::new(2, 1)).unwrap();
        assert!(burning.has_status(StatusEffect::Burn));
    }

    #[test]
    fn multi_hit_spell_scores_the_bonus() {
        let mut d = caster_duel();
        assert_ok!(d.game.process_action(d.p1, &fire_at(12, 5)));
        d.game.advance(1000);
        // two enemy hits: 6^2 multi-hit bonus, spell base, damage and terrain on top
        assert!(d.game.team(1).score() > 36 + 100 + 20);
    }

    #[test]
    fn dead_caster_fizzles() {
        let mut d = caster_duel();
        assert_ok!(d.game.process_action(d.p1, &fire_at(12, 5)));
        assert_eq!(d.game.pending_casts(), 1);
        d.game.unit_mut_for_test(UnitRef::new(1, 1)).change_hp(-10_000);
        d.game.advance(1000);
        assert_eq!(d.game.unit(UnitRef::new(2, 1)).unwrap().hp, 300);
        assert_eq!(d.game.terrain().get(Tile::new(12, 5)), Terrain::None);
        assert!(d.game.is_over());
        assert_eq!(d.game.winner(), Some(2));
    }

    #[test]
    fn knocked_out_caster_loses_its_pending_cast() {
        let mut mage = fighter("mage", sturdy());
        mage.spells = vec![0];
        let mut d = duel_with(
            GameConfig::default(),
            vec![mage, fighter("guard", sturdy())],
            vec![fighter("b", sturdy())],
        );
        d.game.relocate(UnitRef::new(1, 1), Tile::new(9, 5));
        d.game.relocate(UnitRef::new(2, 1), Tile::new(10, 5));
        d.game.start();

        assert_ok!(d.game.process_action(d.p1, &fire_at(12, 5)));
        assert_eq!(d.game.pending_casts(), 1);
        d.game.unit_mut_for_test(UnitRef::new(1, 1)).hp = 1;
        drain(&mut d.rx1);

        assert_ok!(d.game.process_action(d.p2, &attack(1)));
        assert!(!d.game.unit(UnitRef::new(1, 1)).unwrap().is_alive());
        assert_eq!(d.game.pending_casts(), 0);
        assert!(!d.game.is_over());
        assert!(!d.game.unit(UnitRef::new(1, 1)).unwrap().casting);
        assert!(drain(&mut d.rx1)
            .iter()
            .any(|m| matches!(m, ServerMsg::EndCast { team: 1, num: 1 })));

        d.game.advance(1000);
        assert_eq!(d.game.terrain().get(Tile::new(12, 5)), Terrain::None);
    }

    #[test]
    fn walking_through_fire_burns() {
        let mut d = duel(ActionGating::Cooldown);
        d.game.paint_terrain(Terrain::Fire, Tile::new(9, 4));
        drain(&mut d.rx2);

        let through = ClientMsg::Move {
            num: 1,
            tile: Tile::new(9, 2),
        };
        assert_ok!(d.game.process_action(d.p1, &through));

        let walker = d.game.unit(UnitRef::new(1, 1)).unwrap();
        assert_eq!(walker.position, Tile::new(9, 2));
        assert_eq!(d.game.terrain().get(Tile::new(9, 2)), Terrain::None);
        assert!(walker.has_status(StatusEffect::Burn));
        assert!(drain(&mut d.rx2)
            .iter()
            .any(|m| matches!(m, ServerMsg::StatusChange { team: 1, num: 1, .. })));
    }

    #[test]
    fn ending_hands_out_chests_and_keys() {
        let config = GameConfig {
            mode: PlayMode::Ranked,
            league: League::Gold,
            ..GameConfig::default()
        };
        let mut d = duel_with(config, vec![fighter("a", sturdy())], vec![fighter("b", sturdy())]);
        d.game.start();
        d.game.end_game(Some(1));

        let records = d.game.take_outcomes();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert!(record.outcome.key.is_some());
            assert!(record.outcome.chests.is_empty());
            assert!(!record.spells_used);
        }
    }

    #[test]
    fn ice_freezes_until_broken() {
        let mut d = caster_duel();
        let ice = ClientMsg::Spell {
            num: 1,
            x: 12,
            y: 5,
            index: 1,
            target_team: None,
            target: None,
        };
        assert_ok!(d.game.process_action(d.p1, &ice));
        d.game.advance(1000);
        assert!(d.game.terrain().has_obstacle(Tile::new(12, 5)));
        assert!(!d.game.can_act(UnitRef::new(2, 1)));

        let free_the_friend = ClientMsg::Attack {
            num: 2,
            target: 1,
            target_team: Some(2),
        };
        assert_ok!(d.game.process_action(d.p2, &free_the_friend));
        assert!(!d.game.terrain().has_obstacle(Tile::new(12, 5)));
        d.game.advance(10_000);
        assert!(d.game.can_act(UnitRef::new(2, 1)));
    }

    #[test]
    fn obstacle_attack_needs_ice() {
        let mut d = duel(ActionGating::Cooldown);
        let smash = ClientMsg::ObstacleAttack { num: 1, x: 9, y: 4 };
        assert_eq!(d.game.process_action(d.p1, &smash), Err(ActionError::NoObstacle));
    }

    #[test]
    fn items_heal_and_get_used_up() {
        let mut d = duel(ActionGating::Cooldown);
        d.game.unit_mut_for_test(UnitRef::new(1, 1)).inventory =
            vec![InventorySlot { item: 0, quantity: 1 }];
        let potion = ClientMsg::UseItem {
            num: 1,
            x: 9,
            y: 5,
            index: 0,
            target_team: None,
            target: None,
        };
        assert_eq!(
            d.game.process_action(d.p1, &potion),
            Err(ActionError::NotApplicable)
        );

        d.game.unit_mut_for_test(UnitRef::new(1, 1)).hp = 100;
        drain(&mut d.rx1);
        assert_ok!(d.game.process_action(d.p1, &potion));
        let me = d.game.unit(UnitRef::new(1, 1)).unwrap();
        assert_eq!(me.hp, 150);
        assert!(me.inventory.is_empty());

        let events = drain(&mut d.rx1);
        assert!(events.iter().any(|m| matches!(m, ServerMsg::UseItem { .. })));
        assert!(events
            .iter()
            .any(|m| matches!(m, ServerMsg::Inventory { inventory, .. } if inventory.is_empty())));
        d.game.advance(10_000);
        assert_eq!(
            d.game.process_action(d.p1, &potion),
            Err(ActionError::InvalidSlot)
        );
    }

    #[test]
    fn turn_queue_only_lets_the_head_act() {
        let mut d = duel(ActionGating::TurnQueue);
        let head = d.game.current_turn().unwrap();
        let (first, second) = if head.team == 1 {
            (d.p1, d.p2)
        } else {
            (d.p2, d.p1)
        };
        assert_eq!(
            d.game.process_action(second, &attack(1)),
            Err(ActionError::NotYourTurn)
        );
        assert_ok!(d.game.process_action(first, &attack(1)));
        assert_ne!(d.game.current_turn(), Some(head));
        // cooldowns do not gate in this mode
        assert_ok!(d.game.process_action(second, &attack(1)));
    }

    #[test]
    fn passing_requires_turn_queue() {
        let mut d = duel(ActionGating::Cooldown);
        assert_eq!(
            d.game.process_action(d.p1, &ClientMsg::PassTurn { num: 1 }),
            Err(ActionError::NotAnAction)
        );
    }

    #[test]
    fn aborting_rewards_nobody() {
        let mut d = duel_with(
            GameConfig::default(),
            vec![fighter("a", sturdy())],
            vec![fighter("b", sturdy())],
        );
        d.game.abort();
        assert!(d.game.is_over());
        assert_eq!(d.game.winner(), None);
        assert!(d.game.take_outcomes().is_empty());
        let ends: Vec<ServerMsg> = drain(&mut d.rx1)
            .into_iter()
            .filter(|m| matches!(m, ServerMsg::GameEnd(_)))
            .collect();
        assert_eq!(ends.len(), 1);
    }

    #[test]
    fn abandoning_hands_the_win_over() {
        let mut d = duel(ActionGating::Cooldown);
        d.game.abandon(d.p1);
        assert_eq!(d.game.winner(), Some(2));
    }

    #[test]
    fn aoe_scan_prefers_enemy_clusters() {
        let mut d = caster_duel();
        d.game.relocate(UnitRef::new(1, 1), Tile::new(3, 5));
        let best = d.game.scan_grid_for_aoe(1, 1, 2).unwrap();
        assert!(best.chebyshev(Tile::new(12, 5)) <= 1 && best.chebyshev(Tile::new(12, 6)) <= 1);
        assert_eq!(d.game.scan_grid_for_aoe(1, 1, 3), None);
    }

    #[test]
    fn reconnect_resends_status() {
        let mut d = duel(ActionGating::Cooldown);
        let (tx, mut rx) = mpsc::unbounded_channel();
        d.game.connect(d.p1, 1, Uuid::new_v4(), tx);
        let msgs = drain(&mut rx);
        assert!(matches!(msgs.first(), Some(ServerMsg::GameStatus(s)) if s.team == 1));
    }
}
