//! Match task and registry

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::games::{CompletedGame, GameActionEntry, GameActionKind};
use crate::store::{ApiError, GameStore};
use crate::util::time::{FrameClock, JOIN_TIMEOUT, TICK_DURATION};
use crate::ws::protocol::{ClientMsg, PlayMode, TeamId};

use super::engine::{Game, GameConfig};
use super::roster::{generate_ai_team, MatchVariant, RosterData};
use super::team::Transport;

/// How long a started match survives with no human connected
pub const RECONNECT_GRACE: Duration = Duration::from_secs(60);

/// Inputs funnelled into the match task. `conn_id` names one socket, so a
/// late `Leave` from a replaced socket cannot unbind its successor.
#[derive(Debug)]
pub enum MatchInput {
    /// A connection for `user_id` is ready to receive messages
    Join {
        user_id: Uuid,
        conn_id: Uuid,
        tx: Transport,
    },
    /// A gameplay command
    Action { user_id: Uuid, msg: ClientMsg },
    /// The connection closed
    Leave { user_id: Uuid, conn_id: Uuid },
}

/// Why a match could not put both teams on the board
#[derive(Debug, thiserror::Error)]
pub enum PopulationError {
    #[error("roster fetch failed: {0}")]
    Roster(#[from] ApiError),

    #[error("player {0} has no characters")]
    EmptyRoster(Uuid),
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub mode: PlayMode,
    /// Listed players; the first one plays team 1
    pub players: Vec<Uuid>,
    pub input_tx: mpsc::Sender<MatchInput>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn team_of(&self, user_id: Uuid) -> Option<TeamId> {
        self.players
            .iter()
            .position(|p| *p == user_id)
            .map(|i| i as TeamId + 1)
    }

    pub fn is_listed(&self, user_id: Uuid) -> bool {
        self.team_of(user_id).is_some()
    }
}

/// Matches that are alive right now
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    /// Register `handle` unless its id is taken; the check and the insert
    /// happen under one shard lock
    pub fn try_insert(&self, handle: MatchHandle) -> bool {
        match self.matches.entry(handle.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One match: the only owner of its `Game`
pub struct GameMatch {
    game: Game,
    variant: MatchVariant,
    players: Vec<Uuid>,
    input_rx: mpsc::Receiver<MatchInput>,
    store: GameStore,
    rng: ChaCha8Rng,
    player_count: Arc<AtomicUsize>,
}

impl GameMatch {
    pub fn new(
        id: Uuid,
        seed: u64,
        config: GameConfig,
        players: Vec<Uuid>,
        store: GameStore,
    ) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            mode: config.mode,
            players: players.clone(),
            input_tx,
            player_count: player_count.clone(),
        };

        let game_match = Self {
            game: Game::new(id, seed, config),
            variant: MatchVariant::for_players(players.len()),
            players,
            input_rx,
            store,
            rng: ChaCha8Rng::seed_from_u64(seed.rotate_left(17)),
            player_count,
        };

        (game_match, handle)
    }

    /// Populate, wait for players, play, then write results back
    pub async fn run(mut self) {
        let match_id = self.game.id;
        info!(match_id = %match_id, variant = ?self.variant, "Match created");

        let populated = match self.fetch_rosters().await {
            Ok(rosters) => populate(&mut self.game, self.variant, &self.players, &rosters, &mut self.rng),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = populated {
            error!(match_id = %match_id, error = %e, "Team population failed");
            while let Ok(input) = self.input_rx.try_recv() {
                self.handle_input(input);
            }
            self.game.abort();
            return;
        }

        let created = Instant::now();
        let mut idle_since: Option<Instant> = None;
        let mut clock = FrameClock::new();
        let mut ticker = interval(TICK_DURATION);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            while let Ok(input) = self.input_rx.try_recv() {
                self.handle_input(input);
            }
            self.refresh_player_count();

            let dt = clock.step_ms();
            if !self.game.is_started() {
                if self.all_humans_connected() {
                    self.game.start();
                } else if created.elapsed() >= JOIN_TIMEOUT {
                    warn!(match_id = %match_id, "Players never showed up");
                    self.game.abort();
                }
            } else {
                self.game.advance(dt);
            }

            if self.game.is_started() && !self.game.is_over() {
                if self.any_human_connected() {
                    idle_since = None;
                } else {
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= RECONNECT_GRACE {
                        info!(match_id = %match_id, "Every player left, closing match");
                        let winner = self.abandoned_winner();
                        self.game.end_game(winner);
                    }
                }
            }

            if self.game.is_over() {
                break;
            }
        }

        if self.game.is_started() {
            self.persist_results().await;
        }
        info!(match_id = %match_id, "Match finished");
    }

    async fn fetch_rosters(&self) -> Result<Vec<RosterData>, ApiError> {
        match self.variant {
            MatchVariant::VsAi => {
                let roster = self.store.fetch_roster(self.players[0]).await?;
                Ok(vec![roster])
            }
            MatchVariant::Pvp => {
                let (a, b) = tokio::try_join!(
                    self.store.fetch_roster(self.players[0]),
                    self.store.fetch_roster(self.players[1]),
                )?;
                Ok(vec![a, b])
            }
        }
    }

    fn handle_input(&mut self, input: MatchInput) {
        match input {
            MatchInput::Join {
                user_id,
                conn_id,
                tx,
            } => {
                let Some(team) = self.team_for(user_id) else {
                    warn!(match_id = %self.game.id, user_id = %user_id, "Join from unlisted user");
                    return;
                };
                self.game.connect(user_id, team, conn_id, tx);
                self.refresh_player_count();
            }
            MatchInput::Action { user_id, msg } => match msg {
                ClientMsg::AbandonGame => self.game.abandon(user_id),
                // Answered by the connection itself
                ClientMsg::Ping { .. } => {}
                msg => match self.game.process_action(user_id, &msg) {
                    Ok(()) => self.log_action(user_id, msg),
                    Err(e) => {
                        debug!(match_id = %self.game.id, user_id = %user_id, reason = %e, "Action dropped");
                    }
                },
            },
            MatchInput::Leave { user_id, conn_id } => {
                self.game.disconnect(user_id, conn_id);
                self.refresh_player_count();
            }
        }
    }

    /// Connected humans, as reported to `/health`
    fn refresh_player_count(&self) {
        let connected = self
            .human_teams()
            .filter(|t| self.game.team(*t).is_connected())
            .count();
        self.player_count.store(connected, Ordering::Relaxed);
    }

    /// Best-effort action log; the match never waits on it
    fn log_action(&self, user_id: Uuid, msg: ClientMsg) {
        let Some(action_type) = GameActionKind::of(&msg) else {
            return;
        };
        let entry = GameActionEntry {
            game_id: self.game.id,
            player_id: user_id,
            action_type,
            details: msg,
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.insert_game_action(&entry).await {
                debug!(match_id = %entry.game_id, error = %e, "Action log write failed");
            }
        });
    }

    fn team_for(&self, user_id: Uuid) -> Option<TeamId> {
        self.players
            .iter()
            .position(|p| *p == user_id)
            .map(|i| i as TeamId + 1)
    }

    fn human_teams(&self) -> impl Iterator<Item = TeamId> + '_ {
        (1..=2).filter(move |t| !self.game.is_ai_team(*t))
    }

    fn all_humans_connected(&self) -> bool {
        self.human_teams().all(|t| self.game.team(t).is_connected())
    }

    fn any_human_connected(&self) -> bool {
        self.human_teams().any(|t| self.game.team(t).is_connected())
    }

    /// Nobody wins a PvP match both sides walked away from; the AI wins otherwise
    fn abandoned_winner(&self) -> Option<TeamId> {
        (1..=2).find(|t| self.game.is_ai_team(*t))
    }

    async fn persist_results(&mut self) {
        let match_id = self.game.id;
        for record in self.game.take_outcomes() {
            if let Err(e) = self.store.post_game_update(match_id, &record).await {
                error!(match_id = %match_id, user_id = %record.user_id, error = %e, "Failed to write rewards");
            }
        }

        let winner_team = self.game.winner();
        let completed = CompletedGame {
            game_id: match_id,
            winner_uid: winner_team
                .and_then(|t| self.game.team(t).player.as_ref())
                .map(|p| p.user_id),
            winner_team,
            duration_ms: self.game.duration_ms(),
            ended_at: Utc::now(),
        };
        if let Err(e) = self.store.complete_game(&completed).await {
            error!(match_id = %match_id, error = %e, "Failed to complete game");
        }
    }
}

/// Put both teams on the board. Rosters come in player order, and a player
/// without characters fails the whole match.
pub fn populate(
    game: &mut Game,
    variant: MatchVariant,
    players: &[Uuid],
    rosters: &[RosterData],
    rng: &mut impl Rng,
) -> Result<(), PopulationError> {
    if let Some((user_id, _)) = players
        .iter()
        .zip(rosters)
        .find(|(_, roster)| roster.characters.is_empty())
    {
        return Err(PopulationError::EmptyRoster(*user_id));
    }

    for (i, (user_id, roster)) in players.iter().zip(rosters).enumerate() {
        let team = i as TeamId + 1;
        game.install_team(team, roster.characters(team), Some(roster.profile(*user_id)));
    }

    if variant == MatchVariant::VsAi {
        let (size, level) = rosters
            .first()
            .map(|r| (r.characters.len(), r.total_level()))
            .unwrap_or((3, 3));
        let squad = generate_ai_team(2, level, size, game.config().mode, rng);
        game.install_team(2, squad, None);
        game.set_ai_team(2);
    }

    info!(
        match_id = %game.id,
        team1 = game.team(1).members.len(),
        team2 = game.team(2).members.len(),
        "Teams populated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::character::{CharacterClass, Stats};
    use crate::game::roster::{PlayerData, RosterCharacter};
    use crate::ws::protocol::ServerMsg;

    fn roster(name: &str, size: usize) -> RosterData {
        RosterData {
            player: PlayerData {
                name: name.to_string(),
                level: 4,
                elo: 1200,
            },
            characters: (0..size)
                .map(|i| RosterCharacter {
                    id: format!("{name}-{i}"),
                    name: format!("{name} {i}"),
                    portrait: String::new(),
                    class: CharacterClass::Warrior,
                    level: 2,
                    xp: 0,
                    stats: Stats::default(),
                    inventory: Vec::new(),
                    spells: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn vs_ai_fills_team_two_with_generated_units() {
        let mut game = Game::new(Uuid::new_v4(), 1, GameConfig::default());
        let user = Uuid::new_v4();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        populate(&mut game, MatchVariant::VsAi, &[user], &[roster("ana", 3)], &mut rng).unwrap();

        assert_eq!(game.team(1).members.len(), 3);
        assert_eq!(game.team(2).members.len(), 3);
        assert!(game.is_ai_team(2));
        assert!(!game.is_ai_team(1));
        assert!(game.team(2).members.iter().all(|c| c.ai.is_some()));
        assert!(game.team(2).player.is_none());
    }

    #[test]
    fn pvp_seats_players_in_listed_order() {
        let mut game = Game::new(Uuid::new_v4(), 1, GameConfig::default());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        populate(
            &mut game,
            MatchVariant::Pvp,
            &[a, b],
            &[roster("ana", 2), roster("bo", 4)],
            &mut rng,
        )
        .unwrap();

        assert_eq!(game.team(1).player.as_ref().map(|p| p.user_id), Some(a));
        assert_eq!(game.team(2).player.as_ref().map(|p| p.user_id), Some(b));
        assert_eq!(game.team(2).members.len(), 4);
        assert!(!game.is_ai_team(2));
    }

    #[test]
    fn empty_roster_fails_population() {
        let mut game = Game::new(Uuid::new_v4(), 1, GameConfig::default());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let result = populate(
            &mut game,
            MatchVariant::Pvp,
            &[a, b],
            &[roster("ana", 2), roster("bo", 0)],
            &mut rng,
        );
        assert!(matches!(result, Err(PopulationError::EmptyRoster(id)) if id == b));
        assert!(game.team(1).members.is_empty());
    }

    #[test]
    fn handle_maps_players_to_teams() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx, _rx) = mpsc::channel(1);
        let handle = MatchHandle {
            id: Uuid::new_v4(),
            mode: PlayMode::Casual,
            players: vec![a, b],
            input_tx: tx,
            player_count: Arc::new(AtomicUsize::new(0)),
        };
        assert_eq!(handle.team_of(a), Some(1));
        assert_eq!(handle.team_of(b), Some(2));
        assert!(!handle.is_listed(Uuid::new_v4()));
    }

    fn handle_for(id: Uuid, players: Vec<Uuid>) -> MatchHandle {
        let (tx, _rx) = mpsc::channel(1);
        MatchHandle {
            id,
            mode: PlayMode::Casual,
            players,
            input_tx: tx,
            player_count: Arc::new(AtomicUsize::new(1)),
        }
    }

    #[test]
    fn registry_tracks_lifecycle() {
        let registry = MatchRegistry::new();
        let id = Uuid::new_v4();
        assert!(registry.try_insert(handle_for(id, vec![Uuid::new_v4()])));
        assert!(registry.get(&id).is_some());
        assert_eq!(registry.active_matches(), 1);
        assert_eq!(registry.total_players(), 1);
        assert!(registry.remove(&id).is_some());
        assert_eq!(registry.active_matches(), 0);
    }

    #[test]
    fn registry_keeps_the_first_match_for_an_id() {
        let registry = MatchRegistry::new();
        let id = Uuid::new_v4();
        let first = Uuid::new_v4();
        assert!(registry.try_insert(handle_for(id, vec![first])));
        assert!(!registry.try_insert(handle_for(id, vec![Uuid::new_v4()])));
        assert_eq!(registry.active_matches(), 1);
        assert!(registry.get(&id).is_some_and(|h| h.is_listed(first)));
    }

    fn store() -> GameStore {
        let client = reqwest::Client::new();
        GameStore::new(crate::store::ApiClient::with_client(
            client,
            "http://127.0.0.1:9".to_string(),
            "test".to_string(),
        ))
    }

    #[tokio::test]
    async fn joins_and_leaves_go_through_the_match() {
        let user = Uuid::new_v4();
        let (mut game_match, handle) =
            GameMatch::new(Uuid::new_v4(), 5, GameConfig::default(), vec![user], store());
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        populate(
            &mut game_match.game,
            MatchVariant::VsAi,
            &[user],
            &[roster("ana", 2)],
            &mut rng,
        )
        .unwrap();

        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        game_match.handle_input(MatchInput::Join {
            user_id: user,
            conn_id,
            tx,
        });
        assert_eq!(handle.player_count(), 1);
        assert!(game_match.all_humans_connected());

        game_match.game.start();
        assert!(matches!(rx.try_recv(), Ok(ServerMsg::GameStatus(_))));

        game_match.handle_input(MatchInput::Action {
            user_id: user,
            msg: ClientMsg::AbandonGame,
        });
        assert!(game_match.game.is_over());
        assert_eq!(game_match.game.winner(), Some(2));

        game_match.handle_input(MatchInput::Leave {
            user_id: user,
            conn_id,
        });
        assert_eq!(handle.player_count(), 0);
        assert!(!game_match.any_human_connected());
    }

    #[tokio::test]
    async fn stale_leave_keeps_the_rejoined_socket() {
        let user = Uuid::new_v4();
        let (mut game_match, handle) =
            GameMatch::new(Uuid::new_v4(), 5, GameConfig::default(), vec![user], store());
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        populate(
            &mut game_match.game,
            MatchVariant::VsAi,
            &[user],
            &[roster("ana", 2)],
            &mut rng,
        )
        .unwrap();

        let (old_conn, new_conn) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx1, _rx1) = mpsc::unbounded_channel();
        game_match.handle_input(MatchInput::Join {
            user_id: user,
            conn_id: old_conn,
            tx: tx1,
        });
        game_match.game.start();

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        game_match.handle_input(MatchInput::Join {
            user_id: user,
            conn_id: new_conn,
            tx: tx2,
        });
        assert_eq!(handle.player_count(), 1);
        while rx2.try_recv().is_ok() {}

        game_match.handle_input(MatchInput::Leave {
            user_id: user,
            conn_id: old_conn,
        });
        assert!(game_match.any_human_connected());
        assert_eq!(handle.player_count(), 1);

        game_match.game.advance(30_000);
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn strangers_cannot_join() {
        let user = Uuid::new_v4();
        let (mut game_match, handle) =
            GameMatch::new(Uuid::new_v4(), 5, GameConfig::default(), vec![user], store());
        let (tx, _rx) = mpsc::unbounded_channel();
        game_match.handle_input(MatchInput::Join {
            user_id: Uuid::new_v4(),
            conn_id: Uuid::new_v4(),
            tx,
        });
        assert_eq!(handle.player_count(), 0);
    }
}
