//! Team population: account rosters, generated AI squads, spawn layout

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::{PlayMode, TeamId, Tile};

use super::ai::AiState;
use super::character::{Character, CharacterClass, InventorySlot, Stats, UnitRef};
use super::team::PlayerProfile;

/// Largest team the spawn layout can place
pub const MAX_TEAM_SIZE: usize = 10;

/// Team 1 spawn tiles on a 20-wide board; team 2 mirrors them
const SPAWNS: [(i32, i32); MAX_TEAM_SIZE] = [
    (15, 3),
    (15, 5),
    (17, 4),
    (17, 2),
    (17, 6),
    (15, 1),
    (15, 7),
    (19, 2),
    (19, 4),
    (19, 6),
];

const REFERENCE_WIDTH: i32 = 20;

/// Spawn tile of the `index`-th member (0-based) of `team`
pub fn spawn_tile(index: usize, team: TeamId, width: i32) -> Tile {
    let (x, y) = SPAWNS[index % MAX_TEAM_SIZE];
    let x = x + (width - REFERENCE_WIDTH);
    if team == 2 {
        Tile::new(width - 1 - x, y)
    } else {
        Tile::new(x, y)
    }
}

/// How a match fills its two teams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVariant {
    /// One human roster against a generated AI squad
    VsAi,
    /// Both teams fetched from their owners' rosters
    Pvp,
}

impl MatchVariant {
    pub fn for_players(players: usize) -> Self {
        if players > 1 {
            MatchVariant::Pvp
        } else {
            MatchVariant::VsAi
        }
    }
}

/// Account summary shipped with a roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerData {
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default = "default_elo")]
    pub elo: i32,
}

fn default_level() -> u32 {
    1
}

fn default_elo() -> i32 {
    1200
}

/// One character as stored on the account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterCharacter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub portrait: String,
    pub class: CharacterClass,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub xp: u32,
    pub stats: Stats,
    #[serde(default)]
    pub inventory: Vec<InventorySlot>,
    #[serde(default)]
    pub spells: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterData {
    pub player: PlayerData,
    pub characters: Vec<RosterCharacter>,
}

impl RosterData {
    pub fn profile(&self, user_id: Uuid) -> PlayerProfile {
        PlayerProfile {
            user_id,
            name: self.player.name.clone(),
            level: self.player.level,
            elo: self.player.elo,
        }
    }

    /// Board units for `team`, capped to what the spawn layout holds
    pub fn characters(&self, team: TeamId) -> Vec<Character> {
        self.characters
            .iter()
            .take(MAX_TEAM_SIZE)
            .enumerate()
            .map(|(i, c)| character_from_roster(UnitRef::new(team, i + 1), c))
            .collect()
    }

    pub fn total_level(&self) -> u32 {
        self.characters.iter().take(MAX_TEAM_SIZE).map(|c| c.level).sum()
    }
}

pub fn character_from_roster(unit: UnitRef, data: &RosterCharacter) -> Character {
    let mut c = Character::new(unit, data.name.clone(), data.class, data.stats);
    c.portrait = data.portrait.clone();
    c.level = data.level.max(1);
    c.xp = data.xp;
    c.roster_id = Some(data.id.clone());
    c.inventory = data.inventory.iter().filter(|s| s.quantity > 0).copied().collect();
    c.spells = data.spells.clone();
    c
}

const AI_NAMES: &[&str] = &[
    "Grum", "Vessa", "Orik", "Talla", "Brenn", "Mirel", "Kato", "Sefa", "Dusk", "Yara", "Holt",
    "Ivo",
];

/// Base stats at level 1 and per-level growth
fn class_curve(class: CharacterClass) -> (Stats, Stats) {
    match class {
        CharacterClass::Warrior => (
            Stats { hp: 120, mp: 10, atk: 12, def: 8, spatk: 3, spdef: 5, speed: 8 },
            Stats { hp: 12, mp: 1, atk: 2, def: 1, spatk: 0, spdef: 1, speed: 1 },
        ),
        CharacterClass::WhiteMage => (
            Stats { hp: 85, mp: 40, atk: 5, def: 5, spatk: 10, spdef: 9, speed: 9 },
            Stats { hp: 7, mp: 4, atk: 0, def: 1, spatk: 2, spdef: 1, speed: 1 },
        ),
        CharacterClass::BlackMage => (
            Stats { hp: 80, mp: 45, atk: 4, def: 4, spatk: 13, spdef: 8, speed: 9 },
            Stats { hp: 6, mp: 4, atk: 0, def: 0, spatk: 3, spdef: 1, speed: 1 },
        ),
        CharacterClass::Thief => (
            Stats { hp: 95, mp: 15, atk: 10, def: 6, spatk: 4, spdef: 5, speed: 14 },
            Stats { hp: 9, mp: 1, atk: 2, def: 1, spatk: 0, spdef: 1, speed: 2 },
        ),
    }
}

fn stats_at_level(class: CharacterClass, level: u32, rng: &mut impl Rng) -> Stats {
    let (base, growth) = class_curve(class);
    let steps = level.saturating_sub(1) as i32;
    let mut grow = |b: i32, g: i32| {
        let jitter = rng.gen_range(0.9..=1.1);
        ((b + g * steps) as f64 * jitter).round().max(1.0) as i32
    };
    Stats {
        hp: grow(base.hp, growth.hp),
        mp: grow(base.mp, growth.mp),
        atk: grow(base.atk, growth.atk),
        def: grow(base.def, growth.def),
        spatk: grow(base.spatk, growth.spatk),
        spdef: grow(base.spdef, growth.spdef),
        speed: grow(base.speed, growth.speed),
    }
}

fn class_spells(class: CharacterClass) -> Vec<u32> {
    match class {
        CharacterClass::WhiteMage => vec![1],
        CharacterClass::BlackMage => vec![0, 2, 3, 4],
        CharacterClass::Warrior | CharacterClass::Thief => Vec::new(),
    }
}

/// AI squad of `size` units whose levels add up to about `total_level`
pub fn generate_ai_team(
    team: TeamId,
    total_level: u32,
    size: usize,
    mode: PlayMode,
    rng: &mut impl Rng,
) -> Vec<Character> {
    let size = size.clamp(1, MAX_TEAM_SIZE);
    // Practice opponents stay a notch below the player
    let total_level = match mode {
        PlayMode::Practice => total_level.saturating_sub(size as u32),
        _ => total_level,
    };
    let per_unit = (total_level / size as u32).max(1);

    let mut names: Vec<&str> = AI_NAMES.to_vec();
    names.shuffle(rng);

    (0..size)
        .map(|i| {
            let class = match rng.gen_range(0..4) {
                0 => CharacterClass::Warrior,
                1 => CharacterClass::WhiteMage,
                2 => CharacterClass::BlackMage,
                _ => CharacterClass::Thief,
            };
            let level = (per_unit as i64 + rng.gen_range(-1..=1)).max(1) as u32;
            let name = names.get(i).copied().unwrap_or("Grunt");
            let mut c = Character::new(
                UnitRef::new(team, i + 1),
                name,
                class,
                stats_at_level(class, level, rng),
            );
            c.level = level;
            c.spells = class_spells(class);
            let potions = rng.gen_range(0..=2);
            if potions > 0 {
                c.inventory.push(InventorySlot { item: 0, quantity: potions });
            }
            c.ai = Some(AiState::random(rng));
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::Grid;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn spawns_mirror_across_the_board() {
        assert_eq!(spawn_tile(0, 1, 20), Tile::new(15, 3));
        assert_eq!(spawn_tile(0, 2, 20), Tile::new(4, 3));
        assert_eq!(spawn_tile(9, 2, 20), Tile::new(0, 6));
    }

    #[test]
    fn every_spawn_is_playable_and_distinct() {
        let grid = Grid::new(20, 10);
        let mut seen = std::collections::HashSet::new();
        for team in [1, 2] {
            for i in 0..MAX_TEAM_SIZE {
                let tile = spawn_tile(i, team, 20);
                assert!(grid.contains(tile), "{:?}", tile);
                assert!(seen.insert(tile));
            }
        }
    }

    #[test]
    fn roster_fills_defaults() {
        let raw = r#"{
            "player": {"name": "Ana"},
            "characters": [{
                "id": "c1",
                "name": "Bram",
                "class": "black_mage",
                "stats": {"hp": 90, "mp": 40, "atk": 6, "def": 4, "spatk": 12, "spdef": 8},
                "inventory": [{"item": 0, "quantity": 2}, {"item": 1, "quantity": 0}],
                "spells": [0, 2]
            }]
        }"#;
        let roster: RosterData = serde_json::from_str(raw).unwrap();
        assert_eq!(roster.player.elo, 1200);

        let units = roster.characters(2);
        assert_eq!(units.len(), 1);
        let c = &units[0];
        assert_eq!(c.unit, UnitRef::new(2, 1));
        assert_eq!(c.class, CharacterClass::BlackMage);
        assert_eq!(c.stats.speed, 10);
        assert_eq!(c.hp, 90);
        assert_eq!(c.inventory.len(), 1);
        assert_eq!(c.roster_id.as_deref(), Some("c1"));
    }

    #[test]
    fn generated_units_are_ai_driven() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let team = generate_ai_team(2, 12, 3, PlayMode::CasualVsAi, &mut rng);
        assert_eq!(team.len(), 3);
        for (i, c) in team.iter().enumerate() {
            assert_eq!(c.unit, UnitRef::new(2, i + 1));
            assert!(c.ai.is_some());
            assert!(c.level >= 3 && c.level <= 5, "{}", c.level);
            assert!(c.is_alive());
        }
    }

    #[test]
    fn variant_follows_player_count() {
        assert_eq!(MatchVariant::for_players(1), MatchVariant::VsAi);
        assert_eq!(MatchVariant::for_players(2), MatchVariant::Pvp);
    }
}
