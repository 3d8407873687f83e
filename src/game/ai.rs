//! Computer-controlled units
//!
//! Each AI unit carries a small brain: an archetype that decides which enemy
//! to chase and a countdown before that choice is reconsidered. Decisions read
//! the board through [`Game`] and come back as ordinary [`Action`]s, which the
//! engine validates exactly like client commands.

use rand::Rng;

use crate::ws::protocol::Tile;

use super::character::{Character, UnitRef};
use super::effects::{self, Targeting};
use super::engine::{Action, Game};

/// Chance per decision of looking for an area spell opening
const AOE_CHANCE: f64 = 0.4;
/// Minimum enemies-minus-allies margin for an area spell
const AOE_MIN_SCORE: i32 = 1;
const RETARGET_MIN: u32 = 1;
const RETARGET_MAX: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archetype {
    Opportunist,
    Hunter,
    Equalizer,
    Defender,
    Hero,
}

impl Archetype {
    pub const ALL: [Archetype; 5] = [
        Archetype::Opportunist,
        Archetype::Hunter,
        Archetype::Equalizer,
        Archetype::Defender,
        Archetype::Hero,
    ];

    pub fn roll(rng: &mut impl Rng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

#[derive(Debug, Clone)]
pub struct AiState {
    pub archetype: Archetype,
    pub target: Option<UnitRef>,
    pub retarget_countdown: u32,
}

impl AiState {
    pub fn new(archetype: Archetype) -> Self {
        Self {
            archetype,
            target: None,
            retarget_countdown: 0,
        }
    }

    pub fn random(rng: &mut impl Rng) -> Self {
        Self::new(Archetype::roll(rng))
    }
}

// ============================================================================
// Target selection
// ============================================================================

/// Picks the enemy an AI unit should go after
pub trait TargetStrategy {
    fn choose(&self, game: &Game, me: UnitRef) -> Option<UnitRef>;
}

/// Lowest-HP adjacent enemy, else the nearest one
pub struct Opportunist;
/// Lowest-HP enemy
pub struct Hunter;
/// Highest-HP enemy
pub struct Equalizer;
/// Enemy nearest to the weakest ally
pub struct Defender;
/// Enemy that has dealt the most damage
pub struct Hero;

impl TargetStrategy for Opportunist {
    fn choose(&self, game: &Game, me: UnitRef) -> Option<UnitRef> {
        let pos = game.unit(me)?.position;
        let enemies = game.living_enemies(me.team);
        enemies
            .iter()
            .filter(|e| e.position.is_adjacent(pos))
            .min_by_key(|e| e.hp)
            .or_else(|| enemies.iter().min_by_key(|e| e.position.dist_sq(pos)))
            .map(|e| e.unit)
    }
}

impl TargetStrategy for Hunter {
    fn choose(&self, game: &Game, me: UnitRef) -> Option<UnitRef> {
        game.living_enemies(me.team)
            .into_iter()
            .min_by_key(|e| e.hp)
            .map(|e| e.unit)
    }
}

impl TargetStrategy for Equalizer {
    fn choose(&self, game: &Game, me: UnitRef) -> Option<UnitRef> {
        game.living_enemies(me.team)
            .into_iter()
            .reduce(|best, e| if e.hp > best.hp { e } else { best })
            .map(|e| e.unit)
    }
}

impl TargetStrategy for Defender {
    fn choose(&self, game: &Game, me: UnitRef) -> Option<UnitRef> {
        let weakest = game
            .living_allies(me.team)
            .into_iter()
            .min_by_key(|a| a.hp)?
            .position;
        game.living_enemies(me.team)
            .into_iter()
            .min_by_key(|e| e.position.dist_sq(weakest))
            .map(|e| e.unit)
    }
}

impl TargetStrategy for Hero {
    fn choose(&self, game: &Game, me: UnitRef) -> Option<UnitRef> {
        game.living_enemies(me.team)
            .into_iter()
            .reduce(|best, e| {
                if e.damage_dealt > best.damage_dealt {
                    e
                } else {
                    best
                }
            })
            .map(|e| e.unit)
    }
}

pub fn strategy_for(archetype: Archetype) -> &'static dyn TargetStrategy {
    match archetype {
        Archetype::Opportunist => &Opportunist,
        Archetype::Hunter => &Hunter,
        Archetype::Equalizer => &Equalizer,
        Archetype::Defender => &Defender,
        Archetype::Hero => &Hero,
    }
}

// ============================================================================
// Decision
// ============================================================================

/// First applicable action in priority order: items, heals, area spells,
/// then chasing the current target.
pub fn decide(game: &Game, me: UnitRef, brain: &mut AiState, rng: &mut impl Rng) -> Option<Action> {
    let unit = game.unit(me)?;
    if !unit.is_alive() {
        return None;
    }
    if let Some(action) = use_item(game, unit) {
        return Some(action);
    }
    if let Some(action) = heal_ally(game, unit) {
        return Some(action);
    }
    if rng.gen_bool(AOE_CHANCE) {
        if let Some(action) = area_spell(game, unit) {
            return Some(action);
        }
    }
    engage(game, unit, brain, rng)
}

fn use_item(game: &Game, unit: &Character) -> Option<Action> {
    for (index, slot) in unit.inventory.iter().enumerate() {
        let Some(item) = effects::item(slot.item) else {
            continue;
        };
        let recipient = match item.targeting {
            Targeting::Caster => item.is_applicable(unit).then_some(unit),
            Targeting::Single => game
                .team(unit.team())
                .members
                .iter()
                .find(|ally| item.is_applicable(ally)),
            Targeting::Area => None,
        };
        if let Some(r) = recipient {
            return Some(Action::UseItem {
                num: unit.num(),
                tile: r.position,
                index,
                target: (item.targeting == Targeting::Single).then_some(r.unit),
            });
        }
    }
    None
}

fn heal_ally(game: &Game, unit: &Character) -> Option<Action> {
    if unit.is_muted() {
        return None;
    }
    let (index, spell) = unit
        .spells
        .iter()
        .enumerate()
        .filter_map(|(i, id)| effects::spell(*id).map(|s| (i, s)))
        .find(|(_, s)| s.is_healing() && s.targeting == Targeting::Single && s.cost <= unit.mp)?;
    let patient = game
        .living_allies(unit.team())
        .into_iter()
        .min_by_key(|a| a.hp)?;
    if patient.max_hp() - patient.hp < spell.base_heal() {
        return None;
    }
    Some(Action::CastSpell {
        num: unit.num(),
        tile: patient.position,
        index,
        target: Some(patient.unit),
    })
}

fn area_spell(game: &Game, unit: &Character) -> Option<Action> {
    if unit.is_muted() {
        return None;
    }
    unit.spells.iter().enumerate().find_map(|(index, id)| {
        let spell = effects::spell(*id)?;
        if spell.is_healing() || spell.targeting != Targeting::Area || spell.cost > unit.mp {
            return None;
        }
        let tile = game.scan_grid_for_aoe(unit.team(), spell.radius, AOE_MIN_SCORE)?;
        Some(Action::CastSpell {
            num: unit.num(),
            tile,
            index,
            target: None,
        })
    })
}

fn engage(game: &Game, unit: &Character, brain: &mut AiState, rng: &mut impl Rng) -> Option<Action> {
    if let Some(target) = brain.target {
        let alive = game.unit(target).is_some_and(|c| c.is_alive());
        if !alive || brain.retarget_countdown == 0 {
            brain.target = None;
            brain.archetype = Archetype::roll(rng);
        }
    }
    if brain.target.is_none() {
        brain.target = strategy_for(brain.archetype).choose(game, unit.unit);
        brain.retarget_countdown = rng.gen_range(RETARGET_MIN..=RETARGET_MAX);
    }

    let target = brain.target?;
    brain.retarget_countdown = brain.retarget_countdown.saturating_sub(1);
    let target_pos = game.unit(target)?.position;

    if unit.position.is_adjacent(target_pos) {
        return Some(Action::Attack {
            num: unit.num(),
            target,
        });
    }
    step_toward(game, unit, target_pos).map(|tile| Action::Move {
        num: unit.num(),
        tile,
    })
}

/// Reachable tile closest to `goal`, tiles next to it first
fn step_toward(game: &Game, unit: &Character, goal: Tile) -> Option<Tile> {
    let options = game.reachable_tiles(unit.unit);
    let best = options
        .iter()
        .filter(|t| t.is_adjacent(goal))
        .min_by_key(|t| t.dist_sq(goal))
        .or_else(|| options.iter().min_by_key(|t| t.dist_sq(goal)))
        .copied()?;
    (best.dist_sq(goal) < unit.position.dist_sq(goal)).then_some(best)
}
