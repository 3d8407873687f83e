//! Effect pipeline shared by spells and items
//!
//! An [`Effect`] changes HP or MP by a base value scaled by a caster-side and
//! a target-side [`EffectModifier`], each linear in one stat, with a small
//! multiplicative jitter. Jitter for one target comes from an RNG seeded by
//! the resolution seed and the target's identity, so applying the same
//! resolution to several targets gives the same result in any order.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::ws::protocol::{StatusEffect, Terrain};

use super::character::{Character, Stat, Stats, UnitRef};

/// Sentinel value meaning "restore to max"
pub const FULL_RESTORE: i32 = i32::MAX;

const JITTER_MIN: f64 = 0.95;
const JITTER_MAX: f64 = 1.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targeting {
    /// The user themselves
    Caster,
    /// One unit named in the payload
    Single,
    /// Everyone within the radius of a tile
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectModifier {
    pub stat: Stat,
    pub ratio: f64,
    pub direction: Direction,
}

impl EffectModifier {
    pub const NONE: EffectModifier = EffectModifier {
        stat: Stat::None,
        ratio: 0.0,
        direction: Direction::Increase,
    };

    pub const fn is_identity(&self) -> bool {
        matches!(self.stat, Stat::None)
    }

    /// `1 ± ratio * stat`, floored at zero
    pub fn factor(&self, stats: &Stats) -> f64 {
        if self.is_identity() {
            return 1.0;
        }
        let sign = match self.direction {
            Direction::Increase => 1.0,
            Direction::Decrease => -1.0,
        };
        (1.0 + sign * self.ratio * stats.get(self.stat) as f64).max(0.0)
    }
}

/// Spell power boosts the outgoing value
const SP_BOOST: EffectModifier = EffectModifier {
    stat: Stat::Spatk,
    ratio: 0.1,
    direction: Direction::Increase,
};

/// Spell defense softens the incoming value
const SP_RESIST: EffectModifier = EffectModifier {
    stat: Stat::Spdef,
    ratio: 0.02,
    direction: Direction::Decrease,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Effect {
    pub stat: Stat,
    pub value: i32,
    pub caster_modifier: EffectModifier,
    pub target_modifier: EffectModifier,
    /// Only applies to knocked-out targets
    pub on_ko: bool,
}

impl Effect {
    pub const fn hp(value: i32) -> Self {
        Self {
            stat: Stat::Hp,
            value,
            caster_modifier: EffectModifier::NONE,
            target_modifier: EffectModifier::NONE,
            on_ko: false,
        }
    }

    pub const fn mp(value: i32) -> Self {
        Self {
            stat: Stat::Mp,
            ..Self::hp(value)
        }
    }

    pub const fn scaled(self, caster: EffectModifier, target: EffectModifier) -> Self {
        Self {
            caster_modifier: caster,
            target_modifier: target,
            ..self
        }
    }

    pub const fn revive(self) -> Self {
        Self { on_ko: true, ..self }
    }

    /// Knocked-out targets only receive revive effects and vice versa
    pub fn targets(&self, target: &Character) -> bool {
        self.on_ko != target.is_alive()
    }

    /// Whether applying this effect now would change anything
    pub fn would_change(&self, target: &Character) -> bool {
        if !self.targets(target) {
            return false;
        }
        match self.stat {
            Stat::Hp if self.value > 0 => target.hp < target.max_hp() || self.on_ko,
            Stat::Mp if self.value > 0 => target.mp < target.max_mp(),
            Stat::Mp => target.mp > 0,
            _ => true,
        }
    }

    /// Final signed value for one target
    pub fn resolve(&self, caster: Option<&Stats>, target: &Character, rng: &mut impl Rng) -> i32 {
        if self.value == FULL_RESTORE {
            return match self.stat {
                Stat::Mp => target.max_mp(),
                _ => target.max_hp(),
            };
        }
        let mut value = self.value as f64;
        let mut scaled = false;
        if let Some(stats) = caster {
            if !self.caster_modifier.is_identity() {
                value *= self.caster_modifier.factor(stats);
                scaled = true;
            }
        }
        if !self.target_modifier.is_identity() {
            value *= self.target_modifier.factor(&target.stats);
            scaled = true;
        }
        if scaled {
            value *= rng.gen_range(JITTER_MIN..=JITTER_MAX);
        }
        let rounded = value.round() as i32;
        if rounded == 0 && self.value != 0 {
            self.value.signum()
        } else {
            rounded
        }
    }
}

/// Status a spell may inflict on surviving targets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusInfliction {
    pub status: StatusEffect,
    pub ticks: u32,
    pub chance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spell {
    pub id: u32,
    pub name: &'static str,
    pub cost: i32,
    pub cooldown_ms: u64,
    pub cast_time_ms: u64,
    pub targeting: Targeting,
    pub radius: i32,
    pub effects: &'static [Effect],
    pub terrain: Option<Terrain>,
    pub status: Option<StatusInfliction>,
    pub score: u32,
}

impl Spell {
    pub fn is_healing(&self) -> bool {
        self.effects.iter().all(|e| e.value > 0)
    }

    /// Unscaled HP restored, used by the AI to avoid overhealing
    pub fn base_heal(&self) -> i32 {
        self.effects
            .iter()
            .filter(|e| e.stat == Stat::Hp && e.value > 0)
            .map(|e| e.value)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: u32,
    pub name: &'static str,
    pub cooldown_ms: u64,
    pub targeting: Targeting,
    pub radius: i32,
    pub effects: &'static [Effect],
    pub status_removals: &'static [StatusEffect],
    pub animation: &'static str,
}

impl Item {
    /// At least one effect or status removal would do something
    pub fn is_applicable(&self, target: &Character) -> bool {
        self.effects.iter().any(|e| e.would_change(target))
            || self.status_removals.iter().any(|s| target.has_status(*s))
    }
}

pub static SPELLS: &[Spell] = &[
    Spell {
        id: 0,
        name: "Fire",
        cost: 5,
        cooldown_ms: 1000,
        cast_time_ms: 1000,
        targeting: Targeting::Area,
        radius: 1,
        effects: &[Effect::hp(-30).scaled(SP_BOOST, SP_RESIST)],
        terrain: Some(Terrain::Fire),
        status: None,
        score: 100,
    },
    Spell {
        id: 1,
        name: "Heal",
        cost: 5,
        cooldown_ms: 4000,
        cast_time_ms: 1000,
        targeting: Targeting::Single,
        radius: 0,
        effects: &[Effect::hp(50).scaled(SP_BOOST, EffectModifier::NONE)],
        terrain: None,
        status: None,
        score: 10,
    },
    Spell {
        id: 2,
        name: "Thunder",
        cost: 4,
        cooldown_ms: 500,
        cast_time_ms: 1000,
        targeting: Targeting::Area,
        radius: 0,
        effects: &[Effect::hp(-30).scaled(SP_BOOST, SP_RESIST)],
        terrain: None,
        status: Some(StatusInfliction {
            status: StatusEffect::Paralyze,
            ticks: 2,
            chance: 0.3,
        }),
        score: 80,
    },
    Spell {
        id: 3,
        name: "Ice",
        cost: 4,
        cooldown_ms: 4000,
        cast_time_ms: 1000,
        targeting: Targeting::Area,
        radius: 0,
        effects: &[Effect::hp(-30).scaled(SP_BOOST, SP_RESIST)],
        terrain: Some(Terrain::Ice),
        status: None,
        score: 60,
    },
    Spell {
        id: 4,
        name: "Venom",
        cost: 6,
        cooldown_ms: 3000,
        cast_time_ms: 1000,
        targeting: Targeting::Single,
        radius: 0,
        effects: &[Effect::hp(-15).scaled(SP_BOOST, SP_RESIST)],
        terrain: None,
        status: Some(StatusInfliction {
            status: StatusEffect::Poison,
            ticks: 5,
            chance: 0.8,
        }),
        score: 40,
    },
];

const fn consumable(
    id: u32,
    name: &'static str,
    cooldown_ms: u64,
    effects: &'static [Effect],
    animation: &'static str,
) -> Item {
    Item {
        id,
        name,
        cooldown_ms,
        targeting: Targeting::Caster,
        radius: 0,
        effects,
        status_removals: &[],
        animation,
    }
}

const POTION: &[Effect] = &[Effect::hp(50)];
const ETHER: &[Effect] = &[Effect::mp(10)];
const HI_POTION: &[Effect] = &[Effect::hp(250)];
const HI_ETHER: &[Effect] = &[Effect::mp(50)];
const X_POTION: &[Effect] = &[Effect::hp(1000)];
const X_ETHER: &[Effect] = &[Effect::mp(200)];
const ELIXIR: &[Effect] = &[Effect::hp(250), Effect::mp(50)];
const X_ELIXIR: &[Effect] = &[Effect::hp(1000), Effect::mp(200)];
const CONCOCTION: &[Effect] = &[Effect::hp(FULL_RESTORE), Effect::mp(FULL_RESTORE)];

pub static ITEMS: &[Item] = &[
    consumable(0, "Potion", 2000, POTION, "potion"),
    consumable(1, "Ether", 3000, ETHER, "ether"),
    consumable(2, "Hi-Potion", 4000, HI_POTION, "potion"),
    consumable(3, "Hi-Ether", 6000, HI_ETHER, "ether"),
    consumable(4, "X-Potion", 8000, X_POTION, "potion"),
    consumable(5, "X-Ether", 12000, X_ETHER, "ether"),
    consumable(6, "Elixir", 12000, ELIXIR, "elixir"),
    consumable(7, "X-Elixir", 22000, X_ELIXIR, "elixir"),
    Item {
        id: 8,
        name: "Clover",
        cooldown_ms: 10000,
        targeting: Targeting::Single,
        radius: 0,
        effects: &[Effect::hp(10).revive()],
        status_removals: &[],
        animation: "clover",
    },
    consumable(9, "Concoction", 40000, CONCOCTION, "elixir"),
    Item {
        id: 10,
        name: "Antidote",
        cooldown_ms: 2000,
        targeting: Targeting::Single,
        radius: 0,
        effects: &[],
        status_removals: &[StatusEffect::Poison],
        animation: "cure",
    },
    Item {
        id: 11,
        name: "Remedy",
        cooldown_ms: 6000,
        targeting: Targeting::Single,
        radius: 0,
        effects: &[],
        status_removals: &[
            StatusEffect::Freeze,
            StatusEffect::Burn,
            StatusEffect::Poison,
            StatusEffect::Sleep,
            StatusEffect::Paralyze,
            StatusEffect::Mute,
        ],
        animation: "cure",
    },
];

pub fn spell(id: u32) -> Option<&'static Spell> {
    SPELLS.iter().find(|s| s.id == id)
}

pub fn item(id: u32) -> Option<&'static Item> {
    ITEMS.iter().find(|i| i.id == id)
}

/// Before/after vitals of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectOutcome {
    pub unit: UnitRef,
    pub hp_before: i32,
    pub hp_after: i32,
    pub mp_before: i32,
    pub mp_after: i32,
    pub statuses_removed: usize,
}

impl EffectOutcome {
    pub fn hp_delta(&self) -> i32 {
        self.hp_after - self.hp_before
    }

    pub fn mp_delta(&self) -> i32 {
        self.mp_after - self.mp_before
    }

    pub fn died(&self) -> bool {
        self.hp_before > 0 && self.hp_after == 0
    }

    pub fn revived(&self) -> bool {
        self.hp_before == 0 && self.hp_after > 0
    }
}

fn target_seed(seed: u64, unit: UnitRef) -> u64 {
    let key = ((unit.team as u64) << 32) | unit.num as u64;
    seed ^ key.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Apply a list of effects and status removals to one target
pub fn apply_to_target(
    effects: &[Effect],
    status_removals: &[StatusEffect],
    caster: Option<&Stats>,
    target: &mut Character,
    seed: u64,
) -> EffectOutcome {
    let mut rng = ChaCha8Rng::seed_from_u64(target_seed(seed, target.unit));
    let hp_before = target.hp;
    let mp_before = target.mp;

    for effect in effects {
        if !effect.targets(target) {
            continue;
        }
        let value = effect.resolve(caster, target, &mut rng);
        match effect.stat {
            Stat::Hp => {
                target.change_hp(value);
            }
            Stat::Mp => {
                target.change_mp(value);
            }
            _ => {}
        }
    }

    let statuses_removed = status_removals
        .iter()
        .filter(|s| target.remove_status(**s))
        .count();

    EffectOutcome {
        unit: target.unit,
        hp_before,
        hp_after: target.hp,
        mp_before,
        mp_after: target.mp,
        statuses_removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::character::CharacterClass;

    fn unit(team: u8, num: usize) -> Character {
        let stats = Stats {
            hp: 200,
            mp: 40,
            spatk: 10,
            spdef: 10,
            ..Stats::default()
        };
        Character::new(UnitRef::new(team, num), "u", CharacterClass::BlackMage, stats)
    }

    #[test]
    fn modifiers_scale_linearly() {
        let stats = Stats {
            spatk: 10,
            spdef: 10,
            ..Stats::default()
        };
        assert!((SP_BOOST.factor(&stats) - 2.0).abs() < 1e-9);
        assert!((SP_RESIST.factor(&stats) - 0.8).abs() < 1e-9);
        assert_eq!(EffectModifier::NONE.factor(&stats), 1.0);
    }

    #[test]
    fn fire_damage_falls_in_jitter_band() {
        let caster = unit(1, 1).stats;
        let mut target = unit(2, 1);
        let fire = spell(0).unwrap();
        let outcome = apply_to_target(fire.effects, &[], Some(&caster), &mut target, 7);
        // -30 * 2.0 * 0.8 = -48 before jitter
        assert!((-51..=-45).contains(&outcome.hp_delta()), "{}", outcome.hp_delta());
    }

    #[test]
    fn application_order_does_not_matter() {
        let caster = unit(1, 1).stats;
        let fire = spell(0).unwrap();

        let mut a1 = unit(2, 1);
        let mut a2 = unit(2, 2);
        let first = apply_to_target(fire.effects, &[], Some(&caster), &mut a1, 99);
        let second = apply_to_target(fire.effects, &[], Some(&caster), &mut a2, 99);

        let mut b2 = unit(2, 2);
        let mut b1 = unit(2, 1);
        let second_again = apply_to_target(fire.effects, &[], Some(&caster), &mut b2, 99);
        let first_again = apply_to_target(fire.effects, &[], Some(&caster), &mut b1, 99);

        assert_eq!(first, first_again);
        assert_eq!(second, second_again);
    }

    #[test]
    fn revive_only_touches_knocked_out_units() {
        let clover = item(8).unwrap();
        let mut alive = unit(1, 2);
        alive.hp = 50;
        assert!(!clover.is_applicable(&alive));

        let mut down = unit(1, 3);
        down.change_hp(-1000);
        assert!(clover.is_applicable(&down));
        let outcome = apply_to_target(clover.effects, &[], None, &mut down, 1);
        assert!(outcome.revived());
        assert_eq!(down.hp, 10);
    }

    #[test]
    fn full_restore_ignores_modifiers() {
        let concoction = item(9).unwrap();
        let mut target = unit(1, 1);
        target.hp = 3;
        target.mp = 0;
        apply_to_target(concoction.effects, &[], None, &mut target, 5);
        assert_eq!(target.hp, 200);
        assert_eq!(target.mp, 40);
    }

    #[test]
    fn status_removal_makes_item_applicable() {
        let antidote = item(10).unwrap();
        let mut target = unit(1, 1);
        assert!(!antidote.is_applicable(&target));
        target.add_status(StatusEffect::Poison, 3);
        assert!(antidote.is_applicable(&target));
        let outcome = apply_to_target(&[], antidote.status_removals, None, &mut target, 0);
        assert_eq!(outcome.statuses_removed, 1);
        assert!(!target.has_status(StatusEffect::Poison));
    }

    #[test]
    fn potion_is_useless_at_full_health() {
        let potion = item(0).unwrap();
        let mut target = unit(1, 1);
        assert!(!potion.is_applicable(&target));
        target.hp -= 1;
        assert!(potion.is_applicable(&target));
    }

    #[test]
    fn catalog_lookups() {
        assert_eq!(spell(1).unwrap().name, "Heal");
        assert!(spell(1).unwrap().is_healing());
        assert!(!spell(2).unwrap().is_healing());
        assert_eq!(spell(1).unwrap().base_heal(), 50);
        assert!(spell(42).is_none());
        assert_eq!(item(6).unwrap().effects.len(), 2);
    }
}
