//! Melee damage

use rand::Rng;

/// Random spread applied to melee damage
const DAMAGE_SPREAD_MIN: f64 = 0.9;
const DAMAGE_SPREAD_MAX: f64 = 1.1;

/// Combat helpers without state
pub struct CombatSystem;

impl CombatSystem {
    /// Damage before randomness: `atk / (1 + def) * 10`, at least 1
    pub fn base_damage(atk: i32, def: i32) -> f64 {
        let def = def.max(0) as f64;
        (atk.max(0) as f64 / (1.0 + def) * 10.0).max(1.0)
    }

    /// Damage for a given spread roll in `[0.9, 1.1]`
    pub fn damage_with_roll(atk: i32, def: i32, roll: f64) -> i32 {
        ((Self::base_damage(atk, def) * roll).round() as i32).max(1)
    }

    /// Melee damage with a fresh roll
    pub fn calculate_damage(atk: i32, def: i32, rng: &mut impl Rng) -> i32 {
        let roll = rng.gen_range(DAMAGE_SPREAD_MIN..=DAMAGE_SPREAD_MAX);
        Self::damage_with_roll(atk, def, roll)
    }
}
