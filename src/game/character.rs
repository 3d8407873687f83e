//! Authoritative unit state

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ws::protocol::{InventoryEntry, StatusEffect, TeamId, Terrain, Tile, UnitSnapshot};

use super::ai::AiState;
use super::effects::{self, Item, Spell};

/// Default movement radius in tiles
pub const DEFAULT_MOVE_RANGE: i32 = 3;

/// Burn applied when stepping through or standing on fire (status ticks)
pub const TERRAIN_BURN_TICKS: u32 = 3;

/// Damage-over-time per status tick, as a fraction of max HP
const BURN_DAMAGE_RATIO: f64 = 0.05;
const POISON_DAMAGE_RATIO: f64 = 0.03;

/// Lower bound on the speed-based cooldown multiplier
const MIN_SPEED_FACTOR: f64 = 0.1;

/// Stable reference to a unit: owning team and 1-based slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitRef {
    pub team: TeamId,
    pub num: usize,
}

impl UnitRef {
    pub const fn new(team: TeamId, num: usize) -> Self {
        Self { team, num }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterClass {
    Warrior,
    WhiteMage,
    BlackMage,
    Thief,
}

impl CharacterClass {
    pub fn as_str(self) -> &'static str {
        match self {
            CharacterClass::Warrior => "warrior",
            CharacterClass::WhiteMage => "white_mage",
            CharacterClass::BlackMage => "black_mage",
            CharacterClass::Thief => "thief",
        }
    }
}

/// Stat a modifier or effect reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Hp,
    Mp,
    Atk,
    Def,
    Spatk,
    Spdef,
    Speed,
    /// Identity modifier
    None,
}

/// Base stats; `hp` and `mp` are the maxima
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub hp: i32,
    pub mp: i32,
    pub atk: i32,
    pub def: i32,
    pub spatk: i32,
    pub spdef: i32,
    #[serde(default = "default_speed")]
    pub speed: i32,
}

fn default_speed() -> i32 {
    10
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            hp: 100,
            mp: 20,
            atk: 10,
            def: 5,
            spatk: 5,
            spdef: 5,
            speed: default_speed(),
        }
    }
}

impl Stats {
    pub fn get(&self, stat: Stat) -> i32 {
        match stat {
            Stat::Hp => self.hp,
            Stat::Mp => self.mp,
            Stat::Atk => self.atk,
            Stat::Def => self.def,
            Stat::Spatk => self.spatk,
            Stat::Spdef => self.spdef,
            Stat::Speed => self.speed,
            Stat::None => 0,
        }
    }
}

/// Inventory slot; removed once quantity reaches zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlot {
    pub item: u32,
    pub quantity: u32,
}

/// A fighter on the board
#[derive(Debug, Clone)]
pub struct Character {
    pub unit: UnitRef,
    pub name: String,
    pub portrait: String,
    pub class: CharacterClass,
    pub level: u32,
    pub xp: u32,
    /// Roster id, absent for generated units
    pub roster_id: Option<String>,
    pub position: Tile,
    pub hp: i32,
    pub mp: i32,
    pub stats: Stats,
    pub move_range: i32,
    pub cooldown_ms: u64,
    pub casting: bool,
    pub inventory: Vec<InventorySlot>,
    pub spells: Vec<u32>,
    pub damage_dealt: u32,
    pub standing_on: Terrain,
    pub ai: Option<AiState>,
    statuses: BTreeMap<StatusEffect, u32>,
    interacted: HashSet<UnitRef>,
}

impl Character {
    pub fn new(unit: UnitRef, name: impl Into<String>, class: CharacterClass, stats: Stats) -> Self {
        Self {
            unit,
            name: name.into(),
            portrait: String::new(),
            class,
            level: 1,
            xp: 0,
            roster_id: None,
            position: Tile::new(0, 0),
            hp: stats.hp,
            mp: stats.mp,
            stats,
            move_range: DEFAULT_MOVE_RANGE,
            cooldown_ms: 0,
            casting: false,
            inventory: Vec::new(),
            spells: Vec::new(),
            damage_dealt: 0,
            standing_on: Terrain::None,
            ai: None,
            statuses: StatusEffect::ALL.iter().map(|s| (*s, 0)).collect(),
            interacted: HashSet::new(),
        }
    }

    pub fn team(&self) -> TeamId {
        self.unit.team
    }

    pub fn num(&self) -> usize {
        self.unit.num
    }

    pub fn max_hp(&self) -> i32 {
        self.stats.hp
    }

    pub fn max_mp(&self) -> i32 {
        self.stats.mp
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    pub fn hp_ratio(&self) -> f64 {
        if self.stats.hp <= 0 {
            return 0.0;
        }
        self.hp as f64 / self.stats.hp as f64
    }

    pub fn has_status(&self, status: StatusEffect) -> bool {
        self.statuses.get(&status).copied().unwrap_or(0) > 0
    }

    pub fn is_incapacitated(&self) -> bool {
        self.has_status(StatusEffect::Freeze)
            || self.has_status(StatusEffect::Sleep)
            || self.has_status(StatusEffect::Paralyze)
            || self.standing_on == Terrain::Ice
    }

    pub fn is_muted(&self) -> bool {
        self.has_status(StatusEffect::Mute)
    }

    /// Alive, not casting and not incapacitated; cooldown not considered
    pub fn is_available(&self) -> bool {
        self.is_alive() && !self.casting && !self.is_incapacitated()
    }

    pub fn can_act(&self) -> bool {
        self.is_available() && self.cooldown_ms == 0
    }

    /// Cooldown for an action of base duration `base_ms`, scaled by speed
    pub fn cooldown_duration(&self, base_ms: u64, coefficient: f64) -> u64 {
        let speed_factor = (1.0 - 0.0045 * self.stats.speed as f64).max(MIN_SPEED_FACTOR);
        let haste = if self.has_status(StatusEffect::Haste) { 0.5 } else { 1.0 };
        (base_ms as f64 * speed_factor * coefficient * haste).round() as u64
    }

    pub fn set_cooldown(&mut self, ms: u64) {
        self.cooldown_ms = ms;
    }

    pub fn tick_cooldown(&mut self, dt_ms: u64) {
        self.cooldown_ms = self.cooldown_ms.saturating_sub(dt_ms);
    }

    /// Apply a signed HP change, returns the change actually applied
    pub fn change_hp(&mut self, delta: i32) -> i32 {
        let before = self.hp;
        self.hp = (self.hp.saturating_add(delta)).clamp(0, self.stats.hp);
        if delta < 0 && self.hp > 0 {
            self.statuses.insert(StatusEffect::Sleep, 0);
        }
        if before > 0 && self.hp == 0 {
            self.on_knockout();
        }
        self.hp - before
    }

    pub fn change_mp(&mut self, delta: i32) -> i32 {
        let before = self.mp;
        self.mp = (self.mp.saturating_add(delta)).clamp(0, self.stats.mp);
        self.mp - before
    }

    fn on_knockout(&mut self) {
        for value in self.statuses.values_mut() {
            *value = 0;
        }
        self.casting = false;
    }

    /// Returns true when the status map changed
    pub fn add_status(&mut self, status: StatusEffect, ticks: u32) -> bool {
        if !self.is_alive() || ticks == 0 {
            return false;
        }
        let entry = self.statuses.entry(status).or_insert(0);
        if *entry >= ticks {
            return false;
        }
        *entry = ticks;
        true
    }

    pub fn remove_status(&mut self, status: StatusEffect) -> bool {
        match self.statuses.get_mut(&status) {
            Some(v) if *v > 0 => {
                *v = 0;
                true
            }
            _ => false,
        }
    }

    /// Advance every active status by one tick, returns true if any expired
    pub fn tick_statuses(&mut self) -> bool {
        let mut expired = false;
        for value in self.statuses.values_mut() {
            if *value > 0 {
                *value -= 1;
                expired |= *value == 0;
            }
        }
        expired
    }

    /// Burn and poison damage owed for this status tick
    pub fn status_damage(&self) -> i32 {
        let max = self.stats.hp as f64;
        let mut damage = 0;
        if self.has_status(StatusEffect::Burn) {
            damage += ((max * BURN_DAMAGE_RATIO).round() as i32).max(1);
        }
        if self.has_status(StatusEffect::Poison) {
            damage += ((max * POISON_DAMAGE_RATIO).round() as i32).max(1);
        }
        damage
    }

    /// Non-zero statuses only
    pub fn active_statuses(&self) -> BTreeMap<StatusEffect, u32> {
        self.statuses
            .iter()
            .filter(|(_, v)| **v > 0)
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    /// Effect of the terrain under the unit after it arrives or the terrain appears
    pub fn set_up_terrain(&mut self, terrain: Terrain) -> bool {
        self.standing_on = terrain;
        match terrain {
            Terrain::Fire => self.add_status(StatusEffect::Burn, TERRAIN_BURN_TICKS),
            Terrain::Ice | Terrain::None => false,
        }
    }

    /// Terrain under the unit disappeared
    pub fn remove_terrain(&mut self, terrain: Terrain) {
        if self.standing_on == terrain {
            self.standing_on = Terrain::None;
        }
    }

    /// Walking through a terrain tile on the way somewhere else
    pub fn cross_terrain(&mut self, terrain: Terrain) -> bool {
        match terrain {
            Terrain::Fire => self.add_status(StatusEffect::Burn, TERRAIN_BURN_TICKS),
            Terrain::Ice | Terrain::None => false,
        }
    }

    /// Leaving the current tile ends any standing effect
    pub fn stop_terrain_effect(&mut self) {
        self.standing_on = Terrain::None;
    }

    pub fn spell(&self, index: usize) -> Option<&'static Spell> {
        self.spells.get(index).and_then(|id| effects::spell(*id))
    }

    pub fn item(&self, index: usize) -> Option<&'static Item> {
        self.inventory.get(index).and_then(|slot| effects::item(slot.item))
    }

    /// Use up one of the item in `index`, dropping the slot when empty
    pub fn consume_item(&mut self, index: usize) -> Option<u32> {
        let slot = self.inventory.get_mut(index)?;
        let item = slot.item;
        slot.quantity = slot.quantity.saturating_sub(1);
        if slot.quantity == 0 {
            self.inventory.remove(index);
        }
        Some(item)
    }

    pub fn inventory_entries(&self) -> Vec<InventoryEntry> {
        self.inventory
            .iter()
            .map(|slot| InventoryEntry {
                item: slot.item,
                quantity: slot.quantity,
            })
            .collect()
    }

    pub fn record_interaction(&mut self, other: UnitRef) {
        if other != self.unit {
            self.interacted.insert(other);
        }
    }

    pub fn interacted_count(&self) -> usize {
        self.interacted.len()
    }

    /// Network view; `private` adds owner-only fields
    pub fn snapshot(&self, private: bool) -> UnitSnapshot {
        UnitSnapshot {
            num: self.unit.num,
            name: self.name.clone(),
            portrait: self.portrait.clone(),
            class: self.class.as_str().to_string(),
            level: self.level,
            x: self.position.x,
            y: self.position.y,
            hp: self.hp,
            max_hp: self.stats.hp,
            casting: self.casting,
            statuses: self.active_statuses(),
            mp: private.then_some(self.mp),
            max_mp: private.then_some(self.stats.mp),
            cooldown: private.then_some(self.cooldown_ms),
            spells: private.then(|| self.spells.clone()),
            inventory: private.then(|| self.inventory_entries()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Character {
        Character::new(UnitRef::new(1, 1), "Ayla", CharacterClass::Warrior, Stats::default())
    }

    #[test]
    fn hp_is_clamped_and_knockout_clears_state() {
        let mut c = unit();
        c.add_status(StatusEffect::Poison, 4);
        c.casting = true;
        assert_eq!(c.change_hp(50), 0);
        assert_eq!(c.change_hp(-250), -100);
        assert!(!c.is_alive());
        assert!(!c.casting);
        assert!(c.active_statuses().is_empty());
    }

    #[test]
    fn damage_wakes_sleepers() {
        let mut c = unit();
        c.add_status(StatusEffect::Sleep, 3);
        assert!(c.is_incapacitated());
        c.change_hp(-5);
        assert!(!c.is_incapacitated());
    }

    #[test]
    fn status_ticks_expire() {
        let mut c = unit();
        c.add_status(StatusEffect::Mute, 2);
        assert!(!c.tick_statuses());
        assert!(c.is_muted());
        assert!(c.tick_statuses());
        assert!(!c.is_muted());
    }

    #[test]
    fn add_status_keeps_longest_duration() {
        let mut c = unit();
        assert!(c.add_status(StatusEffect::Burn, 5));
        assert!(!c.add_status(StatusEffect::Burn, 2));
        assert_eq!(c.active_statuses()[&StatusEffect::Burn], 5);
    }

    #[test]
    fn speed_shortens_cooldowns() {
        let mut c = unit();
        c.stats.speed = 0;
        assert_eq!(c.cooldown_duration(1000, 1.0), 1000);
        c.stats.speed = 100;
        assert_eq!(c.cooldown_duration(1000, 1.0), 550);
        c.add_status(StatusEffect::Haste, 3);
        assert_eq!(c.cooldown_duration(1000, 1.0), 275);
    }

    #[test]
    fn standing_on_ice_freezes_until_removed() {
        let mut c = unit();
        c.set_up_terrain(Terrain::Ice);
        assert!(!c.can_act());
        c.remove_terrain(Terrain::Ice);
        assert!(c.can_act());
    }

    #[test]
    fn consuming_last_item_drops_slot() {
        let mut c = unit();
        c.inventory = vec![InventorySlot { item: 0, quantity: 1 }, InventorySlot { item: 1, quantity: 2 }];
        assert_eq!(c.consume_item(0), Some(0));
        assert_eq!(c.inventory.len(), 1);
        assert_eq!(c.consume_item(0), Some(1));
        assert_eq!(c.inventory[0].quantity, 1);
        assert_eq!(c.consume_item(5), None);
    }

    #[test]
    fn dot_has_a_floor_of_one() {
        let mut c = unit();
        c.stats.hp = 10;
        c.hp = 10;
        c.add_status(StatusEffect::Poison, 2);
        assert_eq!(c.status_damage(), 1);
    }
}
