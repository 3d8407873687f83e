//! Speed-based turn queue
//!
//! Each unit carries a virtual `next_action_time`. The unit with the lowest
//! time among the living acts next; acting pushes its time forward by a base
//! delay for the action's speed class, shortened by speed and jittered, and
//! never lets it land at or before whoever was already next.

use rand::Rng;

use super::character::UnitRef;

/// Spacing kept between the acting unit and the next one in line
const MIN_GAP: f64 = 1.0;
const JITTER: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedClass {
    Pass,
    Fast,
    Normal,
    Slow,
}

impl SpeedClass {
    pub fn base_delay(self) -> f64 {
        match self {
            SpeedClass::Pass => 50.0,
            SpeedClass::Fast => 100.0,
            SpeedClass::Normal => 150.0,
            SpeedClass::Slow => 250.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnEntry {
    pub unit: UnitRef,
    pub next_action_time: f64,
    pub pass_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TurnSystem {
    current_time: f64,
    entries: Vec<TurnEntry>,
}

pub fn initial_action_time(speed: i32) -> f64 {
    1001.0 - 5.0 * speed as f64
}

impl TurnSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, units: impl IntoIterator<Item = (UnitRef, i32)>) {
        self.current_time = 0.0;
        self.entries = units
            .into_iter()
            .map(|(unit, speed)| TurnEntry {
                unit,
                next_action_time: initial_action_time(speed),
                pass_count: 0,
            })
            .collect();
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn entry(&self, unit: UnitRef) -> Option<&TurnEntry> {
        self.entries.iter().find(|e| e.unit == unit)
    }

    /// Lowest time among living units; ties resolved by team then slot
    fn earliest(&self, is_alive: &impl Fn(UnitRef) -> bool) -> Option<&TurnEntry> {
        self.entries
            .iter()
            .filter(|e| is_alive(e.unit))
            .min_by(|a, b| {
                a.next_action_time
                    .total_cmp(&b.next_action_time)
                    .then(a.unit.cmp(&b.unit))
            })
    }

    /// Unit due to act, advancing the virtual clock to its time
    pub fn next_actor(&mut self, is_alive: impl Fn(UnitRef) -> bool) -> Option<UnitRef> {
        let (unit, time) = self
            .earliest(&is_alive)
            .map(|e| (e.unit, e.next_action_time))?;
        self.current_time = self.current_time.max(time);
        Some(unit)
    }

    /// Reschedule `unit` after it performed an action of `class`
    pub fn process_action(
        &mut self,
        unit: UnitRef,
        class: SpeedClass,
        speed: i32,
        is_alive: impl Fn(UnitRef) -> bool,
        rng: &mut impl Rng,
    ) {
        let min_other = self
            .entries
            .iter()
            .filter(|e| e.unit != unit && is_alive(e.unit))
            .map(|e| e.next_action_time)
            .min_by(|a, b| a.total_cmp(b));

        let Some(entry) = self.entries.iter_mut().find(|e| e.unit == unit) else {
            return;
        };

        let delay = class.base_delay() * (1.0 - 0.0045 * speed as f64);
        let mut next = entry.next_action_time + delay + rng.gen_range(-JITTER..=JITTER);
        if let Some(min_other) = min_other {
            if next <= min_other {
                next = min_other + MIN_GAP;
            }
        }
        entry.next_action_time = next;
        if class == SpeedClass::Pass {
            entry.pass_count += 1;
        } else {
            entry.pass_count = 0;
        }
    }

    /// Living units sorted by when they act
    pub fn order(&self, is_alive: impl Fn(UnitRef) -> bool) -> Vec<UnitRef> {
        let mut living: Vec<&TurnEntry> = self.entries.iter().filter(|e| is_alive(e.unit)).collect();
        living.sort_by(|a, b| {
            a.next_action_time
                .total_cmp(&b.next_action_time)
                .then(a.unit.cmp(&b.unit))
        });
        living.into_iter().map(|e| e.unit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const A: UnitRef = UnitRef::new(1, 1);
    const B: UnitRef = UnitRef::new(2, 1);
    const C: UnitRef = UnitRef::new(2, 2);

    #[test]
    fn faster_units_go_first() {
        let mut turns = TurnSystem::new();
        turns.initialize([(A, 10), (B, 40)]);
        assert_eq!(turns.entry(A).unwrap().next_action_time, 951.0);
        assert_eq!(turns.next_actor(|_| true), Some(B));
        assert_eq!(turns.current_time(), 801.0);
    }

    #[test]
    fn acting_never_overtakes_the_next_unit() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut turns = TurnSystem::new();
        turns.initialize([(A, 100), (B, 0), (C, 0)]);

        for _ in 0..50 {
            let actor = turns.next_actor(|_| true).unwrap();
            let before: Vec<f64> = turns
                .order(|u| u != actor)
                .iter()
                .map(|u| turns.entry(*u).unwrap().next_action_time)
                .collect();
            turns.process_action(actor, SpeedClass::Fast, 100, |_| true, &mut rng);
            let mine = turns.entry(actor).unwrap().next_action_time;
            assert!(mine > before[0]);
        }
    }

    #[test]
    fn dead_units_are_skipped() {
        let mut turns = TurnSystem::new();
        turns.initialize([(A, 10), (B, 40)]);
        assert_eq!(turns.next_actor(|u| u != B), Some(A));
        assert_eq!(turns.order(|u| u != B), vec![A]);
    }

    #[test]
    fn passes_are_counted_until_a_real_action() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut turns = TurnSystem::new();
        turns.initialize([(A, 10), (B, 10)]);
        turns.process_action(A, SpeedClass::Pass, 10, |_| true, &mut rng);
        turns.process_action(A, SpeedClass::Pass, 10, |_| true, &mut rng);
        assert_eq!(turns.entry(A).unwrap().pass_count, 2);
        turns.process_action(A, SpeedClass::Slow, 10, |_| true, &mut rng);
        assert_eq!(turns.entry(A).unwrap().pass_count, 0);
    }

    #[test]
    fn lone_survivor_keeps_acting() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut turns = TurnSystem::new();
        turns.initialize([(A, 10)]);
        turns.process_action(A, SpeedClass::Normal, 10, |_| true, &mut rng);
        assert_eq!(turns.next_actor(|_| true), Some(A));
    }
}
