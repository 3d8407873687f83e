//! End-of-game rewards: grade, XP, gold, elo and audience chests

use crate::ws::protocol::{ChestColor, ChestReward, League, PlayMode};

pub const XP_PER_LEVEL: u32 = 50;
pub const AVERAGE_GOLD_REWARD_PER_GAME: f64 = 100.0;

const WIN_XP_MULTIPLIER: f64 = 1.2;
const LOSS_XP_MULTIPLIER: f64 = 0.8;
const ELO_K: f64 = 30.0;

/// Audience score needed per chest
pub const SCORE_PER_CHEST: u32 = 500;

const CASUAL_CHESTS: [ChestColor; 3] = [ChestColor::Bronze, ChestColor::Bronze, ChestColor::Silver];

/// XP required to go from `level` to the next one
pub fn xp_to_next_level(level: u32) -> u32 {
    XP_PER_LEVEL * level.max(1)
}

/// (xp, gold) multipliers per mode
pub fn mode_coefficients(mode: PlayMode) -> (f64, f64) {
    match mode {
        PlayMode::Practice => (0.5, 0.5),
        PlayMode::Casual | PlayMode::CasualVsAi => (1.0, 1.0),
        PlayMode::Ranked | PlayMode::RankedVsAi => (1.25, 1.5),
    }
}

/// Aggregates of one team used to score its performance
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TeamReport {
    pub level: u32,
    pub actions: u32,
    pub offensive_actions: u32,
    pub hp_left: i32,
    pub total_hp: i32,
    pub hp_healed: u32,
    pub interacted: usize,
}

/// Share of `own` in `own + other`, or `None` when both are zero
fn share(own: f64, other: f64) -> Option<f64> {
    let total = own + other;
    (total > 0.0).then(|| own / total)
}

/// Performance in `[0, 1]`. Efficiency is rewarded: needing less healing,
/// fewer offensive actions and fewer levels than the opponent all score higher.
pub fn grade(own: &TeamReport, other: &TeamReport) -> f64 {
    let hp = if own.total_hp > 0 {
        (own.hp_left as f64 / own.total_hp as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let healing = 1.0 - share(own.hp_healed as f64, other.hp_healed as f64).unwrap_or(0.0);
    let offense = if own.offensive_actions == 1 {
        // one-shot
        1.0
    } else {
        share(own.offensive_actions as f64, other.offensive_actions as f64)
            .map(|s| 1.0 - s)
            .unwrap_or(0.0)
    };
    let level = share(own.level as f64, other.level as f64)
        .map(|s| 1.0 - s)
        .unwrap_or(0.5);

    (1.5 * hp + healing + offense + 0.5 * level) / 4.0
}

pub fn letter_grade(grade: f64) -> &'static str {
    match grade {
        g if g >= 0.95 => "S+",
        g if g >= 0.9 => "S",
        g if g >= 0.8 => "A",
        g if g >= 0.6 => "B",
        g if g >= 0.4 => "C",
        g if g >= 0.2 => "D",
        _ => "E",
    }
}

/// Chest colours a team climbs through as its audience score grows
fn chest_track(mode: PlayMode, league: League) -> [ChestColor; 3] {
    use ChestColor::{Bronze, Gold, Silver};
    if !mode.is_ranked() {
        return CASUAL_CHESTS;
    }
    match league {
        League::Bronze => [Bronze, Bronze, Bronze],
        League::Silver => [Bronze, Bronze, Silver],
        League::Gold => [Bronze, Silver, Gold],
        League::Zenith => [Silver, Gold, Gold],
        League::Apex => [Gold, Gold, Gold],
    }
}

/// One chest per 500 audience score, at most three, none in practice
pub fn compute_chests(score: u32, mode: PlayMode, league: League) -> Vec<ChestReward> {
    if mode == PlayMode::Practice {
        return Vec::new();
    }
    let earned = (score / SCORE_PER_CHEST) as usize;
    chest_track(mode, league)
        .into_iter()
        .take(earned)
        .map(|color| ChestReward { color })
        .collect()
}

/// Key that opens chests, its colour set by the grade
pub fn chest_key(grade: f64, mode: PlayMode) -> Option<ChestColor> {
    match mode {
        PlayMode::Practice => None,
        _ if grade >= 0.8 => Some(ChestColor::Gold),
        _ if grade >= 0.6 => Some(ChestColor::Silver),
        _ => Some(ChestColor::Bronze),
    }
}

/// XP for either side, higher for the winner
pub fn compute_xp(
    own: &TeamReport,
    other: &TeamReport,
    duration_ms: u64,
    is_winner: bool,
    mode: PlayMode,
) -> u32 {
    if own.interacted == 0 {
        return 0;
    }
    let level_factor = (1.0 + 0.1 * (other.level as f64 - own.level as f64)).clamp(0.5, 2.0);
    let action_factor = 1.0 + own.actions.min(200) as f64 / 200.0;
    let duration_factor = (duration_ms as f64 / 1000.0 / 300.0).clamp(0.25, 1.5);
    let outcome = if is_winner {
        WIN_XP_MULTIPLIER
    } else {
        LOSS_XP_MULTIPLIER
    };
    let (xp_coef, _) = mode_coefficients(mode);

    (XP_PER_LEVEL as f64 * level_factor * action_factor * duration_factor * outcome * xp_coef)
        .round() as u32
}

/// Gold, winner only
pub fn compute_gold(grade: f64, is_winner: bool, mode: PlayMode) -> u32 {
    if !is_winner {
        return 0;
    }
    let (_, gold_coef) = mode_coefficients(mode);
    (AVERAGE_GOLD_REWARD_PER_GAME * (grade + 0.3) * gold_coef).round() as u32
}

/// Rating change for one side of a ranked game
pub fn elo_delta(own: i32, other: i32, won: bool) -> i32 {
    let expected = 1.0 / (1.0 + 10f64.powf((other - own) as f64 / 400.0));
    let actual = if won { 1.0 } else { 0.0 };
    (ELO_K * (actual - expected)).round() as i32
}
