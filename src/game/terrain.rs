//! Terrain state machine
//!
//! Tiles hold at most one terrain. Painting a terrain onto a tile holding an
//! incompatible one cancels both out. Every change is reported as a
//! [`TerrainTransition`] so the caller can apply side effects to occupants
//! and broadcast the diff.

use std::collections::{HashMap, HashSet};

use crate::ws::protocol::{Terrain, TerrainUpdate, Tile};

use super::grid::Grid;

/// Symmetric relation of terrains that annihilate each other
#[derive(Debug, Clone, Default)]
pub struct Incompatibility {
    pairs: HashSet<(Terrain, Terrain)>,
}

impl Incompatibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, a: Terrain, b: Terrain) {
        self.pairs.insert((a, b));
        self.pairs.insert((b, a));
    }

    pub fn conflicts(&self, a: Terrain, b: Terrain) -> bool {
        self.pairs.contains(&(a, b))
    }
}

/// What happened to one tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerrainTransition {
    pub tile: Tile,
    pub previous: Terrain,
    pub current: Terrain,
}

/// Side effect the occupant of a transitioned tile must receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainSideEffect {
    SetUp(Terrain),
    Remove(Terrain),
}

impl TerrainTransition {
    pub fn side_effect(&self) -> Option<TerrainSideEffect> {
        match (self.previous, self.current) {
            (Terrain::None, Terrain::None) => None,
            (Terrain::None, new) => Some(TerrainSideEffect::SetUp(new)),
            (old, Terrain::None) => Some(TerrainSideEffect::Remove(old)),
            _ => None,
        }
    }

    pub fn to_update(&self) -> TerrainUpdate {
        TerrainUpdate {
            x: self.tile.x,
            y: self.tile.y,
            terrain: self.current,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerrainManager {
    tiles: HashMap<Tile, Terrain>,
    incompatibility: Incompatibility,
}

impl Default for TerrainManager {
    fn default() -> Self {
        let mut incompatibility = Incompatibility::new();
        incompatibility.add(Terrain::Fire, Terrain::Ice);
        Self::new(incompatibility)
    }
}

impl TerrainManager {
    pub fn new(incompatibility: Incompatibility) -> Self {
        Self {
            tiles: HashMap::new(),
            incompatibility,
        }
    }

    pub fn get(&self, tile: Tile) -> Terrain {
        self.tiles.get(&tile).copied().unwrap_or_default()
    }

    pub fn has_obstacle(&self, tile: Tile) -> bool {
        self.get(tile) == Terrain::Ice
    }

    /// Outcome of painting `incoming` over `existing`
    pub fn resolve(&self, existing: Terrain, incoming: Terrain) -> Terrain {
        if self.incompatibility.conflicts(existing, incoming) {
            Terrain::None
        } else {
            incoming
        }
    }

    fn set(&mut self, tile: Tile, terrain: Terrain) -> Option<TerrainTransition> {
        let previous = self.get(tile);
        if previous == terrain {
            return None;
        }
        if terrain == Terrain::None {
            self.tiles.remove(&tile);
        } else {
            self.tiles.insert(tile, terrain);
        }
        Some(TerrainTransition {
            tile,
            previous,
            current: terrain,
        })
    }

    /// Paint a spell's terrain over its area, returning the changed tiles in
    /// row-major order.
    pub fn apply_spell(
        &mut self,
        grid: &Grid,
        terrain: Terrain,
        center: Tile,
        radius: i32,
    ) -> Vec<TerrainTransition> {
        grid.tiles_in_area(center, radius)
            .into_iter()
            .filter_map(|tile| {
                let next = self.resolve(self.get(tile), terrain);
                self.set(tile, next)
            })
            .collect()
    }

    /// Break the ice obstacle on `tile`
    pub fn remove_ice(&mut self, tile: Tile) -> Option<TerrainTransition> {
        if self.has_obstacle(tile) {
            self.set(tile, Terrain::None)
        } else {
            None
        }
    }

    /// Every non-empty tile, for status snapshots
    pub fn snapshot(&self) -> Vec<TerrainUpdate> {
        let mut updates: Vec<TerrainUpdate> = self
            .tiles
            .iter()
            .map(|(tile, terrain)| TerrainUpdate {
                x: tile.x,
                y: tile.y,
                terrain: *terrain,
            })
            .collect();
        updates.sort_by_key(|u| (u.y, u.x));
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_over_ice_cancels_out() {
        let grid = Grid::default();
        let mut terrain = TerrainManager::default();
        let center = Tile::new(10, 5);

        let placed = terrain.apply_spell(&grid, Terrain::Ice, center, 0);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side_effect(), Some(TerrainSideEffect::SetUp(Terrain::Ice)));

        let cleared = terrain.apply_spell(&grid, Terrain::Fire, center, 0);
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].current, Terrain::None);
        assert_eq!(cleared[0].side_effect(), Some(TerrainSideEffect::Remove(Terrain::Ice)));
        assert_eq!(terrain.get(center), Terrain::None);
    }

    #[test]
    fn repainting_same_terrain_reports_nothing() {
        let grid = Grid::default();
        let mut terrain = TerrainManager::default();
        let first = terrain.apply_spell(&grid, Terrain::Fire, Tile::new(10, 5), 1);
        assert_eq!(first.len(), 9);
        assert!(terrain.snapshot().iter().all(|u| u.terrain == Terrain::Fire));
        assert_eq!(terrain.snapshot().len(), 9);
        let second = terrain.apply_spell(&grid, Terrain::Fire, Tile::new(10, 5), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn relation_is_symmetric() {
        let terrain = TerrainManager::default();
        assert_eq!(terrain.resolve(Terrain::Fire, Terrain::Ice), Terrain::None);
        assert_eq!(terrain.resolve(Terrain::Ice, Terrain::Fire), Terrain::None);
        assert_eq!(terrain.resolve(Terrain::None, Terrain::Fire), Terrain::Fire);
    }

    #[test]
    fn only_ice_can_be_broken() {
        let grid = Grid::default();
        let mut terrain = TerrainManager::default();
        let tile = Tile::new(8, 4);
        terrain.apply_spell(&grid, Terrain::Fire, tile, 0);
        assert!(terrain.remove_ice(tile).is_none());

        let other = Tile::new(3, 4);
        terrain.apply_spell(&grid, Terrain::Ice, other, 0);
        let broken = terrain.remove_ice(other).unwrap();
        assert_eq!(broken.previous, Terrain::Ice);
        assert!(!terrain.has_obstacle(other));
    }
}
