//! Arena geometry: playable bounds, distances, line of sight and area queries

use crate::ws::protocol::Tile;

/// Default arena size
pub const GRID_WIDTH: i32 = 20;
pub const GRID_HEIGHT: i32 = 10;

/// How many rows at the top and bottom get their corners trimmed
const CORNER_TRIM: i32 = 3;

impl Tile {
    /// Squared euclidean distance
    pub fn dist_sq(self, other: Tile) -> i32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// King-move distance, used for melee reach and areas
    pub fn chebyshev(self, other: Tile) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// True for the eight surrounding tiles
    pub fn is_adjacent(self, other: Tile) -> bool {
        self != other && self.chebyshev(other) <= 1
    }
}

/// Oval arena bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(GRID_WIDTH, GRID_HEIGHT)
    }
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Tiles outside the rectangle or in the trimmed corners
    pub fn is_skip(&self, tile: Tile) -> bool {
        if tile.x < 0 || tile.y < 0 || tile.x >= self.width || tile.y >= self.height {
            return true;
        }
        let skip = if tile.y < self.height / 2 {
            (CORNER_TRIM - tile.y - 1).max(0)
        } else {
            (tile.y - (self.height - CORNER_TRIM)).max(0)
        };
        tile.x < skip || tile.x >= self.width - skip
    }

    pub fn contains(&self, tile: Tile) -> bool {
        !self.is_skip(tile)
    }

    /// Every playable tile, row-major
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.height)
            .flat_map(move |y| (0..self.width).map(move |x| Tile::new(x, y)))
            .filter(move |t| self.contains(*t))
    }

    /// Playable tiles within euclidean `radius` of `center`, center excluded
    pub fn tiles_in_range(&self, center: Tile, radius: i32) -> Vec<Tile> {
        let mut out = Vec::new();
        for y in (center.y - radius)..=(center.y + radius) {
            for x in (center.x - radius)..=(center.x + radius) {
                let tile = Tile::new(x, y);
                if tile != center && self.contains(tile) && center.dist_sq(tile) <= radius * radius
                {
                    out.push(tile);
                }
            }
        }
        out
    }

    /// Playable tiles within chebyshev `radius` of `center`, center included
    pub fn tiles_in_area(&self, center: Tile, radius: i32) -> Vec<Tile> {
        let mut out = Vec::new();
        for y in (center.y - radius)..=(center.y + radius) {
            for x in (center.x - radius)..=(center.x + radius) {
                let tile = Tile::new(x, y);
                if self.contains(tile) {
                    out.push(tile);
                }
            }
        }
        out
    }
}

/// Sampled points of the straight segment `from -> to`, endpoints included,
/// consecutive duplicates removed.
pub fn cells_on_the_way(from: Tile, to: Tile) -> Vec<Tile> {
    let dx = (to.x - from.x) as f64;
    let dy = (to.y - from.y) as f64;
    let steps = (dx * dx + dy * dy).sqrt().ceil() as i32;

    let mut cells = vec![from];
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        let cell = Tile::new(
            from.x + (t * dx).round() as i32,
            from.y + (t * dy).round() as i32,
        );
        if cells.last() != Some(&cell) {
            cells.push(cell);
        }
    }
    if cells.last() != Some(&to) {
        cells.push(to);
    }
    cells
}

/// Every intermediate cell between `from` and `to` passes `is_free`
pub fn line_of_sight(from: Tile, to: Tile, is_free: impl Fn(Tile) -> bool) -> bool {
    let cells = cells_on_the_way(from, to);
    if cells.len() <= 2 {
        return true;
    }
    cells[1..cells.len() - 1].iter().all(|c| is_free(*c))
}
