//! Grid cell math and topic naming.
//!
//! The world is cut into square cells of `cell_size` world units. Every cell has
//! exactly one topic on the substrate, and an observer listens to the 3x3 block of
//! cells centred on the one it occupies.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Topic every session joins for presence.
pub const PRESENCE_TOPIC: &str = "game:presence";

/// Topic carrying round state, combat, and economy events.
pub const GLOBAL_TOPIC: &str = "game:tournament";

const CELL_PREFIX: &str = "cell:";

/// Cell coordinates are clamped to this magnitude so that neighbour offsets can
/// never overflow.
const CELL_COORD_LIMIT: i64 = 1 << 53;

/// Integer address of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i64,
    pub y: i64,
}

impl Cell {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Maps world coordinates to the cell containing them.
    ///
    /// Uses floor division, so `-0.5` lands in cell `-1` rather than `0`.
    /// Non-finite input is clamped like any other out-of-range value; callers
    /// validate snapshots before they get here.
    pub fn of(x: f64, y: f64, cell_size: f64) -> Self {
        Self {
            x: floor_to_cell(x / cell_size),
            y: floor_to_cell(y / cell_size),
        }
    }

    /// Topic name for this cell: `cell:<x>:<y>`.
    pub fn topic(&self) -> Topic {
        Topic(format!("{CELL_PREFIX}{}:{}", self.x, self.y))
    }

    /// The cell itself and its eight neighbours.
    pub fn neighborhood(&self) -> [Cell; 9] {
        let mut cells = [*self; 9];
        let mut i = 0;
        for dx in -1..=1 {
            for dy in -1..=1 {
                cells[i] = Cell::new(self.x + dx, self.y + dy);
                i += 1;
            }
        }
        cells
    }

    /// Topic names of [`Cell::neighborhood`].
    pub fn neighborhood_topics(&self) -> HashSet<Topic> {
        self.neighborhood().iter().map(Cell::topic).collect()
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.x, self.y)
    }
}

fn floor_to_cell(value: f64) -> i64 {
    let floored = value.floor();
    if floored.is_nan() {
        return 0;
    }
    // `as` saturates, the clamp keeps room for the +/-1 neighbour offsets
    (floored as i64).clamp(-CELL_COORD_LIMIT, CELL_COORD_LIMIT)
}

/// Name of a channel on the pub/sub substrate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(pub String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn presence() -> Self {
        Self::new(PRESENCE_TOPIC)
    }

    pub fn global() -> Self {
        Self::new(GLOBAL_TOPIC)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a cell topic back into its cell. Returns `None` for any other topic.
    pub fn cell(&self) -> Option<Cell> {
        let rest = self.0.strip_prefix(CELL_PREFIX)?;
        let (x, y) = rest.split_once(':')?;
        Some(Cell::new(x.parse().ok()?, y.parse().ok()?))
    }

    pub fn is_cell(&self) -> bool {
        self.cell().is_some()
    }
}

impl From<Cell> for Topic {
    fn from(cell: Cell) -> Self {
        cell.topic()
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_of_uses_floor_division() {
        assert_eq!(Cell::of(0.0, 0.0, 400.0), Cell::new(0, 0));
        assert_eq!(Cell::of(399.9, 400.0, 400.0), Cell::new(0, 1));
        assert_eq!(Cell::of(-0.5, -400.0, 400.0), Cell::new(-1, -1));
        assert_eq!(Cell::of(-400.1, 1200.0, 400.0), Cell::new(-2, 3));
    }

    #[test]
    fn test_same_cell_same_topic() {
        let a = Cell::of(10.0, 20.0, 400.0);
        let b = Cell::of(390.0, 5.0, 400.0);
        assert_eq!(a.topic(), b.topic());
        assert_eq!(a.topic().as_str(), "cell:0:0");
    }

    #[test]
    fn test_neighborhood_is_nine_distinct_topics() {
        for cell in [Cell::new(0, 0), Cell::new(-3, 7), Cell::new(1, 1)] {
            let topics = cell.neighborhood_topics();
            assert_eq!(topics.len(), 9);
            assert!(topics.contains(&cell.topic()));
            assert!(topics.contains(&Cell::new(cell.x - 1, cell.y + 1).topic()));
            assert!(!topics.contains(&Cell::new(cell.x + 2, cell.y).topic()));
        }
    }

    #[test]
    fn test_topic_parses_back_to_cell() {
        let cell = Cell::new(-12, 40);
        assert_eq!(cell.topic().cell(), Some(cell));
        assert_eq!(Topic::global().cell(), None);
        assert_eq!(Topic::new("cell:x:1").cell(), None);
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        let cell = Cell::of(f64::MAX, f64::MIN, 400.0);
        assert_eq!(cell.neighborhood_topics().len(), 9);
    }
}
