use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, direction: Direction, distance: i32) -> Self {
        let (dx, dy) = direction.delta();
        Self {
            x: self.x + dx * distance,
            y: self.y + dy * distance,
        }
    }

    pub fn in_bounds(self, map_size: i32) -> bool {
        self.x >= 0 && self.x < map_size && self.y >= 0 && self.y < map_size
    }

    /// Store key form, `"x,y"`.
    pub fn key(self) -> String {
        format!("{},{}", self.x, self.y)
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let (x, y) = key.split_once(',')?;
        let x = x.trim().parse().ok()?;
        let y = y.trim().parse().ok()?;
        Some(Self { x, y })
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Ray order used by detonation: +x, -x, +y, -y.
    pub const CARDINAL: [Direction; 4] = [
        Direction::Right,
        Direction::Left,
        Direction::Down,
        Direction::Up,
    ];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    /// Heading of a move from `from` to `to`, by dominant axis. `None` when
    /// the cells are equal.
    pub fn between(from: Cell, to: Cell) -> Option<Self> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx == 0 && dy == 0 {
            return None;
        }

        if dx.abs() >= dy.abs() {
            Some(if dx > 0 {
                Direction::Right
            } else {
                Direction::Left
            })
        } else {
            Some(if dy > 0 {
                Direction::Down
            } else {
                Direction::Up
            })
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(format!("unknown direction `{other}`")),
        }
    }
}

/// Occupancy queries the explosion engine and movement checks run against.
pub trait SpatialIndex {
    fn map_size(&self) -> i32;
    fn is_wall(&self, cell: Cell) -> bool;
    fn is_block(&self, cell: Cell) -> bool;
    fn is_occupied_by_player(&self, cell: Cell) -> bool;
    fn is_bomb_at(&self, cell: Cell) -> bool;

    fn in_bounds(&self, cell: Cell) -> bool {
        cell.in_bounds(self.map_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_key_parses_back() {
        let cell = Cell::new(7, 12);
        assert_eq!(cell.key(), "7,12");
        assert_eq!(Cell::parse_key(&cell.key()), Some(cell));
        assert_eq!(Cell::parse_key("-1,4"), Some(Cell::new(-1, 4)));
    }

    #[test]
    fn cell_key_parser_rejects_garbage() {
        assert_eq!(Cell::parse_key("7"), None);
        assert_eq!(Cell::parse_key("a,b"), None);
        assert_eq!(Cell::parse_key(""), None);
    }

    #[test]
    fn offset_follows_direction_deltas() {
        let origin = Cell::new(5, 5);
        assert_eq!(origin.offset(Direction::Right, 2), Cell::new(7, 5));
        assert_eq!(origin.offset(Direction::Up, 3), Cell::new(5, 2));
        assert_eq!(origin.offset(Direction::Left, 0), origin);
    }

    #[test]
    fn bounds_exclude_map_size() {
        assert!(Cell::new(0, 0).in_bounds(15));
        assert!(Cell::new(14, 14).in_bounds(15));
        assert!(!Cell::new(15, 3).in_bounds(15));
        assert!(!Cell::new(3, -1).in_bounds(15));
    }

    #[test]
    fn heading_uses_dominant_axis() {
        let origin = Cell::new(4, 4);
        assert_eq!(Direction::between(origin, Cell::new(5, 4)), Some(Direction::Right));
        assert_eq!(Direction::between(origin, Cell::new(4, 1)), Some(Direction::Up));
        assert_eq!(Direction::between(origin, Cell::new(1, 5)), Some(Direction::Left));
        assert_eq!(Direction::between(origin, origin), None);
    }
}
