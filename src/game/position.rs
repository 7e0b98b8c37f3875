// src/game/position.rs
//! Room names, directions and in-room positions
//!
//! Room names follow the `W<x>N<y>` / `E<x>S<y>` convention. Internally a
//! room is addressed by signed world coordinates where `W0` is `-1` and `E0`
//! is `0` (likewise `N0` / `S0`).

use crate::game::constants::ROOM_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest index a parsed room name may carry; keeps every parsed room's
/// neighbours representable
pub const MAX_ROOM_INDEX: i32 = i32::MAX - 1;

/// Name of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName {
    x: i32,
    y: i32,
}

impl RoomName {
    pub fn from_coords(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn coords(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// Room adjacent in the given direction, `None` past the coordinate range
    pub fn neighbor(&self, direction: Direction) -> Option<RoomName> {
        let (dx, dy) = direction.offset();
        self.offset_by(dx, dy)
    }

    fn offset_by(&self, dx: i32, dy: i32) -> Option<RoomName> {
        Some(RoomName::from_coords(self.x.checked_add(dx)?, self.y.checked_add(dy)?))
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // -(c + 1) stays in range for every negative c, i32::MIN included
        let (h, x) = if self.x < 0 { ('W', -(self.x + 1)) } else { ('E', self.x) };
        let (v, y) = if self.y < 0 { ('N', -(self.y + 1)) } else { ('S', self.y) };
        write!(f, "{}{}{}{}", h, x, v, y)
    }
}

/// Error returned for malformed room names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room name: {0:?}")]
pub struct InvalidRoomName(pub String);

impl FromStr for RoomName {
    type Err = InvalidRoomName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRoomName(s.to_string());
        let split = s.find(|c: char| c == 'N' || c == 'S').ok_or_else(invalid)?;
        let (horizontal, vertical) = s.split_at(split);

        let axis = |part: &str, neg: char, pos: char| -> Option<i32> {
            let mut chars = part.chars();
            let sign = chars.next()?;
            let digits = chars.as_str();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: i32 = digits.parse().ok().filter(|value| *value <= MAX_ROOM_INDEX)?;
            match sign {
                c if c == neg => Some(-value - 1),
                c if c == pos => Some(value),
                _ => None,
            }
        };

        let x = axis(horizontal, 'W', 'E').ok_or_else(invalid)?;
        let y = axis(vertical, 'N', 'S').ok_or_else(invalid)?;
        Ok(RoomName { x, y })
    }
}

impl TryFrom<String> for RoomName {
    type Error = InvalidRoomName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.to_string()
    }
}

/// The eight movement directions, clockwise from the top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Direction {
    Top = 1,
    TopRight = 2,
    Right = 3,
    BottomRight = 4,
    Bottom = 5,
    BottomLeft = 6,
    Left = 7,
    TopLeft = 8,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Top,
        Direction::TopRight,
        Direction::Right,
        Direction::BottomRight,
        Direction::Bottom,
        Direction::BottomLeft,
        Direction::Left,
        Direction::TopLeft,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value).checked_sub(1)?).copied()
    }

    /// `(dx, dy)` with y growing downwards
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Top => (0, -1),
            Direction::TopRight => (1, -1),
            Direction::Right => (1, 0),
            Direction::BottomRight => (1, 1),
            Direction::Bottom => (0, 1),
            Direction::BottomLeft => (-1, 1),
            Direction::Left => (-1, 0),
            Direction::TopLeft => (-1, -1),
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Direction::from_u8(value).ok_or_else(|| format!("invalid direction {}", value))
    }
}

impl From<Direction> for u8 {
    fn from(value: Direction) -> Self {
        value as u8
    }
}

/// Result of stepping one tile from a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Inside(RoomPosition),
    /// Crossed the room edge; position is in the neighbouring room
    Exit(RoomPosition),
    /// Edge of the coordinate range; no room lies beyond
    Edge,
}

/// A tile inside a named room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomPosition {
    pub room: RoomName,
    pub x: u8,
    pub y: u8,
}

impl RoomPosition {
    /// Returns `None` when the coordinates are outside the room
    pub fn new(room: RoomName, x: u8, y: u8) -> Option<Self> {
        (x < ROOM_SIZE && y < ROOM_SIZE).then_some(Self { room, x, y })
    }

    /// Chebyshev distance; positions in different rooms are infinitely far
    pub fn range_to(&self, other: &RoomPosition) -> u32 {
        if self.room != other.room {
            return u32::MAX;
        }
        let dx = (i32::from(self.x) - i32::from(other.x)).unsigned_abs();
        let dy = (i32::from(self.y) - i32::from(other.y)).unsigned_abs();
        dx.max(dy)
    }

    pub fn in_range_to(&self, other: &RoomPosition, range: u32) -> bool {
        self.range_to(other) <= range
    }

    pub fn is_near_to(&self, other: &RoomPosition) -> bool {
        self.in_range_to(other, 1)
    }

    /// The tile one step away, wrapping into the neighbouring room at edges
    pub fn step(&self, direction: Direction) -> Step {
        let (dx, dy) = direction.offset();
        let size = i32::from(ROOM_SIZE);
        let nx = i32::from(self.x) + dx;
        let ny = i32::from(self.y) + dy;

        if (0..size).contains(&nx) && (0..size).contains(&ny) {
            return Step::Inside(RoomPosition {
                room: self.room,
                x: nx as u8,
                y: ny as u8,
            });
        }

        let Some(room) = self.room.offset_by(nx.div_euclid(size), ny.div_euclid(size)) else {
            return Step::Edge;
        };
        Step::Exit(RoomPosition {
            room,
            x: nx.rem_euclid(size) as u8,
            y: ny.rem_euclid(size) as u8,
        })
    }
}

impl fmt::Display for RoomPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {},{}]", self.room, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_name_round_trip() {
        for name in ["W0N0", "E0S0", "W12N7", "E3S41"] {
            let parsed: RoomName = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        assert_eq!("W0N0".parse::<RoomName>().unwrap().coords(), (-1, -1));
        assert_eq!("E0S0".parse::<RoomName>().unwrap().coords(), (0, 0));
    }

    #[test]
    fn test_room_name_rejects_garbage() {
        for name in ["", "W", "WN", "X1N1", "W1", "W-1N1", "W1N1x", "N1W1"] {
            assert!(name.parse::<RoomName>().is_err(), "{} parsed", name);
        }
    }

    #[test]
    fn test_neighbor_crosses_zero() {
        let w0: RoomName = "W0N0".parse().unwrap();
        assert_eq!(w0.neighbor(Direction::Right).unwrap().to_string(), "E0N0");
        assert_eq!(w0.neighbor(Direction::Bottom).unwrap().to_string(), "W0S0");
    }

    #[test]
    fn test_extreme_room_names() {
        for name in ["W2147483647N0", "E2147483647S0", "E0S2147483647", "W99999999999N0"] {
            assert!(name.parse::<RoomName>().is_err(), "{} parsed", name);
        }

        let far: RoomName = "W2147483646N0".parse().unwrap();
        assert_eq!(far.to_string(), "W2147483646N0");
        assert_eq!(far.neighbor(Direction::Left).unwrap().to_string(), "W2147483647N0");
        let east: RoomName = "E2147483646S0".parse().unwrap();
        assert_eq!(east.neighbor(Direction::Right).unwrap().to_string(), "E2147483647S0");

        let corner = RoomName::from_coords(i32::MIN, i32::MAX);
        assert_eq!(corner.to_string(), "W2147483647S2147483647");
        assert_eq!(corner.neighbor(Direction::Left), None);
        assert_eq!(corner.neighbor(Direction::Bottom), None);
        assert!(corner.neighbor(Direction::TopRight).is_some());

        let pos = RoomPosition::new(corner, 0, 49).unwrap();
        assert_eq!(pos.step(Direction::Left), Step::Edge);
        assert_eq!(pos.step(Direction::Bottom), Step::Edge);
        assert!(matches!(pos.step(Direction::Top), Step::Inside(_)));
    }

    #[test]
    fn test_step_wraps_at_edge() {
        let room: RoomName = "W1N1".parse().unwrap();
        let pos = RoomPosition::new(room, 49, 10).unwrap();
        match pos.step(Direction::Right) {
            Step::Exit(next) => {
                assert_eq!(next.room.to_string(), "W0N1");
                assert_eq!((next.x, next.y), (0, 10));
            }
            other => panic!("expected exit, got {:?}", other),
        }
        assert!(matches!(pos.step(Direction::Left), Step::Inside(_)));
    }

    #[test]
    fn test_range() {
        let room: RoomName = "W1N1".parse().unwrap();
        let a = RoomPosition::new(room, 10, 10).unwrap();
        let b = RoomPosition::new(room, 12, 9).unwrap();
        assert_eq!(a.range_to(&b), 2);
        assert!(!a.is_near_to(&b));
        assert!(RoomPosition::new(room, 50, 0).is_none());
    }

    #[test]
    fn test_direction_from_u8() {
        assert_eq!(Direction::from_u8(1), Some(Direction::Top));
        assert_eq!(Direction::from_u8(8), Some(Direction::TopLeft));
        assert_eq!(Direction::from_u8(0), None);
        assert_eq!(Direction::from_u8(9), None);
    }
}
