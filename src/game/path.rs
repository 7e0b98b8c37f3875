// src/game/path.rs
//! In-room pathfinding primitive
//!
//! Breadth-first search over the 50x50 grid. Good enough for the sandbox's
//! `findPath` binding; there is no terrain cost model.

use crate::game::constants::ROOM_SIZE;
use crate::game::position::{Direction, RoomPosition, Step};
use crate::game::room::Room;
use std::collections::VecDeque;

const TILES: usize = ROOM_SIZE as usize * ROOM_SIZE as usize;

fn tile(x: u8, y: u8) -> usize {
    usize::from(y) * usize::from(ROOM_SIZE) + usize::from(x)
}

/// Directions leading from `from` to within `range` of `to`. `Some(vec![])`
/// when already in range, `None` when unreachable or in another room.
pub fn find_path(room: &Room, from: RoomPosition, to: RoomPosition, range: u32) -> Option<Vec<Direction>> {
    if from.room != room.name() || to.room != room.name() {
        return None;
    }
    if from.in_range_to(&to, range) {
        return Some(Vec::new());
    }

    let mut came_from: Vec<Option<(usize, Direction)>> = vec![None; TILES];
    let mut seen = vec![false; TILES];
    let mut queue = VecDeque::new();
    seen[tile(from.x, from.y)] = true;
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        for direction in Direction::ALL {
            let Step::Inside(next) = current.step(direction) else {
                continue;
            };
            let index = tile(next.x, next.y);
            if seen[index] {
                continue;
            }
            seen[index] = true;

            if !room.is_walkable(next.x, next.y) {
                continue;
            }
            came_from[index] = Some((tile(current.x, current.y), direction));

            if next.in_range_to(&to, range) {
                return Some(unwind(&came_from, tile(from.x, from.y), index));
            }
            queue.push_back(next);
        }
    }

    None
}

fn unwind(came_from: &[Option<(usize, Direction)>], start: usize, mut at: usize) -> Vec<Direction> {
    let mut directions = Vec::new();
    while at != start {
        match came_from[at] {
            Some((previous, direction)) => {
                directions.push(direction);
                at = previous;
            }
            None => break,
        }
    }
    directions.reverse();
    directions
}
