use std::fmt;

use serde::{Deserialize, Serialize};

/// Facing of an agent. Discriminants match the move action codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    pub const fn from_index(index: usize) -> Self {
        match index % 4 {
            0 => Direction::Up,
            1 => Direction::Right,
            2 => Direction::Down,
            _ => Direction::Left,
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// (row, col) step for one cell in this direction.
    pub const fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (-1, 0),
            Direction::Right => (0, 1),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
        }
    }

    /// The next direction clockwise after turning `steps` quarter turns.
    pub const fn rotated(self, steps: usize) -> Self {
        Self::from_index(self.index() + steps)
    }
}

/// One discrete action chosen for an agent for a single tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Move(Direction),
    Noop,
    Pickup,
    Mine,
    PackageFood,
    BuildWall,
    Attack,
    Reproduce,
}

impl Action {
    pub const COUNT: usize = 11;

    /// Decodes the wire code used by the action buffer. Unknown codes are
    /// treated as `Noop`.
    pub const fn from_code(code: i32) -> Self {
        match code {
            0..=3 => Action::Move(Direction::from_index(code as usize)),
            5 => Action::Pickup,
            6 => Action::Mine,
            7 => Action::PackageFood,
            8 => Action::BuildWall,
            9 => Action::Attack,
            10 => Action::Reproduce,
            _ => Action::Noop,
        }
    }

    pub const fn code(self) -> i32 {
        match self {
            Action::Move(dir) => dir as i32,
            Action::Noop => 4,
            Action::Pickup => 5,
            Action::Mine => 6,
            Action::PackageFood => 7,
            Action::BuildWall => 8,
            Action::Attack => 9,
            Action::Reproduce => 10,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Action::Move(_) => "move",
            Action::Noop => "noop",
            Action::Pickup => "pickup",
            Action::Mine => "mine",
            Action::PackageFood => "package_food",
            Action::BuildWall => "build_wall",
            Action::Attack => "attack",
            Action::Reproduce => "reproduce",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Move(dir) => write!(f, "move:{:?}", dir),
            other => write!(f, "{}", other.label()),
        }
    }
}
