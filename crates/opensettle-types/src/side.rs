//! Leg sides and per-side flags shared by deals and instructions.

use serde::{Deserialize, Serialize};

/// One side of a two-party exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegSide {
    A,
    B,
}

impl LegSide {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub const BOTH: [Self; 2] = [Self::A, Self::B];
}

impl std::fmt::Display for LegSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// A boolean per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LegFlags {
    pub a: bool,
    pub b: bool,
}

impl LegFlags {
    #[must_use]
    pub fn get(&self, side: LegSide) -> bool {
        match side {
            LegSide::A => self.a,
            LegSide::B => self.b,
        }
    }

    pub fn set(&mut self, side: LegSide) {
        match side {
            LegSide::A => self.a = true,
            LegSide::B => self.b = true,
        }
    }

    #[must_use]
    pub fn both(&self) -> bool {
        self.a && self.b
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.a || self.b
    }
}
