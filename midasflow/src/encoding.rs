//! Flow direction encodings.
//!
//! A grid dataset stores one direction value per cell. The value names the
//! neighbor the cell drains into; 0 marks a pit (sink). Several encodings are
//! in common use, and a custom one can be given as eight integers in the
//! order `E,SE,S,SW,W,NW,N,NE`.
//!
//! | Name | E | SE | S | SW | W | NW | N | NE |
//! |---|---|---|---|---|---|---|---|---|
//! | `power2` | 1 | 2 | 4 | 8 | 16 | 32 | 64 | 128 |
//! | `taudem` | 1 | 8 | 7 | 6 | 5 | 4 | 3 | 2 |
//! | `45degccw` | 8 | 7 | 6 | 5 | 4 | 3 | 2 | 1 |
//! | `degccw` | 360 | 315 | 270 | 225 | 180 | 135 | 90 | 45 |

use std::fmt;
use std::str::FromStr;

use crate::error::MidasError;

/// One of the eight D8 neighbor directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    E,
    SE,
    S,
    SW,
    W,
    NW,
    N,
    NE,
}

impl Direction {
    /// All directions in the fixed neighbor order used for upstream lists.
    pub const ALL: [Direction; 8] = [
        Direction::E,
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::W,
        Direction::NW,
        Direction::N,
        Direction::NE,
    ];

    /// Position of this direction in [`Direction::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// `(row, col)` offset to the neighbor.
    #[inline]
    pub fn offset(self) -> (i64, i64) {
        match self {
            Direction::E => (0, 1),
            Direction::SE => (1, 1),
            Direction::S => (1, 0),
            Direction::SW => (1, -1),
            Direction::W => (0, -1),
            Direction::NW => (-1, -1),
            Direction::N => (-1, 0),
            Direction::NE => (-1, 1),
        }
    }

    #[inline]
    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Direction::SE | Direction::SW | Direction::NW | Direction::NE
        )
    }

    #[inline]
    pub fn opposite(self) -> Direction {
        Direction::ALL[(self.index() + 4) % 8]
    }
}

/// Result of decoding a stored direction value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Sink,
    Direction(Direction),
    Invalid,
}

/// Mapping between stored direction values and [`Direction`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionEncoding {
    codes: [i64; 8],
}

impl DirectionEncoding {
    pub const POWER2: DirectionEncoding = DirectionEncoding {
        codes: [1, 2, 4, 8, 16, 32, 64, 128],
    };
    pub const TAUDEM: DirectionEncoding = DirectionEncoding {
        codes: [1, 8, 7, 6, 5, 4, 3, 2],
    };
    pub const DEG45_CCW: DirectionEncoding = DirectionEncoding {
        codes: [8, 7, 6, 5, 4, 3, 2, 1],
    };
    pub const DEG_CCW: DirectionEncoding = DirectionEncoding {
        codes: [360, 315, 270, 225, 180, 135, 90, 45],
    };

    /// Builds a custom encoding from codes in `E,SE,S,SW,W,NW,N,NE` order.
    pub fn custom(codes: [i64; 8]) -> Result<Self, String> {
        for (i, code) in codes.iter().enumerate() {
            if *code == 0 {
                return Err("direction codes must be non-zero".to_string());
            }
            if codes[..i].contains(code) {
                return Err(format!("direction code {} appears twice", code));
            }
        }
        Ok(Self { codes })
    }

    /// Stored value for a direction.
    #[inline]
    pub fn encode(&self, dir: Direction) -> i64 {
        self.codes[dir.index()]
    }

    #[inline]
    pub fn decode(&self, value: i64) -> Decoded {
        if value == 0 {
            return Decoded::Sink;
        }
        match self.codes.iter().position(|c| *c == value) {
            Some(i) => Decoded::Direction(Direction::ALL[i]),
            None => Decoded::Invalid,
        }
    }

    pub fn codes(&self) -> [i64; 8] {
        self.codes
    }
}

impl Default for DirectionEncoding {
    fn default() -> Self {
        Self::POWER2
    }
}

impl FromStr for DirectionEncoding {
    type Err = MidasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        match name.to_ascii_lowercase().as_str() {
            "power2" | "" => return Ok(Self::POWER2),
            "taudem" => return Ok(Self::TAUDEM),
            "45degccw" => return Ok(Self::DEG45_CCW),
            "degccw" => return Ok(Self::DEG_CCW),
            _ => {}
        }

        let invalid = |reason: String| MidasError::InvalidOption {
            name: "encoding".to_string(),
            value: name.to_string(),
            reason,
        };

        let parsed = name
            .split(',')
            .map(|part| part.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("unknown encoding name".to_string()))?;
        let codes: [i64; 8] = parsed
            .try_into()
            .map_err(|v: Vec<i64>| invalid(format!("expected 8 codes, got {}", v.len())))?;
        Self::custom(codes).map_err(invalid)
    }
}

impl fmt::Display for DirectionEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = [
            (Self::POWER2, "power2"),
            (Self::TAUDEM, "taudem"),
            (Self::DEG45_CCW, "45degccw"),
            (Self::DEG_CCW, "degccw"),
        ];
        if let Some((_, name)) = named.iter().find(|(enc, _)| enc == self) {
            return f.write_str(name);
        }
        let parts: Vec<String> = self.codes.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}
