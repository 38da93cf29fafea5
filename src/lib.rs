//! An exact solver for the board game 'Connect 4'
//!
//! The solver computes the game-theoretic value of any position under
//! perfect play using a null-window negamax search backed by a score cache,
//! an optional precomputed opening book and a handful of endgame parity
//! heuristics.
//!
//! # Basic Usage
//!
//! ```
//! use connect4_solver::{position::Position, solver::Solver, transposition_table::TranspositionTable};
//!
//!# use std::error::Error;
//!# fn main() -> Result<(), Box<dyn Error>> {
//! let position = Position::from_moves("1122334")?;
//! assert!(position.is_over());
//!
//! let mut solver = Solver::new_with_transposition_table(
//!     Position::from_moves("112233")?,
//!     TranspositionTable::with_capacity_bits(16),
//! );
//! assert_eq!(solver.evaluate(), 18);
//!# Ok(())
//!# }
//! ```

use static_assertions::*;
pub use anyhow;

pub mod bitboard;

pub mod config;

pub mod error;

pub mod position;

pub mod score;

pub mod transposition_table;

pub mod opening_database;

pub mod solver;


pub use config::SolverConfig;
pub use error::PlayError;
pub use opening_database::OpeningDatabase;
pub use position::{Outcome, Player, Position};
pub use solver::Solver;
pub use transposition_table::{ReplacementPolicy, TranspositionTable};

/// The width of the game board in tiles
pub const WIDTH: usize = 7;

/// The height of the game board in tiles
pub const HEIGHT: usize = 6;

/// The number of tiles on the game board
pub const CELLS: usize = WIDTH * HEIGHT;

// ensure that the given dimensions fit in a u64 for the bitboard representation
const_assert!(WIDTH * (HEIGHT + 1) < 64);
