use thiserror::Error;

use crate::WIDTH;

/// Reasons a move or undo request is rejected by the checked entry points
/// of a [`Position`](crate::position::Position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlayError {
    #[error("column {0} out of range, columns must be between 1 and {max}", max = WIDTH)]
    ColumnOutOfRange(usize),
    #[error("invalid move, column {0} full")]
    ColumnFull(usize),
    #[error("invalid move, the game is over")]
    GameOver,
    #[error("no moves to undo")]
    NothingToUndo,
    #[error("could not parse '{0}' as a valid move")]
    InvalidCharacter(char),
}
