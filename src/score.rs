//! Position scores and their bounds
//!
//! Scores are always given from the point of view of the player to move.
//! A drawn position scores 0. A positive score `n` means the player to move
//! wins with their `n`th to last tile, so earlier wins score higher. A
//! negative score `-n` means the opponent wins with their `n`th to last tile.

use crate::CELLS;

/// The score of a drawn position
pub const DRAW: i32 = 0;

/// The minimum possible score of a position
pub const MIN_SCORE: i32 = -(CELLS as i32) / 2 + 3;
/// The maximum possible score of a postion
pub const MAX_SCORE: i32 = (CELLS as i32 + 1) / 2 - 3;

/// A value outside of the score range, used to mark absent entries
pub const INVALID: i32 = MIN_SCORE - 1;

// the first player can only win on an odd number of tiles, the second on an even one
const FIRST_PLAYER_EARLIEST_WIN: usize = 7;
const SECOND_PLAYER_EARLIEST_WIN: usize = 8;

/// The score of the player that places the winning tile as the `tiles`th tile on the board
pub const fn win(tiles: usize) -> i32 {
    ((CELLS - tiles) / 2) as i32 + 1
}

/// The score of the player that loses to the `tiles`th tile placed on the board
pub const fn loss(tiles: usize) -> i32 {
    -win(tiles)
}

const fn earliest_win(first_player: bool) -> usize {
    if first_player {
        FIRST_PLAYER_EARLIEST_WIN
    } else {
        SECOND_PLAYER_EARLIEST_WIN
    }
}

// the best score if the player to move wins `delay` tiles from now at the earliest
const fn best_score(moves: usize, delay: usize) -> i32 {
    let first_player = moves % 2 == 0;
    let mut tiles = moves + delay;
    if tiles < earliest_win(first_player) {
        tiles = earliest_win(first_player);
    }
    if tiles > CELLS {
        return DRAW;
    }
    win(tiles)
}

const fn worst_score(moves: usize) -> i32 {
    let first_player = moves % 2 == 0;
    let mut tiles = moves + 2;
    if tiles < earliest_win(!first_player) {
        tiles = earliest_win(!first_player);
    }
    if tiles > CELLS {
        return DRAW;
    }
    loss(tiles)
}

const fn table(kind: u8) -> [i32; CELLS + 1] {
    let mut table = [0; CELLS + 1];
    let mut moves = 0;
    while moves <= CELLS {
        table[moves] = match kind {
            0 => worst_score(moves),
            1 => best_score(moves, 1),
            _ => best_score(moves, 3),
        };
        moves += 1;
    }
    table
}

const MINIMAL: [i32; CELLS + 1] = table(0);
const MAXIMAL: [i32; CELLS + 1] = table(1);
const MAXIMAL_WITHOUT_IMMEDIATE_WIN: [i32; CELLS + 1] = table(2);

/// The lowest score reachable after `moves` tiles have been played
pub fn minimal(moves: usize) -> i32 {
    MINIMAL[moves]
}

/// The highest score reachable after `moves` tiles have been played
pub fn maximal(moves: usize) -> i32 {
    MAXIMAL[moves]
}

/// The highest score reachable after `moves` tiles if the player to move
/// can not win with their next tile
pub fn maximal_without_immediate_win(moves: usize) -> i32 {
    MAXIMAL_WITHOUT_IMMEDIATE_WIN[moves]
}
