use anyhow::Result;

use std::fmt;

use crate::{bitboard::*, error::PlayError, CELLS, HEIGHT, WIDTH};

const HASH_MIX_SHIFT: u32 = 33;
const HASH_MIX_MAGICS: [u64; 2] = [0xFF51_AFD7_ED55_8CCD, 0xC4CE_B9FE_1A85_EC53];

/// Avalanche mixing of a position hash, used to index the transposition table
pub const fn mix_hash(mut hash: u64) -> u64 {
    hash ^= hash >> HASH_MIX_SHIFT;
    hash = hash.wrapping_mul(HASH_MIX_MAGICS[0]);
    hash ^= hash >> HASH_MIX_SHIFT;
    hash = hash.wrapping_mul(HASH_MIX_MAGICS[1]);
    hash ^= hash >> HASH_MIX_SHIFT;
    hash
}

/// The two players, red moves first
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Player {
    Red,
    Yellow,
}

impl Player {
    pub fn opponent(self) -> Self {
        match self {
            Player::Red => Player::Yellow,
            Player::Yellow => Player::Red,
        }
    }

    /// The character used for the tiles of this player in board strings
    pub fn symbol(self) -> char {
        match self {
            Player::Red => 'X',
            Player::Yellow => 'O',
        }
    }

    // the player to move after `moves` tiles were placed
    fn to_move(moves: usize) -> Self {
        if moves % 2 == 0 {
            Player::Red
        } else {
            Player::Yellow
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Undecided,
    RedWin,
    YellowWin,
    Draw,
}

impl Outcome {
    pub fn win_for(player: Player) -> Self {
        match player {
            Player::Red => Outcome::RedWin,
            Player::Yellow => Outcome::YellowWin,
        }
    }

    pub fn winner(self) -> Option<Player> {
        match self {
            Outcome::RedWin => Some(Player::Red),
            Outcome::YellowWin => Some(Player::Yellow),
            _ => None,
        }
    }

    pub fn is_decided(self) -> bool {
        self != Outcome::Undecided
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Undecided => "undecided",
            Outcome::RedWin => "red wins",
            Outcome::YellowWin => "yellow wins",
            Outcome::Draw => "draw",
        };
        f.write_str(text)
    }
}

/// A straight run of tiles, as returned by [`Position::winning_lines`]
///
/// Cells are given as (column, row), zero indexed from the bottom left.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub start: (usize, usize),
    pub end: (usize, usize),
    /// step from one tile of the line to the next, going from start to end
    pub direction: (i32, i32),
    pub length: usize,
}

// everything `undo` needs to restore that can't be derived from the move itself
#[derive(Copy, Clone, Default)]
struct Snapshot {
    symmetrical: bool,
    active: Bitboard,
    mask: Bitboard,
    ceiling: Bitboard,
    hash: u64,
    mixed_hash: u64,
}

/// A Connect 4 position with O(1) play and undo
#[derive(Clone)]
pub struct Position {
    heights: [usize; WIDTH],
    num_moves: usize,
    // number of columns holding an even number of tiles
    even_height_columns: usize,
    symmetrical: bool,
    outcome: Outcome,
    // mask of the current player's tiles
    active: Bitboard,
    // mask of all tiles
    mask: Bitboard,
    // mask of the next playable tile of every column
    ceiling: Bitboard,
    hash: u64,
    mixed_hash: u64,
    played: [usize; CELLS],
    history: [Snapshot; CELLS],
}

impl Position {
    pub fn new() -> Self {
        let hash = Bitboard::BOTTOM.bits();
        Self {
            heights: [0; WIDTH],
            num_moves: 0,
            even_height_columns: WIDTH,
            symmetrical: true,
            outcome: Outcome::Undecided,
            active: Bitboard::EMPTY,
            mask: Bitboard::EMPTY,
            ceiling: Bitboard::BOTTOM,
            hash,
            mixed_hash: mix_hash(hash),
            played: [0; CELLS],
            history: [Snapshot::default(); CELLS],
        }
    }

    /// Parses a string of one-indexed column digits, e.g. "4453"
    pub fn from_moves<S: AsRef<str>>(moves: S) -> Result<Self> {
        let mut position = Self::new();

        for column_char in moves.as_ref().trim().chars() {
            match column_char.to_digit(10).map(|c| c as usize) {
                Some(column @ 1..=WIDTH) => {
                    position.try_play(column - 1)?;
                }
                _ => return Err(PlayError::InvalidCharacter(column_char).into()),
            }
        }
        Ok(position)
    }

    /// Is `column` (zero indexed) a legal move?
    pub fn legal(&self, column: usize) -> bool {
        !self.outcome.is_decided() && column < WIDTH && self.heights[column] < HEIGHT
    }

    /// Plays a tile in `column`, the move must be legal
    pub fn play(&mut self, column: usize) {
        debug_assert!(self.legal(column), "illegal move in column {}", column);

        self.history[self.num_moves] = Snapshot {
            symmetrical: self.symmetrical,
            active: self.active,
            mask: self.mask,
            ceiling: self.ceiling,
            hash: self.hash,
            mixed_hash: self.mixed_hash,
        };

        let row = self.heights[column];
        self.heights[column] += 1;
        if row % 2 == 0 {
            self.even_height_columns -= 1;
        } else {
            self.even_height_columns += 1;
        }

        let mover = Player::to_move(self.num_moves);
        self.played[self.num_moves] = column;
        self.num_moves += 1;

        let tile = Bitboard::cell(column, row);
        // switch the current player
        self.active ^= self.mask;
        self.mask |= tile;
        self.ceiling ^= tile;
        self.ceiling |= tile << 1;

        if self.opponent_mask().has_connection() {
            self.outcome = Outcome::win_for(mover);
            return;
        }
        if self.num_moves == CELLS {
            self.outcome = Outcome::Draw;
        }

        let encoding = self.encoding();
        let mirrored = encoding.mirrored();
        self.hash = encoding.bits().min(mirrored.bits());
        self.mixed_hash = mix_hash(self.hash);
        self.symmetrical = encoding == mirrored;
    }

    /// Takes back the last move, at least one move must have been played
    pub fn undo(&mut self) {
        debug_assert!(self.num_moves > 0, "no moves to undo");

        self.outcome = Outcome::Undecided;
        self.num_moves -= 1;

        let column = self.played[self.num_moves];
        self.heights[column] -= 1;
        if self.heights[column] % 2 == 0 {
            self.even_height_columns += 1;
        } else {
            self.even_height_columns -= 1;
        }

        let snapshot = self.history[self.num_moves];
        self.symmetrical = snapshot.symmetrical;
        self.active = snapshot.active;
        self.mask = snapshot.mask;
        self.ceiling = snapshot.ceiling;
        self.hash = snapshot.hash;
        self.mixed_hash = snapshot.mixed_hash;
    }

    /// Checked version of [`play`](Self::play), returns the outcome after the move
    pub fn try_play(&mut self, column: usize) -> Result<Outcome, PlayError> {
        if column >= WIDTH {
            return Err(PlayError::ColumnOutOfRange(column + 1));
        }
        if self.outcome.is_decided() {
            return Err(PlayError::GameOver);
        }
        if self.heights[column] >= HEIGHT {
            return Err(PlayError::ColumnFull(column + 1));
        }
        self.play(column);
        Ok(self.outcome)
    }

    /// Checked version of [`undo`](Self::undo)
    pub fn try_undo(&mut self) -> Result<(), PlayError> {
        if self.num_moves == 0 {
            return Err(PlayError::NothingToUndo);
        }
        self.undo();
        Ok(())
    }

    /// The position reached by playing the mirrored move sequence
    pub fn mirrored(&self) -> Self {
        let mut mirrored = Self::new();
        for &column in self.played_moves() {
            mirrored.play(WIDTH - 1 - column);
        }
        mirrored
    }

    pub fn num_moves(&self) -> usize {
        self.num_moves
    }

    pub fn height(&self, column: usize) -> usize {
        self.heights[column]
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_decided()
    }

    pub fn active_player(&self) -> Player {
        Player::to_move(self.num_moves)
    }

    /// The zero-indexed columns of all moves played so far
    pub fn played_moves(&self) -> &[usize] {
        &self.played[..self.num_moves]
    }

    pub fn last_move(&self) -> Option<usize> {
        self.played_moves().last().copied()
    }

    /// The moves played so far as one-indexed column digits
    pub fn moves_string(&self) -> String {
        self.played_moves()
            .iter()
            .map(|column| std::char::from_digit(*column as u32 + 1, 10).unwrap_or('?'))
            .collect()
    }

    /// The owner of a tile, if there is one
    pub fn cell(&self, column: usize, row: usize) -> Option<Player> {
        if row >= self.heights[column] {
            return None;
        }
        let player = self.active_player();
        if self.active.intersects(Bitboard::cell(column, row)) {
            Some(player)
        } else {
            Some(player.opponent())
        }
    }

    pub fn is_symmetrical(&self) -> bool {
        self.symmetrical
    }

    /// true if every column holds an even number of tiles
    pub fn all_heights_even(&self) -> bool {
        self.even_height_columns == WIDTH
    }

    /// Canonical hash: the smaller of the position's encoding and its mirror image
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn mixed_hash(&self) -> u64 {
        self.mixed_hash
    }

    /// The tiles of the player to move
    pub fn active_mask(&self) -> Bitboard {
        self.active
    }

    /// The tiles of the player that moved last
    pub fn opponent_mask(&self) -> Bitboard {
        self.active ^ self.mask
    }

    pub fn occupied_mask(&self) -> Bitboard {
        self.mask
    }

    /// The next playable tile of every column (padding bits for full columns)
    pub fn ceiling_mask(&self) -> Bitboard {
        self.ceiling
    }

    /// Tiles the player to move can play into
    pub fn possible_moves(&self) -> Bitboard {
        self.ceiling & Bitboard::FULL_BOARD
    }

    /// Can the player to move win with their next tile?
    pub fn immediate_win(&self) -> bool {
        self.active
            .connection_opportunities()
            .intersects(self.ceiling)
    }

    /// Empty tiles that would complete a four-in-a-row for the player that moved last
    pub fn opponent_win_mask(&self) -> Bitboard {
        self.opponent_mask().connection_opportunities() & !self.mask
    }

    // tiles of the player to move plus the ceiling, unique for every position
    fn encoding(&self) -> Bitboard {
        self.active | self.ceiling
    }

    /// Hash and mixed hash of the position reached by playing `tile`
    ///
    /// `tile` must be one of the possible moves and must not win the game.
    pub fn child_key(&self, tile: Bitboard) -> (u64, u64) {
        // the ceiling tile carries into the tile above it
        let encoding = Bitboard((self.opponent_mask() | self.ceiling).bits() + tile.bits());
        let hash = encoding.bits().min(encoding.mirrored().bits());
        (hash, mix_hash(hash))
    }

    /// Base 3 column encoding used to key the opening database
    ///
    /// Every tile of a column contributes a digit (1 for the player to move,
    /// 2 for their opponent) and every column ends with a 0 digit. The smaller
    /// of the left-to-right and right-to-left encodings is used. Only meaningful
    /// for positions with few enough tiles to fit the encoding in 64 bits.
    pub fn column_code(&self) -> u64 {
        let forward = (0..WIDTH).fold(0, |code, column| self.partial_column_code(code, column));
        let mirrored = (0..WIDTH)
            .rev()
            .fold(0, |code, column| self.partial_column_code(code, column));
        // drop the separator digit of the last column
        forward.min(mirrored) / 3
    }

    fn partial_column_code(&self, mut code: u64, column: usize) -> u64 {
        for row in 0..self.heights[column] {
            let digit = if self.active.intersects(Bitboard::cell(column, row)) {
                1
            } else {
                2
            };
            code = code.wrapping_mul(3).wrapping_add(digit);
        }
        code.wrapping_mul(3)
    }

    /// The connections of the winning player, empty if the game was not won
    pub fn winning_lines(&self) -> Vec<Line> {
        if self.outcome.winner().is_none() {
            return Vec::new();
        }
        let winner = self.opponent_mask();

        Direction::ALL
            .iter()
            .filter_map(|&direction| {
                let anchors = winner.win_anchors(direction);
                if anchors.is_empty() {
                    return None;
                }
                let length = anchors.count() as usize + 3;
                let end_index = anchors.last_index();
                let end = (Bitboard::column_of(end_index), Bitboard::row_of(end_index));
                let (dx, dy) = direction.delta();
                let steps = length as i32 - 1;
                let start = (
                    (end.0 as i32 - dx * steps) as usize,
                    (end.1 as i32 - dy * steps) as usize,
                );
                Some(Line {
                    start,
                    end,
                    direction: (dx, dy),
                    length,
                })
            })
            .collect()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in (0..HEIGHT).rev() {
            for column in 0..WIDTH {
                let symbol = self.cell(column, row).map_or('.', Player::symbol);
                write!(f, "{}", symbol)?;
            }
            writeln!(f)?;
        }
        writeln!(f)?;
        writeln!(f, "moves: {}", self.moves_string())?;
        write!(f, "outcome: {}", self.outcome)
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position({:?})", self.moves_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    type State = (
        [usize; WIDTH],
        usize,
        usize,
        bool,
        Outcome,
        Bitboard,
        Bitboard,
        Bitboard,
        u64,
        u64,
    );

    fn state(position: &Position) -> State {
        (
            position.heights,
            position.num_moves,
            position.even_height_columns,
            position.symmetrical,
            position.outcome,
            position.active,
            position.mask,
            position.ceiling,
            position.hash,
            position.mixed_hash,
        )
    }

    fn random_moves(rng: &mut StdRng, position: &mut Position, count: usize) -> usize {
        let mut played = 0;
        while played < count && !position.is_over() {
            let column = rng.gen_range(0..WIDTH);
            if position.legal(column) {
                position.play(column);
                played += 1;
            }
        }
        played
    }

    #[test]
    fn empty_position() {
        let position = Position::new();
        assert_eq!(position.num_moves(), 0);
        assert_eq!(position.outcome(), Outcome::Undecided);
        assert_eq!(position.active_player(), Player::Red);
        assert!(position.is_symmetrical());
        assert!(position.all_heights_even());
        assert_eq!(position.possible_moves(), Bitboard::BOTTOM);
        assert!((0..WIDTH).all(|column| position.legal(column)));
        assert!(!position.legal(WIDTH));
    }

    #[test]
    fn play_undo_round_trip() {
        let mut rng = StdRng::seed_from_u64(0x00c0_ffee);
        for _ in 0..200 {
            let mut position = Position::new();
            let prefix = rng.gen_range(0..20);
            random_moves(&mut rng, &mut position, prefix);
            if position.is_over() {
                continue;
            }
            let before = state(&position);

            let played = random_moves(&mut rng, &mut position, CELLS);
            for _ in 0..played {
                position.undo();
            }
            assert_eq!(state(&position), before);
        }
    }

    #[test]
    fn masks_stay_consistent() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let mut position = Position::new();
            random_moves(&mut rng, &mut position, CELLS);

            let total: usize = (0..WIDTH).map(|column| position.height(column)).sum();
            assert_eq!(total, position.num_moves());
            assert_eq!(position.occupied_mask().count() as usize, position.num_moves());

            // rebuild the masks tile by tile from the move list
            let replayed = Position::from_moves(position.moves_string())?;
            assert_eq!(replayed.active_mask(), position.active_mask());
            assert_eq!(replayed.outcome(), position.outcome());
            for column in 0..WIDTH {
                for row in 0..HEIGHT {
                    assert_eq!(replayed.cell(column, row), position.cell(column, row));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn horizontal_win() -> Result<()> {
        let mut position = Position::from_moves("112233")?;
        assert_eq!(position.outcome(), Outcome::Undecided);
        assert!(position.immediate_win());

        position.play(3);
        assert_eq!(position.outcome(), Outcome::RedWin);
        assert!(!position.legal(4));
        assert_eq!(
            position.winning_lines(),
            vec![Line {
                start: (0, 0),
                end: (3, 0),
                direction: (1, 0),
                length: 4
            }]
        );

        position.undo();
        assert_eq!(position.outcome(), Outcome::Undecided);
        assert!(position.winning_lines().is_empty());
        Ok(())
    }

    #[test]
    fn vertical_and_diagonal_wins() -> Result<()> {
        let vertical = Position::from_moves("1212121")?;
        assert_eq!(vertical.outcome(), Outcome::RedWin);

        assert!(Position::from_moves("12121217").is_err());

        let mut diagonal = Position::from_moves("1223433454")?;
        assert_eq!(diagonal.outcome(), Outcome::Undecided);
        diagonal.play(3);
        assert_eq!(diagonal.outcome(), Outcome::RedWin);
        assert_eq!(
            diagonal.winning_lines(),
            vec![Line {
                start: (0, 0),
                end: (3, 3),
                direction: (1, 1),
                length: 4
            }]
        );
        Ok(())
    }

    #[test]
    fn second_player_win() -> Result<()> {
        let position = Position::from_moves("71212121")?;
        assert_eq!(position.outcome(), Outcome::YellowWin);
        assert_eq!(position.active_player(), Player::Red);
        assert_eq!(position.cell(0, 3), Some(Player::Yellow));
        assert_eq!(position.cell(1, 0), Some(Player::Red));
        assert_eq!(position.cell(1, 3), None);
        Ok(())
    }

    #[test]
    fn full_board_draw() -> Result<()> {
        let moves = "133113311331244224422442577557755775666666";
        let mut position = Position::from_moves(&moves[..41])?;
        assert_eq!(position.outcome(), Outcome::Undecided);

        position.play(5);
        assert_eq!(position.outcome(), Outcome::Draw);
        assert_eq!(position.num_moves(), CELLS);
        assert!(position.winning_lines().is_empty());
        assert_eq!(position.moves_string(), moves);
        Ok(())
    }

    #[test]
    fn checked_moves() -> Result<()> {
        let mut position = Position::from_moves("111111")?;
        assert_eq!(position.try_play(0), Err(PlayError::ColumnFull(1)));
        assert_eq!(position.try_play(7), Err(PlayError::ColumnOutOfRange(8)));
        assert_eq!(position.try_play(1), Ok(Outcome::Undecided));

        let mut empty = Position::new();
        assert_eq!(empty.try_undo(), Err(PlayError::NothingToUndo));

        let mut won = Position::from_moves("1122334")?;
        assert_eq!(won.try_play(5), Err(PlayError::GameOver));
        assert!(won.try_undo().is_ok());

        assert!(Position::from_moves("1234a").is_err());
        assert!(Position::from_moves("1111111").is_err());
        assert!(Position::from_moves("08").is_err());
        Ok(())
    }

    #[test]
    fn mirrored_positions_share_a_hash() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mut position = Position::new();
            let count = rng.gen_range(0..30);
            random_moves(&mut rng, &mut position, count);
            if position.is_over() {
                continue;
            }
            let mirrored = position.mirrored();
            assert_eq!(position.hash(), mirrored.hash());
            assert_eq!(position.mixed_hash(), mirrored.mixed_hash());
            assert_eq!(position.is_symmetrical(), mirrored.is_symmetrical());
            if position.num_moves() <= 14 {
                assert_eq!(position.column_code(), mirrored.column_code());
            }
        }
    }

    #[test]
    fn symmetry_detection() -> Result<()> {
        assert!(Position::from_moves("4")?.is_symmetrical());
        assert!(Position::from_moves("444")?.is_symmetrical());
        assert!(!Position::from_moves("43")?.is_symmetrical());
        assert!(Position::from_moves("4444")?.is_symmetrical());
        assert!(!Position::from_moves("35")?.is_symmetrical());
        // red below yellow in column 3 but yellow below red in column 5
        assert!(!Position::from_moves("3553")?.is_symmetrical());
        assert!(Position::from_moves("345")?.is_symmetrical());
        Ok(())
    }

    #[test]
    fn child_key_matches_played_child() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let mut position = Position::new();
            let count = rng.gen_range(0..35);
            random_moves(&mut rng, &mut position, count);
            if position.is_over() {
                continue;
            }
            for column in 0..WIDTH {
                if !position.legal(column) {
                    continue;
                }
                let tile = position.possible_moves() & Bitboard::column(column);
                let key = position.child_key(tile);
                position.play(column);
                if !position.is_over() {
                    assert_eq!(key, (position.hash(), position.mixed_hash()));
                }
                position.undo();
            }
        }
        Ok(())
    }

    #[test]
    fn column_code() -> Result<()> {
        assert_eq!(Position::new().column_code(), 0);
        assert_eq!(Position::from_moves("1")?.column_code(), 2);
        assert_eq!(Position::from_moves("7")?.column_code(), 2);
        assert_ne!(
            Position::from_moves("12")?.column_code(),
            Position::from_moves("21")?.column_code()
        );
        Ok(())
    }

    #[test]
    fn threats() -> Result<()> {
        // red stacks three in column 2 while yellow builds along the bottom row
        let position = Position::from_moves("232425")?;
        assert!(position.immediate_win());
        assert_eq!(position.opponent_win_mask(), Bitboard::cell(5, 0));

        // red blocks instead of winning
        let position = Position::from_moves("2324256")?;
        assert!(!position.immediate_win());
        assert_eq!(position.opponent_win_mask(), Bitboard::cell(1, 3));
        Ok(())
    }

    #[test]
    fn display() -> Result<()> {
        let text = Position::from_moves("44")?.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[4], "...O...");
        assert_eq!(lines[5], "...X...");
        assert_eq!(lines[7], "moves: 44");
        assert_eq!(lines[8], "outcome: undecided");
        Ok(())
    }
}
