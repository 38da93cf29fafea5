//! An agent to solve the game of Connect 4

use log::{debug, trace};

use std::cmp::Ordering;

use crate::{
    bitboard::*, config::SolverConfig, opening_database::OpeningDatabase, position::*, score::*,
    transposition_table::*, CELLS, HEIGHT, WIDTH,
};

// positions with more tiles also look up their children in the transposition table
const CHILD_LOOKAHEAD_MIN_MOVES: usize = 13;

// score windows at least this wide are probed closer to zero first
const WIDE_WINDOW: i32 = 11;

const OPPORTUNITY_WEIGHT: i32 = 218;
const IMMEDIATE_THREAT_WEIGHT: i32 = 465;
const SOON_THREAT_WEIGHT: i32 = 602;
const COLUMN_FORK_WEIGHT: i32 = 233;

/// Static value of placing a tile on each cell, indexed by [column][row]
const RED_CELL_SCORES: [[i32; HEIGHT]; WIDTH] = mirrored_cell_scores([
    [15, 44, 23, 175, 68, 479],
    [93, 125, 97, 179, 209, 309],
    [123, 204, 501, 389, 197, 421],
    [337, 385, 351, 289, 428, 450],
]);

const YELLOW_CELL_SCORES: [[i32; HEIGHT]; WIDTH] = mirrored_cell_scores([
    [66, 149, 10, 196, 141, 463],
    [33, 176, 242, 268, 31, 469],
    [132, 285, 257, 419, 219, 375],
    [177, 414, 599, 583, 516, 513],
]);

// completes a table of cell scores from its left half and center column
const fn mirrored_cell_scores(half: [[i32; HEIGHT]; WIDTH / 2 + 1]) -> [[i32; HEIGHT]; WIDTH] {
    let mut table = [[0; HEIGHT]; WIDTH];
    let mut column = 0;
    while column < WIDTH {
        table[column] = if column <= WIDTH / 2 {
            half[column]
        } else {
            half[WIDTH - 1 - column]
        };
        column += 1;
    }
    table
}

struct MoveSorter {
    size: usize,
    // move bitmap, column and score
    moves: [(Bitboard, usize, i32); WIDTH],
}

impl MoveSorter {
    pub fn new() -> Self {
        Self {
            size: 0,
            moves: [(Bitboard::EMPTY, 0, 0); WIDTH],
        }
    }

    pub fn push(&mut self, new_move: Bitboard, column: usize, score: i32) {
        let mut pos = self.size;
        self.size += 1;
        while pos != 0 && self.moves[pos - 1].2 > score {
            self.moves[pos] = self.moves[pos - 1];
            pos -= 1;
        }
        self.moves[pos] = (new_move, column, score);
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Iterator for MoveSorter {
    type Item = (Bitboard, usize);

    fn next(&mut self) -> Option<Self::Item> {
        match self.size {
            0 => None,
            _ => {
                self.size -= 1;
                Some((self.moves[self.size].0, self.moves[self.size].1))
            }
        }
    }
}

/// Returns a slice ordering the columns from the middle outwards, as
/// the middle columns are often better moves
pub const fn move_order() -> [usize; WIDTH] {
    let mut move_order = [0; WIDTH];
    let mut i = 0;
    while i < WIDTH {
        move_order[i] = (WIDTH / 2) + (1 - i % 2) * (i / 2) - (i % 2) * (i / 2 + 1);
        i += 1;
    }
    move_order
}

/// An agent to solve Connect 4 positions
///
/// # Notes
/// This agent uses a null-window negamax search with various optimisations to
/// find the exact game-theoretic value of any position, thus 'solving' the game
///
/// # Position Scoring
/// Scores are given from the point of view of the player to move. If that player
/// wins with their final tile (the 42nd tile on a 7x6 board) the score is 1, or -1
/// if their opponent does. Earlier wins have scores further from 0, up to 18/-18,
/// where a player wins with their 4th tile. A drawn position has a score of 0
#[derive(Clone)]
pub struct Solver {
    position: Position,

    /// The number of nodes searched by this `Solver` so far (for diagnostics only)
    pub node_count: usize,
    transposition_table: TranspositionTable,
    opening_database: Option<OpeningDatabase>,
}

impl Solver {
    /// Creates a new `Solver` for a position
    pub fn new(position: Position) -> Self {
        Self::new_with_transposition_table(position, TranspositionTable::new())
    }

    /// Creates a new `Solver` for a position with a given transposition table
    pub fn new_with_transposition_table(
        position: Position,
        transposition_table: TranspositionTable,
    ) -> Self {
        Self {
            position,
            node_count: 0,
            transposition_table,
            opening_database: None,
        }
    }

    /// Creates a new `Solver` with the table and opening database described by `config`
    pub fn with_config(position: Position, config: &SolverConfig) -> Self {
        let table = config.transposition_table();
        debug!(
            "transposition table with {} entries, {:?}",
            table.capacity(),
            table.policy()
        );
        let solver = Self::new_with_transposition_table(position, table);
        match config.opening_database() {
            Some(database) => solver.with_opening_database(database),
            None => solver,
        }
    }

    /// Adds an opening database to an existing `Solver`
    pub fn with_opening_database(mut self, opening_database: OpeningDatabase) -> Self {
        self.opening_database = Some(opening_database);
        self
    }

    /// Replaces the position, keeping the transposition table
    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn transposition_table(&self) -> &TranspositionTable {
        &self.transposition_table
    }

    pub fn into_transposition_table(self) -> TranspositionTable {
        self.transposition_table
    }

    /// The exact score of the position (see [Position Scoring])
    ///
    /// [Position Scoring]: #position-scoring
    pub fn evaluate(&mut self) -> i32 {
        self.evaluate_with_bound(i32::MAX)
    }

    /// The exact score of the position if it is below `max_score`
    ///
    /// Once the score is proven to be at least `max_score` the search stops
    /// and a lower bound of the score, itself at least `max_score`, is returned.
    pub fn evaluate_with_bound(&mut self, max_score: i32) -> i32 {
        let moves = self.position.num_moves();

        match self.position.outcome() {
            Outcome::Draw => return DRAW,
            // the player that moved last won
            Outcome::RedWin | Outcome::YellowWin => return loss(moves),
            Outcome::Undecided => {}
        }

        if self.position.immediate_win() {
            return win(moves + 1);
        }

        if let Some(score) = self.book_score() {
            return score;
        }

        let mut min = minimal(moves);
        let mut max = maximal(moves).min(max_score);

        // no move of the parent position scores better than the parent itself
        if let Some(last_move) = self.position.last_move() {
            self.position.undo();
            let parent_score = self.book_score();
            self.position.play(last_move);

            if let Some(score) = parent_score {
                min = min.max(-score);
            }
        }

        if let Some((cached_min, cached_max)) = self
            .transposition_table
            .get(self.position.hash(), self.position.mixed_hash())
        {
            min = min.max(cached_min);
            max = max.min(cached_max);
        }

        let start_nodes = self.node_count;
        let mut probes = 0;

        // iteratively narrow the search window
        while min < max {
            let mut mid = (min + max) >> 1;
            // probe closer to zero first, short wins and losses are cheap to find
            if max - min > WIDE_WINDOW {
                if mid >= 0 && mid < max >> 1 {
                    mid = max >> 1;
                } else if mid <= 0 && mid > min >> 1 {
                    mid = min >> 1;
                }
            }

            // use a null-window to determine if the actual score is greater or less that mid
            let result = self.negamax(mid, mid + 1);
            probes += 1;
            trace!("probe [{}, {}] -> {}", mid, mid + 1, result);

            // result is not necessarily the exact true score, but its value indicates
            // whether the true score is above or below the search target
            if result <= mid {
                max = result;
            } else {
                min = result;
            }
        }

        debug!(
            "evaluated {:?}: {} ({} nodes, {} probes)",
            self.position,
            min,
            self.node_count - start_nodes,
            probes
        );
        min
    }

    /// The exact score of playing `column`, from the point of view of the player
    /// to move. The move must be legal
    pub fn evaluate_move(&mut self, column: usize) -> i32 {
        self.position.play(column);
        let score = -self.evaluate();
        self.position.undo();
        score
    }

    /// The exact score of playing `column` if it is above `min_score`, otherwise
    /// an upper bound of the score that is at most `min_score`
    pub fn evaluate_move_with_bound(&mut self, column: usize, min_score: i32) -> i32 {
        self.position.play(column);
        let score = -self.evaluate_with_bound(min_score.saturating_neg());
        self.position.undo();
        score
    }

    /// Exact scores of every legal move, `None` for illegal ones
    pub fn move_scores(&mut self) -> [Option<i32>; WIDTH] {
        let mut scores = [None; WIDTH];
        for &column in move_order().iter() {
            if self.position.legal(column) {
                scores[column] = Some(self.evaluate_move(column));
            }
        }
        scores
    }

    /// Calculates the score and a best move of the current position
    ///
    /// Among equally good moves the one closest to the center is chosen. There
    /// is no move if the game is over.
    pub fn solve(&mut self) -> (i32, Option<usize>) {
        let score = self.evaluate();
        // every other move is proven worse with a bounded search
        let best_move = move_order().iter().copied().find(|&column| {
            self.position.legal(column) && self.evaluate_move_with_bound(column, score - 1) >= score
        });
        (score, best_move)
    }

    /// Converts a position score to a win distance in a single player's moves
    ///
    /// For a drawn score this is the number of tiles left to fill the board.
    /// Scores outside the range reachable from the position are clamped to it.
    pub fn score_to_win_distance(&self, score: i32) -> usize {
        let moves = self.position.num_moves();
        let score = score.max(minimal(moves)).min(maximal(moves));
        match score.cmp(&0) {
            Ordering::Equal => CELLS - moves,
            Ordering::Greater => (winning_tile(score, moves + 1) - moves + 1) / 2,
            Ordering::Less => (winning_tile(-score, moves + 2) - moves) / 2,
        }
    }

    /// Null-window search of a position where the player to move can not win
    /// with their next tile
    ///
    /// Returns the exact score if it lies inside (alpha, beta), a score `<= alpha`
    /// that bounds the true score from above, or a score `>= beta` that bounds it
    /// from below.
    fn negamax(&mut self, mut alpha: i32, mut beta: i32) -> i32 {
        self.node_count += 1;
        let start_nodes = self.node_count;
        let moves = self.position.num_moves();

        let min_score = minimal(moves);
        let mut max_score = maximal_without_immediate_win(moves);

        // without a horizontal or diagonal line left to complete, the player to
        // move can not win before the board is full
        if beta > 0 {
            let reachable = self.position.active_mask()
                | (Bitboard::FULL_BOARD ^ self.position.occupied_mask());
            if !reachable.has_non_vertical_connection() {
                max_score = max_score.min(DRAW);
            }
        }

        if self.position.all_heights_even() {
            max_score = max_score.min(self.claimeven_bound());
        }

        alpha = alpha.max(min_score);
        beta = beta.min(max_score);
        if alpha >= beta {
            return alpha;
        }

        if let Some(score) = self.book_score() {
            return score;
        }

        let hash = self.position.hash();
        let mixed_hash = self.position.mixed_hash();

        // try to fetch the upper/lower bound of the score from the transposition table
        if let Some((cached_min, cached_max)) = self.transposition_table.get(hash, mixed_hash) {
            alpha = alpha.max(cached_min);
            beta = beta.min(cached_max);
            if alpha >= beta {
                return alpha;
            }
        }

        if moves > CHILD_LOOKAHEAD_MIN_MOVES {
            let mut best_child = i32::MIN;
            for tile in self.position.possible_moves().cells() {
                let (child_hash, child_mixed_hash) = self.position.child_key(tile);
                match self.transposition_table.get(child_hash, child_mixed_hash) {
                    // child bounds are from the opponent's point of view
                    Some((child_min, child_max)) => {
                        alpha = alpha.max(-child_max);
                        if alpha >= beta {
                            return alpha;
                        }
                        best_child = best_child.max(-child_min);
                    }
                    None => best_child = i32::MAX,
                }
            }
            beta = beta.min(best_child);
            if alpha >= beta {
                return alpha;
            }
        }

        let opponent_wins = self.position.opponent_win_mask();
        let threats = opponent_wins & self.position.ceiling_mask();

        if !threats.is_empty() {
            // two threats can not both be blocked, and blocking below a threat loses too
            if threats.has_many() || opponent_wins.intersects(threats << 1) {
                return min_score;
            }

            self.position.play(Bitboard::column_of(threats.first_index()));
            let score = -self.negamax(-beta, -alpha);
            self.position.undo();

            let effort = self.effort_since(start_nodes);
            if score >= beta {
                self.transposition_table
                    .update(hash, mixed_hash, score, max_score, effort);
                return score;
            }
            alpha = alpha.max(score);
            self.transposition_table
                .update(hash, mixed_hash, min_score, alpha, effort);
            return alpha;
        }

        let mut candidates = self.position.possible_moves();
        // mirrored moves lead to mirrored positions with the same score
        if self.position.is_symmetrical() {
            candidates &= Bitboard::SYMMETRY_PRUNE;
        }

        let mut moves = MoveSorter::new();
        // reversing move order to put edges first reduces the amount of sorting
        // as these moves are worse on average
        for &column in move_order().iter().rev() {
            let candidate = candidates & Bitboard::column(column);
            // skip moves that let the opponent win on top of them
            if candidate.is_empty() || opponent_wins.intersects(candidate << 1) {
                continue;
            }
            moves.push(candidate, column, self.move_score(candidate, opponent_wins));
        }

        if moves.is_empty() {
            // every move loses on the next tile
            let effort = self.effort_since(start_nodes);
            self.transposition_table
                .update(hash, mixed_hash, min_score, min_score, effort);
            return alpha;
        }

        // search the next level of the tree
        for (_, column) in moves {
            self.position.play(column);
            // the search window is flipped for the other player
            let score = -self.negamax(-beta, -alpha);
            self.position.undo();

            // if a child node's score is better than beta, we can prune the tree
            // here because a perfect opponent will not pick this branch
            if score >= beta {
                let effort = self.effort_since(start_nodes);
                self.transposition_table
                    .update(hash, mixed_hash, score, max_score, effort);
                return score;
            }
            alpha = alpha.max(score);
        }

        let effort = self.effort_since(start_nodes);
        self.transposition_table
            .update(hash, mixed_hash, min_score, alpha, effort);
        alpha
    }

    /// Upper bound of the score when the second player answers every move by
    /// playing on top of it
    ///
    /// Only valid when every column holds an even number of tiles, the second
    /// player then ends up with every tile on rows 1, 3 and 5 still empty.
    fn claimeven_bound(&self) -> i32 {
        let mask = self.position.occupied_mask();
        let red = self.position.active_mask() | (Bitboard::EVEN_ROWS & !mask);
        let yellow = Bitboard::FULL_BOARD ^ red;
        let current_yellow = self.position.opponent_mask();

        // a red line survives if yellow can't connect while the cells below it fill up
        let red_can_win = Direction::NON_VERTICAL.iter().any(|&direction| {
            red.win_anchors(direction).cells().any(|anchor| {
                let below = Bitboard::line_from_anchor(anchor, direction).cells_below();
                !(current_yellow | (!mask & yellow & below)).has_connection()
            })
        });
        if red_can_win {
            return MAX_SCORE;
        }

        if !yellow.has_non_vertical_connection() {
            return DRAW;
        }
        // yellow wins at the latest with the top of the highest winning row
        let winning = yellow.non_vertical_win_cells();
        (1..HEIGHT)
            .rev()
            .step_by(2)
            .find(|&row| winning.intersects(Bitboard::row(row)))
            .map_or(DRAW, |row| loss(CELLS - (HEIGHT - 1) + row))
    }

    /// Heuristic value of playing `tile`, higher scores are searched first
    fn move_score(&self, tile: Bitboard, opponent_wins: Bitboard) -> i32 {
        let active = self.position.active_mask() | tile;
        let mask = self.position.occupied_mask() | tile;
        let ceiling = (self.position.ceiling_mask() ^ tile) | (tile << 1);

        // new threats, except those right above a threat of the opponent
        let threats = active.connection_opportunities() & !mask & !(opponent_wins << 1);
        let responses = ceiling & Bitboard::FULL_BOARD;

        let index = tile.first_index();
        let cell_scores = match self.position.active_player() {
            Player::Red => &RED_CELL_SCORES,
            Player::Yellow => &YELLOW_CELL_SCORES,
        };

        cell_scores[Bitboard::column_of(index)][Bitboard::row_of(index)]
            + threats.count() as i32 * OPPORTUNITY_WEIGHT
            + (threats & responses).count() as i32 * IMMEDIATE_THREAT_WEIGHT
            + (threats & (responses << 1)).count() as i32 * SOON_THREAT_WEIGHT
            + (threats & (threats << 1)).count() as i32 * COLUMN_FORK_WEIGHT
    }

    fn book_score(&self) -> Option<i32> {
        self.opening_database
            .as_ref()
            .and_then(|database| database.get(&self.position))
    }

    fn effort_since(&self, start_nodes: usize) -> u32 {
        (self.node_count + 1 - start_nodes).min(u32::MAX as usize) as u32
    }
}

// the tile count at which a win worth `score` happens, the winner places `first_tile` next
fn winning_tile(score: i32, first_tile: usize) -> usize {
    let latest = CELLS + 2 - 2 * score as usize;
    if (latest - first_tile) % 2 == 0 {
        latest
    } else {
        latest - 1
    }
}

impl std::ops::Deref for Solver {
    type Target = Position;

    fn deref(&self) -> &Self::Target {
        &self.position
    }
}

impl std::ops::DerefMut for Solver {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn solver(moves: &str) -> Result<Solver> {
        Ok(Solver::new_with_transposition_table(
            Position::from_moves(moves)?,
            TranspositionTable::with_capacity_bits(16),
        ))
    }

    #[test]
    fn configured_solver() -> Result<()> {
        let config = SolverConfig::from_toml_str(
            "transposition_table_bits = 12\n\
             opening_database_path = \"/nonexistent/opening.cfc\"\n\
             replacement_policy = { kind = \"always_replace\" }\n",
        )?;
        let mut solver = Solver::with_config(Position::from_moves("112233")?, &config);
        assert_eq!(solver.transposition_table().capacity(), 1 << 12);
        assert_eq!(
            solver.transposition_table().policy(),
            ReplacementPolicy::AlwaysReplace
        );
        // a missing book only costs speed
        assert_eq!(solver.evaluate(), MAX_SCORE);
        Ok(())
    }

    #[test]
    fn column_order() {
        assert_eq!(move_order(), [3, 2, 4, 1, 5, 0, 6]);
    }

    #[test]
    fn move_sorter_pops_best_first() {
        let mut sorter = MoveSorter::new();
        assert!(sorter.is_empty());
        sorter.push(Bitboard::cell(0, 0), 0, 5);
        sorter.push(Bitboard::cell(1, 0), 1, 50);
        sorter.push(Bitboard::cell(2, 0), 2, -3);
        sorter.push(Bitboard::cell(3, 0), 3, 50);
        let columns: Vec<usize> = sorter.map(|(_, column)| column).collect();
        assert_eq!(columns, vec![3, 1, 0, 2]);
    }

    #[test]
    fn cell_scores_are_symmetric() {
        for column in 0..WIDTH {
            assert_eq!(RED_CELL_SCORES[column], RED_CELL_SCORES[WIDTH - 1 - column]);
            assert_eq!(YELLOW_CELL_SCORES[column], YELLOW_CELL_SCORES[WIDTH - 1 - column]);
        }
        assert_eq!(RED_CELL_SCORES[3][0], 337);
        assert_eq!(YELLOW_CELL_SCORES[6][5], 463);
    }

    #[test]
    fn move_scores_prefer_threats() -> Result<()> {
        let solver = solver("4455")?;
        let opponent_wins = solver.opponent_win_mask();
        // completing three in a row on the bottom row with two open ends
        let strong = solver.move_score(Bitboard::cell(2, 0), opponent_wins);
        let weak = solver.move_score(Bitboard::cell(0, 0), opponent_wins);
        assert!(strong > weak);
        Ok(())
    }

    #[test]
    fn finished_games() -> Result<()> {
        let mut won = solver("1122334")?;
        assert_eq!(won.evaluate(), loss(7));
        assert_eq!(won.solve(), (loss(7), None));

        let mut drawn = solver("133113311331244224422442577557755775666666")?;
        assert_eq!(drawn.evaluate(), DRAW);
        Ok(())
    }

    #[test]
    fn immediate_wins() -> Result<()> {
        let mut solver = solver("112233")?;
        assert_eq!(solver.evaluate(), MAX_SCORE);
        assert_eq!(solver.evaluate_move(3), MAX_SCORE);
        assert_eq!(solver.solve(), (MAX_SCORE, Some(3)));
        assert_eq!(solver.score_to_win_distance(MAX_SCORE), 1);

        // an open three on the bottom row can't be blocked on both ends
        let mut solver = self::solver("22334")?;
        assert_eq!(solver.evaluate(), MIN_SCORE);
        assert_eq!(solver.score_to_win_distance(MIN_SCORE), 1);
        Ok(())
    }

    #[test]
    fn last_tiles() -> Result<()> {
        // one empty cell left, filling it draws
        let mut solver = solver("13311331133124422442244257755775577566666")?;
        assert_eq!(solver.num_moves(), CELLS - 1);
        assert_eq!(solver.evaluate(), DRAW);
        assert_eq!(solver.move_scores(), [None, None, None, None, None, Some(DRAW), None]);
        assert_eq!(solver.score_to_win_distance(DRAW), 1);
        Ok(())
    }

    #[test]
    fn win_distances() -> Result<()> {
        let solver = solver("")?;
        assert_eq!(solver.score_to_win_distance(1), 21);
        assert_eq!(solver.score_to_win_distance(-1), 21);
        assert_eq!(solver.score_to_win_distance(MAX_SCORE), 4);
        assert_eq!(solver.score_to_win_distance(DRAW), CELLS);

        // out of range scores count as the quickest possible result
        let solver = self::solver("26324226312427655131")?;
        assert_eq!(solver.score_to_win_distance(MAX_SCORE), 1);
        assert_eq!(solver.score_to_win_distance(MIN_SCORE), 1);
        assert_eq!(solver.score_to_win_distance(i32::MAX), 1);
        Ok(())
    }

    #[test]
    fn bounded_evaluation() -> Result<()> {
        let moves = "4444443333332222226";
        let exact = solver(moves)?.evaluate();

        let mut bounded = solver(moves)?;
        let result = bounded.evaluate_with_bound(exact - 1);
        assert!(result >= exact - 1);

        let mut bounded = solver(moves)?;
        assert_eq!(bounded.evaluate_with_bound(exact + 1), exact);
        Ok(())
    }

    #[test]
    fn claimeven_bounds() -> Result<()> {
        assert_eq!(solver("")?.claimeven_bound(), MAX_SCORE);

        // yellow holds the center of rows 0, 2 and 4, red can't complete a line
        // while yellow follows up in every column
        let solver = solver("14444441")?;
        assert!(solver.all_heights_even());
        assert_eq!(solver.claimeven_bound(), DRAW);
        Ok(())
    }
}
