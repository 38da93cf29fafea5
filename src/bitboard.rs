//! Bit-mask primitives for the game board
//!
//! Every column occupies `HEIGHT + 1` consecutive bits of a `u64`, bottom
//! tile first. The extra bit on top of each column is never part of the
//! board: it keeps shifted masks from bleeding into the neighbouring column
//! and marks the "next playable tile" of a full column.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not, Shl, Shr};

use crate::{HEIGHT, WIDTH};

/// The number of bits reserved for a single column
pub const COLUMN_BITS: usize = HEIGHT + 1;

pub mod static_masks {
    use super::COLUMN_BITS;
    use crate::{HEIGHT, WIDTH};

    pub const fn bottom_mask() -> u64 {
        let mut mask = 0;
        let mut column = 0;
        while column < WIDTH {
            mask |= 1 << (column * COLUMN_BITS);
            column += 1;
        }
        mask
    }
    pub const fn full_board_mask() -> u64 {
        bottom_mask() * ((1 << HEIGHT as u64) - 1)
    }
    pub const fn column_mask(column: usize) -> u64 {
        ((1 << HEIGHT) - 1) << (column * COLUMN_BITS)
    }
    pub const fn row_mask(row: usize) -> u64 {
        bottom_mask() << row
    }
    // rows 0, 2 and 4: the tiles the first player ends up with when the
    // second player always answers on top of them
    pub const fn even_rows_mask() -> u64 {
        let mut mask = 0;
        let mut row = 0;
        while row < HEIGHT {
            mask |= row_mask(row);
            row += 2;
        }
        mask
    }
    // the left half of the board including the center column
    pub const fn symmetry_prune_mask() -> u64 {
        let mut mask = 0;
        let mut column = 0;
        while column <= WIDTH / 2 {
            mask |= column_mask(column);
            column += 1;
        }
        mask
    }
}

/// The four directions a connection can run in
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Vertical,
    Horizontal,
    /// bottom left to top right
    DiagonalUp,
    /// top left to bottom right
    DiagonalDown,
}

const DIRECTION_SHIFTS: [u32; 4] = [
    1,
    COLUMN_BITS as u32,
    COLUMN_BITS as u32 + 1,
    COLUMN_BITS as u32 - 1,
];

const DIRECTION_DELTAS: [(i32, i32); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Horizontal,
        Direction::DiagonalDown,
        Direction::DiagonalUp,
        Direction::Vertical,
    ];

    pub const NON_VERTICAL: [Direction; 3] = [
        Direction::Horizontal,
        Direction::DiagonalDown,
        Direction::DiagonalUp,
    ];

    /// The bit distance between two neighbouring tiles in this direction
    pub const fn shift(self) -> u32 {
        DIRECTION_SHIFTS[self as usize]
    }

    /// The (column, row) step between two neighbouring tiles in this direction
    pub const fn delta(self) -> (i32, i32) {
        DIRECTION_DELTAS[self as usize]
    }
}

/// A set of tiles, one bit per tile
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bitboard(pub u64);

impl Bitboard {
    pub const EMPTY: Bitboard = Bitboard(0);
    pub const BOTTOM: Bitboard = Bitboard(static_masks::bottom_mask());
    pub const FULL_BOARD: Bitboard = Bitboard(static_masks::full_board_mask());
    pub const EVEN_ROWS: Bitboard = Bitboard(static_masks::even_rows_mask());
    pub const SYMMETRY_PRUNE: Bitboard = Bitboard(static_masks::symmetry_prune_mask());

    pub const fn cell(column: usize, row: usize) -> Self {
        Self(1 << (column * COLUMN_BITS + row))
    }

    pub const fn column(column: usize) -> Self {
        Self(static_masks::column_mask(column))
    }

    pub const fn row(row: usize) -> Self {
        Self(static_masks::row_mask(row))
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// true if more than one tile is set
    pub const fn has_many(self) -> bool {
        self.0 & self.0.wrapping_sub(1) != 0
    }

    pub const fn contains(self, other: Bitboard) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Bitboard) -> bool {
        self.0 & other.0 != 0
    }

    /// Bit index of the lowest set tile
    pub const fn first_index(self) -> usize {
        self.0.trailing_zeros() as usize
    }

    /// Bit index of the highest set tile
    pub const fn last_index(self) -> usize {
        63 - self.0.leading_zeros() as usize
    }

    pub const fn column_of(index: usize) -> usize {
        index / COLUMN_BITS
    }

    pub const fn row_of(index: usize) -> usize {
        index % COLUMN_BITS
    }

    /// Iterates over the set tiles from the lowest bit to the highest
    pub fn cells(self) -> Cells {
        Cells(self.0)
    }

    /// Does the set contain four tiles in a row in any direction?
    pub fn has_connection(self) -> bool {
        Direction::ALL.iter().any(|&direction| !self.win_anchors(direction).is_empty())
    }

    /// Does the set contain four tiles in a row horizontally or diagonally?
    pub fn has_non_vertical_connection(self) -> bool {
        Direction::NON_VERTICAL
            .iter()
            .any(|&direction| !self.win_anchors(direction).is_empty())
    }

    /// Marks the last tile (the highest bit) of every four-in-a-row in one direction
    pub fn win_anchors(self, direction: Direction) -> Self {
        let shift = direction.shift();
        // mark all runs of 2
        let m = self.0 & (self.0 << shift);
        // runs of 2 * (runs of 2)
        Self(m & (m << (2 * shift)))
    }

    /// All tiles that are part of a horizontal or diagonal four-in-a-row
    pub fn non_vertical_win_cells(self) -> Self {
        let mut result = 0;
        for &direction in Direction::NON_VERTICAL.iter() {
            let shift = direction.shift();
            // find the first tiles of each four-in-a-row
            let mut m = self.0 & (self.0 >> shift);
            m &= m >> (2 * shift);
            // and spread them over the whole line
            m |= m << shift;
            m |= m << (2 * shift);
            result |= m;
        }
        Self(result)
    }

    /// Tiles of the board that would complete a four-in-a-row if added to this set
    ///
    /// Tiles already in the set can be part of the result, callers mask out the
    /// occupied tiles themselves.
    pub fn connection_opportunities(self) -> Self {
        let b = self.0;

        // vertical
        // find the top ends of 3-alignments
        let mut r = (b << 1) & (b << 2) & (b << 3);

        for &direction in Direction::NON_VERTICAL.iter() {
            let shift = direction.shift();

            let doubles = b & (b << shift);
            let triples = doubles & (doubles << shift);
            // find the upper ends of 3-alignments
            r |= triples << shift;
            // find the lower ends of 3-alignments
            r |= triples >> (3 * shift);
            // find holes of the type ...O _ O O...
            r |= (doubles >> (2 * shift)) & (b << shift);
            // find holes of the type ...O O _ O...
            r |= (doubles << shift) & (b >> shift);
        }

        Self(r & static_masks::full_board_mask())
    }

    /// The four tiles of the line ending in `anchor` (see `win_anchors`)
    pub fn line_from_anchor(anchor: Bitboard, direction: Direction) -> Self {
        let shift = direction.shift();
        let a = anchor.0;
        Self(a | (a >> shift) | (a >> (2 * shift)) | (a >> (3 * shift)))
    }

    /// For every tile in the set, all tiles below it in the same column
    pub fn cells_below(self) -> Self {
        let mut result = 0;
        for cell in self.cells() {
            let column = Self::column_of(cell.first_index());
            result |= cell.0 - Self::cell(column, 0).0;
        }
        Self(result)
    }

    /// The set reflected about the center column (padding bits included)
    pub fn mirrored(self) -> Self {
        let column_bits = (1u64 << COLUMN_BITS) - 1;
        let mut mirrored = 0;
        for column in 0..WIDTH {
            let bits = (self.0 >> (column * COLUMN_BITS)) & column_bits;
            mirrored |= bits << ((WIDTH - 1 - column) * COLUMN_BITS);
        }
        Self(mirrored)
    }
}

/// Iterator over the single-tile subsets of a `Bitboard`
pub struct Cells(u64);

impl Iterator for Cells {
    type Item = Bitboard;

    fn next(&mut self) -> Option<Self::Item> {
        if self.0 == 0 {
            return None;
        }
        let cell = self.0 & self.0.wrapping_neg();
        self.0 ^= cell;
        Some(Bitboard(cell))
    }
}

macro_rules! impl_bit_op {
    ($op_trait:ident, $op:ident, $assign_trait:ident, $assign:ident, $token:tt) => {
        impl $op_trait for Bitboard {
            type Output = Bitboard;

            fn $op(self, rhs: Bitboard) -> Bitboard {
                Bitboard(self.0 $token rhs.0)
            }
        }

        impl $assign_trait for Bitboard {
            fn $assign(&mut self, rhs: Bitboard) {
                self.0 = self.0 $token rhs.0;
            }
        }
    };
}

impl_bit_op!(BitAnd, bitand, BitAndAssign, bitand_assign, &);
impl_bit_op!(BitOr, bitor, BitOrAssign, bitor_assign, |);
impl_bit_op!(BitXor, bitxor, BitXorAssign, bitxor_assign, ^);

impl Not for Bitboard {
    type Output = Bitboard;

    fn not(self) -> Bitboard {
        Bitboard(!self.0)
    }
}

impl Shl<u32> for Bitboard {
    type Output = Bitboard;

    fn shl(self, rhs: u32) -> Bitboard {
        Bitboard(self.0 << rhs)
    }
}

impl Shr<u32> for Bitboard {
    type Output = Bitboard;

    fn shr(self, rhs: u32) -> Bitboard {
        Bitboard(self.0 >> rhs)
    }
}

impl fmt::Debug for Bitboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bitboard({:#018x})", self.0)?;
        for row in (0..COLUMN_BITS).rev() {
            for column in 0..WIDTH {
                let set = self.intersects(Self::cell(column, row));
                write!(f, "{}", if set { 'O' } else { '.' })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
