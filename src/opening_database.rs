//! Precomputed exact scores for the first moves of the game
//!
//! The database file holds `DATABASE_CAPACITY` tag bytes followed by
//! `DATABASE_CAPACITY` score bytes. A position is stored at the index
//! `column_code % DATABASE_CAPACITY`, its tag is the low byte of the column
//! code and its score byte is `score - INVALID`, so a zero byte marks an
//! empty slot.

use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use indicatif::*;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rayon::prelude::*;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::{position::Position, score::INVALID, solver::Solver, transposition_table::*, WIDTH};

pub const DEFAULT_DATABASE_PATH: &str = "opening.cfc";
pub const DATABASE_CAPACITY: usize = 16_777_259; // prime value
pub const DATABASE_MAX_DEPTH: usize = 14;

const TAG_MASK: u64 = 0xFF;

// books loaded so far, one per path
static SHARED_DATABASES: Lazy<Mutex<HashMap<PathBuf, OpeningDatabase>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A cheaply cloneable handle to an opening book
#[derive(Clone)]
pub struct OpeningDatabase {
    storage: Arc<OpeningDatabaseStorage>,
    max_depth: usize,
}

impl OpeningDatabase {
    /// A book without any entries
    pub fn empty() -> Self {
        Self {
            storage: Arc::new(OpeningDatabaseStorage::default()),
            max_depth: DATABASE_MAX_DEPTH,
        }
    }

    /// Reads a book from disk
    ///
    /// A missing file is an error. A truncated file is loaded as far as it
    /// goes, the missing slots read as empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let storage = OpeningDatabaseStorage::load(path)
            .with_context(|| format!("could not open opening database {}", path.display()))?;
        info!(
            "loaded opening database {} ({} entries)",
            path.display(),
            storage.populated()
        );
        Ok(Self {
            storage: Arc::new(storage),
            max_depth: DATABASE_MAX_DEPTH,
        })
    }

    /// Reads a book from disk, falling back to an empty book
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(database) => database,
            Err(error) => {
                warn!("{:#}, continuing without an opening database", error);
                Self::empty()
            }
        }
    }

    /// The process-wide book stored at `path`
    ///
    /// The file is read by the first call only, every later call for the same
    /// path shares the loaded book.
    pub fn shared<P: AsRef<Path>>(path: P) -> Self {
        let mut databases = SHARED_DATABASES
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        databases
            .entry(path.as_ref().to_path_buf())
            .or_insert_with(|| Self::load_or_empty(&path))
            .clone()
    }

    /// Restricts lookups to positions with at most `max_depth` tiles
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The exact score of a position, if the book has it
    pub fn get(&self, position: &Position) -> Option<i32> {
        if position.num_moves() > self.max_depth {
            return None;
        }
        self.storage.get(position.column_code())
    }

    /// Writes the book in the binary format it is loaded from
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("could not create opening database {}", path.display()))?;
        self.storage.write(BufWriter::new(file))?;
        info!("saved opening database to {}", path.display());
        Ok(())
    }

    /// Solves every undecided position up to `depth` tiles past `root` and
    /// writes the resulting book to `output`
    ///
    /// Positions are solved in parallel, each worker thread owning a
    /// transposition table with `1 << table_bits` entries. The enumerated
    /// positions are checkpointed next to `output`, so an interrupted run
    /// skips the enumeration when restarted.
    pub fn generate<P: AsRef<Path>>(
        root: &Position,
        depth: usize,
        output: P,
        table_bits: u32,
    ) -> Result<Self> {
        let start = Instant::now();
        let output = output.as_ref();
        let checkpoint_path = output.with_extension("positions");
        let max_depth = root.num_moves() + depth;
        if max_depth != DATABASE_MAX_DEPTH {
            // the file does not record its depth
            warn!(
                "the book stores positions of up to {} tiles, load it with opening_database_depth = {}",
                max_depth, max_depth
            );
        }

        let positions = match read_checkpoint(&checkpoint_path, root, depth) {
            Some(positions) => {
                info!(
                    "loaded {} stored positions from {}",
                    positions.len(),
                    checkpoint_path.display()
                );
                positions
            }
            None => {
                let positions = enumerate_positions(root, depth);
                info!(
                    "found {} unique positions in {:.1}s",
                    positions.len(),
                    start.elapsed().as_secs_f64()
                );
                write_checkpoint(&checkpoint_path, root, depth, &positions)?;
                positions
            }
        };

        let progress = ProgressBar::new(positions.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("Calculating scores: {bar:40.cyan/blue} {pos}/{len} ~{eta} remaining")
                .progress_chars("█▓▒░  "),
        );

        // one table per worker, handed to a solver for each position and taken back after
        let tables: Vec<Mutex<Option<TranspositionTable>>> = (0..rayon::current_num_threads())
            .map(|_| Mutex::new(None))
            .collect();

        let entries: Vec<(u64, i32)> = positions
            .par_iter()
            .map(|(code, moves)| {
                let slot = &tables[rayon::current_thread_index().unwrap_or(0) % tables.len()];
                let mut table_guard = slot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let table = table_guard
                    .take()
                    .unwrap_or_else(|| TranspositionTable::with_capacity_bits(table_bits));

                let mut position = Position::new();
                for &column in moves {
                    position.play(column as usize);
                }
                let mut solver = Solver::new_with_transposition_table(position, table);
                let score = solver.evaluate();

                *table_guard = Some(solver.into_transposition_table());
                progress.inc(1);
                (*code, score)
            })
            .collect();
        progress.finish();

        let storage = OpeningDatabaseStorage::from_entries(&entries);
        info!(
            "opening database generation complete in {}, {} of {} positions stored",
            HumanDuration(start.elapsed()),
            storage.populated(),
            entries.len()
        );

        let database = Self {
            storage: Arc::new(storage),
            max_depth,
        };
        database.save(output)?;

        if let Err(error) = fs::remove_file(&checkpoint_path) {
            warn!("could not remove {}: {}", checkpoint_path.display(), error);
        }
        Ok(database)
    }
}

impl std::ops::Deref for OpeningDatabase {
    type Target = OpeningDatabaseStorage;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

/// The slots of an opening book, indexed by column code
#[derive(Clone, Default)]
pub struct OpeningDatabaseStorage {
    tags: Vec<u8>,
    // decoded scores, `INVALID` for empty slots
    scores: Vec<i8>,
}

impl OpeningDatabaseStorage {
    fn load(path: &Path) -> Result<Self> {
        let mut bytes = Vec::with_capacity(2 * DATABASE_CAPACITY);
        BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;

        if bytes.len() < 2 * DATABASE_CAPACITY {
            warn!(
                "opening database {} is truncated ({} of {} bytes), some entries are missing",
                path.display(),
                bytes.len(),
                2 * DATABASE_CAPACITY
            );
        }

        let split = bytes.len().min(DATABASE_CAPACITY);
        let end = bytes.len().min(2 * DATABASE_CAPACITY);
        let tags = bytes[..split].to_vec();
        let scores = bytes[split..end]
            .iter()
            .map(|&raw| (raw as i8).wrapping_add(INVALID as i8))
            .collect();
        Ok(Self { tags, scores })
    }

    /// Builds the slots from (column code, score) pairs
    ///
    /// When several positions land on the same slot the first one with a tag
    /// unique to the slot is stored. If there is none the slot stays empty, so
    /// a lookup never returns the score of another position.
    fn from_entries(entries: &[(u64, i32)]) -> Self {
        let mut slots: HashMap<usize, Vec<(u8, i8)>> = HashMap::new();
        for &(code, score) in entries {
            let index = (code % DATABASE_CAPACITY as u64) as usize;
            slots
                .entry(index)
                .or_default()
                .push(((code & TAG_MASK) as u8, score as i8));
        }

        let mut storage = Self {
            tags: vec![0; DATABASE_CAPACITY],
            scores: vec![INVALID as i8; DATABASE_CAPACITY],
        };
        let mut cleared = 0;
        for (index, candidates) in slots {
            let unique = candidates
                .iter()
                .find(|(tag, _)| candidates.iter().filter(|(other, _)| other == tag).count() == 1);
            match unique {
                Some(&(tag, score)) => {
                    storage.tags[index] = tag;
                    storage.scores[index] = score;
                }
                None => cleared += 1,
            }
        }
        if cleared > 0 {
            debug!("cleared {} opening database slots with ambiguous tags", cleared);
        }
        storage
    }

    /// The score stored for a column code
    pub fn get(&self, code: u64) -> Option<i32> {
        let index = (code % DATABASE_CAPACITY as u64) as usize;
        let score = *self.scores.get(index)? as i32;
        if score == INVALID {
            return None;
        }
        let tag = *self.tags.get(index)?;
        if tag as u64 == code & TAG_MASK {
            Some(score)
        } else {
            None
        }
    }

    /// Number of slots holding a score
    pub fn populated(&self) -> usize {
        self.scores
            .iter()
            .filter(|&&score| score as i32 != INVALID)
            .count()
    }

    fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        for index in 0..DATABASE_CAPACITY {
            writer.write_u8(self.tags.get(index).copied().unwrap_or(0))?;
        }
        for index in 0..DATABASE_CAPACITY {
            let score = self.scores.get(index).copied().unwrap_or(INVALID as i8);
            writer.write_u8(score.wrapping_sub(INVALID as i8) as u8)?;
        }
        writer.flush()?;
        Ok(())
    }
}

// (column code, moves) of every undecided position within `depth` tiles of `root`
fn enumerate_positions(root: &Position, depth: usize) -> Vec<(u64, Vec<u8>)> {
    fn visit(
        position: &mut Position,
        remaining: usize,
        seen: &mut HashSet<u64>,
        found: &mut Vec<(u64, Vec<u8>)>,
    ) {
        if position.is_over() {
            return;
        }
        let code = position.column_code();
        // transpositions share the whole subtree
        if !seen.insert(code) {
            return;
        }
        found.push((
            code,
            position.played_moves().iter().map(|&c| c as u8).collect(),
        ));
        if remaining == 0 {
            return;
        }
        for column in 0..WIDTH {
            if position.legal(column) {
                position.play(column);
                visit(position, remaining - 1, seen, found);
                position.undo();
            }
        }
    }

    let mut position = root.clone();
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    visit(&mut position, depth, &mut seen, &mut found);
    found
}

fn checkpoint_header(root: &Position, depth: usize) -> Vec<u8> {
    let mut header = vec![depth as u8, root.num_moves() as u8];
    header.extend(root.played_moves().iter().map(|&c| c as u8));
    header
}

fn write_checkpoint(
    path: &Path,
    root: &Position,
    depth: usize,
    positions: &[(u64, Vec<u8>)],
) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(&checkpoint_header(root, depth))?;
    file.write_u64::<BigEndian>(positions.len() as u64)?;
    for (code, moves) in positions {
        file.write_u64::<BigEndian>(*code)?;
        file.write_u8(moves.len() as u8)?;
        file.write_all(moves)?;
    }
    file.flush()?;
    debug!("wrote {} positions to {}", positions.len(), path.display());
    Ok(())
}

// the stored positions, if the checkpoint exists and was written for the same root and depth
fn read_checkpoint(path: &Path, root: &Position, depth: usize) -> Option<Vec<(u64, Vec<u8>)>> {
    let mut file = BufReader::new(File::open(path).ok()?);

    let expected = checkpoint_header(root, depth);
    let mut header = vec![0; expected.len()];
    file.read_exact(&mut header).ok()?;
    if header != expected {
        debug!("ignoring checkpoint {} for another root", path.display());
        return None;
    }

    let count = file.read_u64::<BigEndian>().ok()?;
    let mut positions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let code = file.read_u64::<BigEndian>().ok()?;
        let mut moves = vec![0; file.read_u8().ok()? as usize];
        file.read_exact(&mut moves).ok()?;
        positions.push((code, moves));
    }
    Some(positions)
}
