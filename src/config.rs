use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{
    opening_database::{OpeningDatabase, DATABASE_MAX_DEPTH, DEFAULT_DATABASE_PATH},
    transposition_table::{ReplacementPolicy, TranspositionTable, DEFAULT_CAPACITY_BITS},
};

const MAX_TRANSPOSITION_TABLE_BITS: u32 = 32;

/// Tuning knobs of a [`Solver`](crate::solver::Solver)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// The transposition table holds `1 << transposition_table_bits` entries
    pub transposition_table_bits: u32,
    pub replacement_policy: ReplacementPolicy,
    /// Opening book to consult, `None` to search every position
    pub opening_database_path: Option<PathBuf>,
    /// Book entries are only trusted for positions with at most this many tiles
    pub opening_database_depth: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            transposition_table_bits: DEFAULT_CAPACITY_BITS,
            replacement_policy: ReplacementPolicy::default(),
            opening_database_path: Some(PathBuf::from(DEFAULT_DATABASE_PATH)),
            opening_database_depth: DATABASE_MAX_DEPTH,
        }
    }
}

impl SolverConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_TRANSPOSITION_TABLE_BITS).contains(&self.transposition_table_bits),
            "transposition_table_bits must be between 1 and {}, got {}",
            MAX_TRANSPOSITION_TABLE_BITS,
            self.transposition_table_bits
        );
        Ok(())
    }

    /// Depth of a book generated from the empty board for this config
    ///
    /// Lookups trust every book entry up to `opening_database_depth` tiles,
    /// so a book of any other depth would be misread.
    pub fn book_generation_depth(&self, requested: Option<usize>) -> Result<usize> {
        let depth = requested.unwrap_or(self.opening_database_depth);
        ensure!(
            depth == self.opening_database_depth,
            "a book of depth {} must be read with opening_database_depth = {}, the config has {}",
            depth,
            depth,
            self.opening_database_depth
        );
        Ok(depth)
    }

    pub fn transposition_table(&self) -> TranspositionTable {
        TranspositionTable::with_policy(self.transposition_table_bits, self.replacement_policy)
    }

    /// The shared book at the configured path, limited to the configured depth
    pub fn opening_database(&self) -> Option<OpeningDatabase> {
        self.opening_database_path.as_ref().map(|path| {
            OpeningDatabase::shared(path).with_max_depth(self.opening_database_depth)
        })
    }
}
