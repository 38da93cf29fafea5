use serde::{Deserialize, Serialize};

/// How a slot already holding a different position is treated on update
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// The newest entry always wins the slot
    AlwaysReplace,
    /// Entries that took more than `low_effort_nodes` nodes to compute are
    /// kept against cheaper challengers, until they have turned away
    /// `max_age` of them
    EffortBiased { max_age: u8, low_effort_nodes: u32 },
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        ReplacementPolicy::EffortBiased {
            max_age: 10,
            low_effort_nodes: 100,
        }
    }
}

#[derive(Copy, Clone, Default)]
struct Entry {
    // canonical position hash, 0 for empty slots
    hash: u64,
    min: i8,
    max: i8,
    // nodes searched to produce the bounds
    effort: u32,
    age: u8,
}

pub const DEFAULT_CAPACITY_BITS: u32 = 23;

/// Fixed-capacity score cache mapping positions to known score bounds
///
/// Slots are indexed by the low bits of the mixed hash and verified against
/// the full canonical hash, so lookups never return the bounds of another
/// position.
#[derive(Clone)]
pub struct TranspositionTable {
    entries: Vec<Entry>,
    index_mask: u64,
    policy: ReplacementPolicy,
}

impl TranspositionTable {
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_CAPACITY_BITS, ReplacementPolicy::default())
    }

    pub fn with_capacity_bits(bits: u32) -> Self {
        Self::with_policy(bits, ReplacementPolicy::default())
    }

    pub fn with_policy(bits: u32, policy: ReplacementPolicy) -> Self {
        let capacity = 1usize << bits;
        Self {
            entries: vec![Entry::default(); capacity],
            index_mask: capacity as u64 - 1,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    /// The cached (min, max) score bounds of a position, if present
    pub fn get(&self, hash: u64, mixed_hash: u64) -> Option<(i32, i32)> {
        let entry = &self.entries[(mixed_hash & self.index_mask) as usize];
        if entry.hash == hash && hash != 0 {
            Some((entry.min as i32, entry.max as i32))
        } else {
            None
        }
    }

    /// Records the bounds of a position
    ///
    /// Bounds of a position already in the table are only ever tightened and
    /// the efforts add up. Otherwise the replacement policy decides whether
    /// the slot's incumbent is evicted.
    pub fn update(&mut self, hash: u64, mixed_hash: u64, min: i32, max: i32, effort: u32) {
        let entry = &mut self.entries[(mixed_hash & self.index_mask) as usize];

        if entry.hash == hash {
            entry.min = entry.min.max(min as i8);
            entry.max = entry.max.min(max as i8);
            entry.effort = entry.effort.saturating_add(effort);
            return;
        }

        if let ReplacementPolicy::EffortBiased {
            max_age,
            low_effort_nodes,
        } = self.policy
        {
            if entry.effort > low_effort_nodes && effort <= entry.effort {
                entry.age = entry.age.saturating_add(1);
                if entry.age <= max_age {
                    return;
                }
            }
        }

        *entry = Entry {
            hash,
            min: min as i8,
            max: max as i8,
            effort,
            age: 0,
        };
    }

    /// Empties every slot
    #[cfg(test)]
    pub fn clear(&mut self) {
        self.entries.fill(Entry::default());
    }

    /// Number of occupied slots
    #[cfg(test)]
    pub fn occupied(&self) -> usize {
        self.entries.iter().filter(|entry| entry.hash != 0).count()
    }
}

impl Default for TranspositionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // two hashes sharing a slot in a table of 16 entries
    const FIRST: (u64, u64) = (0x1234, 0x05);
    const SECOND: (u64, u64) = (0x5678, 0x15);

    #[test]
    fn get_and_tighten() {
        let mut table = TranspositionTable::with_capacity_bits(4);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.get(FIRST.0, FIRST.1), None);

        table.update(FIRST.0, FIRST.1, -3, 5, 10);
        assert_eq!(table.get(FIRST.0, FIRST.1), Some((-3, 5)));
        // same slot, different position
        assert_eq!(table.get(SECOND.0, SECOND.1), None);

        // looser bounds never widen the entry
        table.update(FIRST.0, FIRST.1, -10, 2, 10);
        assert_eq!(table.get(FIRST.0, FIRST.1), Some((-3, 2)));
        table.update(FIRST.0, FIRST.1, 1, 18, 10);
        assert_eq!(table.get(FIRST.0, FIRST.1), Some((1, 2)));
        assert_eq!(table.occupied(), 1);

        table.clear();
        assert_eq!(table.get(FIRST.0, FIRST.1), None);
        assert_eq!(table.occupied(), 0);
    }

    #[test]
    fn always_replace() {
        let mut table = TranspositionTable::with_policy(4, ReplacementPolicy::AlwaysReplace);
        table.update(FIRST.0, FIRST.1, 0, 0, 1_000_000);
        table.update(SECOND.0, SECOND.1, 1, 1, 1);
        assert_eq!(table.get(FIRST.0, FIRST.1), None);
        assert_eq!(table.get(SECOND.0, SECOND.1), Some((1, 1)));
    }

    #[test]
    fn effort_biased_replacement() {
        let policy = ReplacementPolicy::EffortBiased {
            max_age: 2,
            low_effort_nodes: 100,
        };

        // cheap incumbents are replaced immediately
        let mut table = TranspositionTable::with_policy(4, policy);
        table.update(FIRST.0, FIRST.1, 0, 0, 100);
        table.update(SECOND.0, SECOND.1, 1, 1, 1);
        assert_eq!(table.get(SECOND.0, SECOND.1), Some((1, 1)));

        // expensive ones survive `max_age` cheaper challengers
        let mut table = TranspositionTable::with_policy(4, policy);
        table.update(FIRST.0, FIRST.1, 0, 0, 500);
        table.update(SECOND.0, SECOND.1, 1, 1, 1);
        table.update(SECOND.0, SECOND.1, 1, 1, 1);
        assert_eq!(table.get(FIRST.0, FIRST.1), Some((0, 0)));
        table.update(SECOND.0, SECOND.1, 1, 1, 1);
        assert_eq!(table.get(FIRST.0, FIRST.1), None);
        assert_eq!(table.get(SECOND.0, SECOND.1), Some((1, 1)));

        // but not a more expensive one
        let mut table = TranspositionTable::with_policy(4, policy);
        table.update(FIRST.0, FIRST.1, 0, 0, 500);
        table.update(SECOND.0, SECOND.1, 1, 1, 501);
        assert_eq!(table.get(SECOND.0, SECOND.1), Some((1, 1)));
    }

    #[test]
    fn policy_from_toml() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ReplacementPolicy,
        }
        let wrapper: Wrapper = toml::from_str("policy = { kind = \"always_replace\" }")?;
        assert_eq!(wrapper.policy, ReplacementPolicy::AlwaysReplace);

        let wrapper: Wrapper = toml::from_str(
            "[policy]\nkind = \"effort_biased\"\nmax_age = 3\nlow_effort_nodes = 50\n",
        )?;
        assert_eq!(
            wrapper.policy,
            ReplacementPolicy::EffortBiased {
                max_age: 3,
                low_effort_nodes: 50
            }
        );
        Ok(())
    }
}
