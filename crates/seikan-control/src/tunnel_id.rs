//! Tunnel id generation
//!
//! Tunnel ids are short human-copyable codes of three zero-padded 3-digit
//! groups (`012-345-678`). Generators only draw codes; checking a code against
//! live tunnels is the registry's job.

use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of digits in each group
const GROUP_DIGITS: usize = 3;
const GROUPS: usize = 3;

/// A well-formed tunnel code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(String);

impl TunnelId {
    /// Build an id from its three numeric groups (each below 1000)
    pub fn from_groups(a: u16, b: u16, c: u16) -> Self {
        Self(format!("{:03}-{:03}-{:03}", a % 1000, b % 1000, c % 1000))
    }

    /// Parse a code as typed by a user. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let groups: Vec<&str> = raw.split('-').collect();
        if groups.len() != GROUPS {
            return None;
        }
        let well_formed = groups
            .iter()
            .all(|g| g.len() == GROUP_DIGITS && g.bytes().all(|b| b.is_ascii_digit()));
        if !well_formed {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of candidate tunnel ids
///
/// # Example
/// ```ignore
/// struct AlwaysSame;
///
/// impl TunnelIdGenerator for AlwaysSame {
///     fn generate(&self) -> TunnelId {
///         TunnelId::from_groups(1, 2, 3)
///     }
/// }
/// ```
pub trait TunnelIdGenerator: Send + Sync {
    /// Draw a candidate id. May repeat ids that are in use.
    fn generate(&self) -> TunnelId;
}

/// Uniformly random ids over the full 10^9 code space
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTunnelIdGenerator;

impl TunnelIdGenerator for RandomTunnelIdGenerator {
    fn generate(&self) -> TunnelId {
        let mut rng = rand::thread_rng();
        TunnelId::from_groups(
            rng.gen_range(0..1000),
            rng.gen_range(0..1000),
            rng.gen_range(0..1000),
        )
    }
}

/// Replays a fixed list of ids in order, wrapping around at the end
///
/// Used to force collisions and exhaustion in tests.
#[derive(Debug)]
pub struct ScriptedTunnelIdGenerator {
    ids: Vec<TunnelId>,
    cursor: AtomicUsize,
}

impl ScriptedTunnelIdGenerator {
    /// Panics if `ids` is empty
    pub fn new(ids: Vec<TunnelId>) -> Self {
        assert!(!ids.is_empty(), "scripted generator needs at least one id");
        Self {
            ids,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl TunnelIdGenerator for ScriptedTunnelIdGenerator {
    fn generate(&self) -> TunnelId {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.ids[index % self.ids.len()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_groups_pads() {
        assert_eq!(TunnelId::from_groups(12, 345, 6).as_str(), "012-345-006");
    }

    #[test]
    fn test_parse_accepts_well_formed() {
        let id = TunnelId::parse(" 012-345-678 ").unwrap();
        assert_eq!(id.as_str(), "012-345-678");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "",
            "012345678",
            "12-345-678",
            "012-345-6789",
            "012-345",
            "012-345-678-901",
            "abc-def-ghi",
            "012-3a5-678",
        ] {
            assert!(TunnelId::parse(raw).is_none(), "{} should not parse", raw);
        }
    }

    #[test]
    fn test_random_ids_are_well_formed() {
        let generator = RandomTunnelIdGenerator;
        for _ in 0..200 {
            let id = generator.generate();
            assert_eq!(TunnelId::parse(id.as_str()), Some(id));
        }
    }

    #[test]
    fn test_scripted_generator_wraps() {
        let generator = ScriptedTunnelIdGenerator::new(vec![
            TunnelId::from_groups(1, 1, 1),
            TunnelId::from_groups(2, 2, 2),
        ]);
        assert_eq!(generator.generate().as_str(), "001-001-001");
        assert_eq!(generator.generate().as_str(), "002-002-002");
        assert_eq!(generator.generate().as_str(), "001-001-001");
    }
}
