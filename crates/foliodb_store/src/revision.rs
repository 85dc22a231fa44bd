//! Revision tokens and their total order.
//!
//! Every accepted write produces a new revision token of the form
//! `"{generation}-{digest}"`, e.g. `"3-9c3b4f2ea1"`. The generation is a
//! monotonic per-document edit counter; the digest is derived from the
//! parent revision, the written body, and a random salt, so two
//! independent writes from the same parent always produce distinct,
//! mutually detectable tokens.
//!
//! Tokens are totally ordered by `(generation, digest)`. The order is the
//! same on every replica, which is what lets divergent edits converge to
//! the same winner without coordination.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from the digest.
const DIGEST_LEN: usize = 32;

/// An opaque revision token marking one version of a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    generation: u64,
    digest: String,
}

impl RevisionId {
    /// Creates a revision token from its parts.
    ///
    /// Mostly useful in tests; real tokens come from [`RevisionId::generate`].
    #[must_use]
    pub fn new(generation: u64, digest: impl Into<String>) -> Self {
        Self {
            generation,
            digest: digest.into(),
        }
    }

    /// Derives the token for a new write.
    ///
    /// The generation is `parent.generation + 1` (or 1 for a first write).
    /// The digest hashes the parent token, the body bytes, the deletion
    /// flag, and a random salt.
    #[must_use]
    pub fn generate(parent: Option<&RevisionId>, body: &[u8], deleted: bool) -> Self {
        let generation = parent.map(|p| p.generation + 1).unwrap_or(1);

        let salt: [u8; 16] = rand::random();
        let mut hasher = Sha256::new();
        if let Some(parent) = parent {
            hasher.update(parent.to_string().as_bytes());
        }
        hasher.update(body);
        hasher.update([u8::from(deleted)]);
        hasher.update(salt);

        let digest = hex_encode(&hasher.finalize()[..DIGEST_LEN / 2]);

        Self { generation, digest }
    }

    /// Returns the edit-counter component.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the digest component.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}

impl FromStr for RevisionId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, digest) = s.split_once('-').ok_or_else(|| StoreError::InvalidRevision {
            value: s.to_string(),
        })?;

        let generation: u64 = generation.parse().map_err(|_| StoreError::InvalidRevision {
            value: s.to_string(),
        })?;

        if generation == 0 || digest.is_empty() {
            return Err(StoreError::InvalidRevision {
                value: s.to_string(),
            });
        }

        Ok(Self {
            generation,
            digest: digest.to_string(),
        })
    }
}

impl TryFrom<String> for RevisionId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RevisionId> for String {
    fn from(rev: RevisionId) -> Self {
        rev.to_string()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // Infallible for String
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_and_parse_roundtrip() {
        let rev = RevisionId::new(3, "9c3b4f2ea1");
        assert_eq!(rev.to_string(), "3-9c3b4f2ea1");

        let parsed: RevisionId = "3-9c3b4f2ea1".parse().unwrap();
        assert_eq!(parsed, rev);
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        assert!("".parse::<RevisionId>().is_err());
        assert!("nodash".parse::<RevisionId>().is_err());
        assert!("0-abc".parse::<RevisionId>().is_err());
        assert!("3-".parse::<RevisionId>().is_err());
        assert!("x-abc".parse::<RevisionId>().is_err());
    }

    #[test]
    fn first_write_has_generation_one() {
        let rev = RevisionId::generate(None, b"{}", false);
        assert_eq!(rev.generation(), 1);
    }

    #[test]
    fn child_increments_generation() {
        let parent = RevisionId::generate(None, b"{}", false);
        let child = RevisionId::generate(Some(&parent), b"{}", false);
        assert_eq!(child.generation(), parent.generation() + 1);
        assert!(child > parent);
    }

    #[test]
    fn same_parent_same_body_diverges() {
        let parent = RevisionId::generate(None, b"{}", false);
        let a = RevisionId::generate(Some(&parent), b"same", false);
        let b = RevisionId::generate(Some(&parent), b"same", false);
        assert_ne!(a, b, "salted digests must differ");
        assert_eq!(a.generation(), b.generation());
    }

    #[test]
    fn ordering_is_generation_then_digest() {
        let low = RevisionId::new(2, "ffff");
        let high = RevisionId::new(3, "0000");
        assert!(high > low);

        let a = RevisionId::new(3, "aaaa");
        let b = RevisionId::new(3, "bbbb");
        assert!(b > a);
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in "\\PC*") {
            let _ = s.parse::<RevisionId>();
        }

        #[test]
        fn roundtrip_any_valid_token(generation in 1u64..u64::MAX, digest in "[0-9a-f]{1,64}") {
            let rev = RevisionId::new(generation, digest);
            let parsed: RevisionId = rev.to_string().parse().unwrap();
            prop_assert_eq!(parsed, rev);
        }

        #[test]
        fn order_is_total_and_consistent(
            g1 in 1u64..1000, d1 in "[0-9a-f]{8}",
            g2 in 1u64..1000, d2 in "[0-9a-f]{8}",
        ) {
            let a = RevisionId::new(g1, d1);
            let b = RevisionId::new(g2, d2);
            // Antisymmetry: exactly one of <, ==, > holds
            let forward = a.cmp(&b);
            let backward = b.cmp(&a);
            prop_assert_eq!(forward, backward.reverse());
            // Generation dominates
            if g1 != g2 {
                prop_assert_eq!(forward, g1.cmp(&g2));
            }
        }
    }
}
