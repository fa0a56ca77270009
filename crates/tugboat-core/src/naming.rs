//! Resource naming primitives.
//!
//! Cluster objects are named `<kind-prefix>-<id>` where `<id>` is derived
//! from the owning entity's identifier. Two strategies exist:
//!
//! - `IdPrefix`: the first 8 hex characters of the identifier. Short and
//!   readable, but two identifiers sharing a prefix collide.
//! - `Hashed`: 12 hex characters of the SHA-256 of the full identifier.
//!
//! `IdPrefix` is the default; switching strategy renames every object, so
//! it is only safe on a fresh cluster.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of identifier characters kept by [`short_id`].
pub const SHORT_ID_LEN: usize = 8;

const HASHED_ID_LEN: usize = 12;

/// Upper bound for slugs; leaves room for prefixes within DNS label limits.
const MAX_SLUG_LEN: usize = 40;

/// How identifiers are shortened into resource names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingStrategy {
    #[default]
    IdPrefix,
    Hashed,
}

impl NamingStrategy {
    /// The name fragment for `id` under this strategy.
    pub fn fragment(&self, id: &str) -> String {
        match self {
            NamingStrategy::IdPrefix => short_id(id),
            NamingStrategy::Hashed => hashed_id(id),
        }
    }
}

/// First 8 hex characters of an identifier, hyphens dropped, lowercased.
pub fn short_id(id: &str) -> String {
    id.chars()
        .filter(|c| *c != '-')
        .take(SHORT_ID_LEN)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// 12 hex characters of the SHA-256 digest of the full identifier.
pub fn hashed_id(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASHED_ID_LEN);
    hex
}

/// Lowercase DNS-label-safe slug: runs of non-alphanumerics become one `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}
