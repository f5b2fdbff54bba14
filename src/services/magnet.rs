//! Content identifier derivation for magnet links
//!
//! The derived identifier is the only thing tying a locally tracked download
//! to the remote client's task list, so the derivation must be stable across
//! submission time and reconciliation time.

use sha2::{Digest, Sha256};

/// Derive the content identifier for a magnet link.
///
/// Lowercases the link and truncates at the first `&`, keeping only the
/// leading `xt=` portion; tracker and display-name parameters often differ
/// between the link the user submitted and the one the client reports back.
/// This is a best-effort join key, not a magnet canonicalization: links that
/// reorder fields before the first `&` hash differently.
pub fn magnet_identifier(magnet: &str) -> String {
    let normalized = magnet.to_lowercase();
    let base = match normalized.find('&') {
        Some(index) => &normalized[..index],
        None => normalized.as_str(),
    };
    format!("{:x}", Sha256::digest(base.as_bytes()))
}
