//! Filesystem-safe keys for document IDs.
//!
//! Lock files, backup directories, and audit logs are all named after the
//! document they belong to. Remote IDs are opaque, so anything that is not a
//! plain lowercase `[a-z0-9._-]` token is hashed instead of being used
//! verbatim. Uppercase is hashed so `ABC` and `abc` stay apart on
//! case-insensitive filesystems, and the `h-` prefix is reserved for hashed
//! keys.

use sha2::{Digest, Sha256};

const MAX_PLAIN_KEY_LEN: usize = 100;
const HASHED_PREFIX: &str = "h-";

/// Map a document ID to a name usable as a single path component.
///
/// Plain IDs (Confluence page IDs are numeric) are kept as-is so the
/// on-disk layout stays readable; everything else becomes `h-<sha256>`.
/// Distinct IDs never share a key.
pub fn file_key(document_id: &str) -> String {
    let plain = !document_id.is_empty()
        && document_id.len() <= MAX_PLAIN_KEY_LEN
        && !document_id.starts_with('.')
        && !document_id.starts_with(HASHED_PREFIX)
        && document_id
            .chars()
            .all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
            });

    if plain {
        document_id.to_string()
    } else {
        let digest = Sha256::digest(document_id.as_bytes());
        format!("{HASHED_PREFIX}{}", &hex::encode(digest)[..32])
    }
}
