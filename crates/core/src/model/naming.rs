//! Deterministic naming for branch content and node tables.

use serde_json::Value;

/// Prefix keeps generated table names starting with a letter.
pub const TABLE_PREFIX: &str = "opensite_";

/// Length of the node-name fragment in a table name.
const NAME_HASH_LEN: usize = 8;

/// Content hash of a fully-resolved branch payload.
///
/// The payload is hashed as compact JSON. `serde_json` objects keep their
/// keys sorted, so key order in the source document never changes the result.
pub fn content_hash(payload: &Value) -> String {
    format!("{:x}", md5::compute(payload.to_string()))
}

/// Table name for a node in a branch with the given content hash.
pub fn table_name(node_name: &str, branch_hash: &str) -> String {
    let normalized = node_name.trim().to_lowercase();
    let digest = format!("{:x}", md5::compute(normalized.as_bytes()));
    format!(
        "{}{}_{}",
        TABLE_PREFIX,
        &digest[..NAME_HASH_LEN],
        branch_hash
    )
}
