//! redb table definitions for the coordination store.
//!
//! Both tables use `&str` keys and `&[u8]` values.

use redb::TableDefinition;

/// Plain keys; values are JSON `TtlValue`s.
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Hash map entries keyed by `{hash}\0{field}`; values are raw UTF-8.
pub const HASHES: TableDefinition<&str, &[u8]> = TableDefinition::new("hashes");

/// Separator between a hash name and a field in `HASHES` keys.
pub const FIELD_SEP: char = '\u{0}';

/// Composite `HASHES` key for one field.
pub fn hash_field_key(hash: &str, field: &str) -> String {
    format!("{hash}{FIELD_SEP}{field}")
}

/// Half-open key range covering every field of `hash`.
pub fn hash_range(hash: &str) -> (String, String) {
    (format!("{hash}\u{0}"), format!("{hash}\u{1}"))
}
