use harvest_core::{AppId, ListingRecord};
use serde_json::Value as JsonValue;

/// Identifiers of every record that carries a usable `id`, in record order.
///
/// Records without an `id`, or with a null or empty one, are skipped. Whitespace is not
/// trimmed. Numeric ids are kept as their JSON text. Duplicates are preserved.
pub fn harvest_ids(records: &[ListingRecord]) -> Vec<AppId> {
    records
        .iter()
        .filter_map(|record| record.get("id"))
        .filter_map(id_text)
        .collect()
}

fn id_text(value: &JsonValue) -> Option<AppId> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
