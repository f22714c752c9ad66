//! Deep merge of TOML documents (overlay wins on scalar conflicts).

use toml::Value;

/// Merge `overlay` into `base`. Tables are merged key by key, recursively;
/// arrays are concatenated; any other overlay value replaces the base value.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            base_items.extend(overlay_items);
        }
        (slot, value) => *slot = value,
    }
}
