use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Flat text fields decoded from XML or a name/value list.
pub type FieldMap = BTreeMap<String, String>;

/// One logical output field and the raw upstream keys it may arrive under,
/// in order of preference.
#[derive(Debug, Clone, Copy)]
pub struct FieldAlias {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
}

pub trait FieldSource {
    fn text(&self, key: &str) -> Option<String>;
}

impl FieldSource for Map<String, Value> {
    fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_text)
    }
}

impl FieldSource for FieldMap {
    fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|value| non_blank(value))
    }
}

/// First alias with a present, non-blank scalar value.
pub fn pick_first<S>(source: &S, aliases: &[&str]) -> Option<String>
where
    S: FieldSource + ?Sized,
{
    aliases.iter().find_map(|key| source.text(key))
}

pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_blank(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Values resolved from one source against one alias table.
#[derive(Debug, Clone)]
pub struct Extracted {
    table: &'static [FieldAlias],
    values: BTreeMap<&'static str, String>,
}

impl Extracted {
    pub fn get(&self, field: &str) -> Option<String> {
        debug_assert!(
            self.table.iter().any(|entry| entry.field == field),
            "field {field} is not declared in its alias table"
        );
        self.values.get(field).cloned()
    }

    pub fn map(&self, field: &str, f: impl FnOnce(&str) -> String) -> Option<String> {
        self.get(field).map(|value| f(&value))
    }
}

pub fn extract<S>(source: &S, table: &'static [FieldAlias]) -> Extracted
where
    S: FieldSource + ?Sized,
{
    let values = table
        .iter()
        .filter_map(|entry| pick_first(source, entry.aliases).map(|value| (entry.field, value)))
        .collect();
    Extracted { table, values }
}
