use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key-value store shared by all steps of a run.
///
/// Keys are only ever inserted or overwritten; there is no removal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunContext {
    entries: BTreeMap<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Resolves a dotted path such as `lead.address.city` or `records.0.id`.
    ///
    /// An exact key match wins over path traversal, so keys containing dots
    /// stay addressable.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.entries.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.entries.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replaces `{{key}}` placeholders with context values. Strings are
    /// inserted verbatim, other values as compact JSON. Unresolved
    /// placeholders are left untouched.
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let end = start + 2 + len;
            out.push_str(&rest[..start]);

            let key = rest[start + 2..end].trim();
            match self.lookup(key) {
                Some(Value::String(s)) => out.push_str(s),
                Some(value) => out.push_str(&value.to_string()),
                None => out.push_str(&rest[start..end + 2]),
            }
            rest = &rest[end + 2..];
        }

        out.push_str(rest);
        out
    }

    /// Interpolates every string inside a JSON value. A string consisting of
    /// a single placeholder is replaced by the referenced value itself, which
    /// keeps numbers and objects typed.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if let Some(key) = trimmed
                    .strip_prefix("{{")
                    .and_then(|k| k.strip_suffix("}}"))
                    .filter(|k| !k.contains("{{") && !k.contains("}}"))
                {
                    if let Some(found) = self.lookup(key.trim()) {
                        return found.clone();
                    }
                }
                Value::String(self.interpolate(s))
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(self.interpolate_map(map)),
            other => other.clone(),
        }
    }

    pub fn interpolate_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
            .collect()
    }
}

impl From<Map<String, Value>> for RunContext {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map.into_iter().collect(),
        }
    }
}

impl FromIterator<(String, Value)> for RunContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
