//! Round-trip preservation of wire records.
//!
//! [`Captured`] pairs a parsed record with the JSON object it was parsed
//! from. Logic only ever looks at the typed value; the captured object is
//! consulted on re-serialization, where every key the current schema does
//! not know about is written back next to the typed fields. Records written
//! by a newer peer therefore survive being read, modified and echoed by this
//! one.

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::de::{DeserializeOwned, Error as _};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A record type with a fixed set of known wire keys.
pub trait WireFields {
    /// Every JSON key the typed representation owns.
    ///
    /// Keys listed here are always taken from the typed value, even when the
    /// typed value omits them (for example a cleared optional field).
    const FIELDS: &'static [&'static str];
}

/// A parsed record plus the wire object it came from.
#[derive(Clone)]
pub struct Captured<T> {
    value: T,
    raw: Option<Map<String, Value>>,
}

impl<T> Captured<T> {
    /// Wrap a value that was built locally and has no wire origin.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { value, raw: None }
    }

    /// Borrow the typed value.
    #[must_use]
    pub const fn value(&self) -> &T {
        &self.value
    }

    /// Consume the wrapper and return the typed value.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// The captured wire object, if the record was parsed.
    #[must_use]
    pub const fn raw(&self) -> Option<&Map<String, Value>> {
        self.raw.as_ref()
    }
}

impl<T: WireFields> Captured<T> {
    /// Wrap a locally built value together with keys it does not own.
    ///
    /// Keys the typed schema owns are dropped from `unknown`, so a request
    /// can pass on everything it did not understand to the record it builds.
    #[must_use]
    pub fn with_unknown(value: T, unknown: Map<String, Value>) -> Self {
        let mut captured = Self::new(value);
        captured.merge_unknown(unknown);
        captured
    }

    /// Add or replace keys the typed schema does not own.
    pub fn merge_unknown(&mut self, unknown: Map<String, Value>) {
        for (key, value) in unknown {
            if T::FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.raw.get_or_insert_with(Map::new).insert(key, value);
        }
    }

    /// Keys of the captured object that the typed schema does not own.
    #[must_use]
    pub fn unknown_fields(&self) -> Map<String, Value> {
        self.raw
            .iter()
            .flat_map(|raw| raw.iter())
            .filter(|(key, _)| !T::FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<T: Serialize + WireFields> Captured<T> {
    /// Render the record as the JSON object that would go on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the typed value cannot be represented as JSON.
    pub fn to_wire(&self) -> serde_json::Result<Value> {
        let typed = serde_json::to_value(&self.value)?;
        let Value::Object(mut object) = typed else {
            return Ok(typed);
        };
        for (key, value) in self.unknown_fields() {
            object.entry(key).or_insert(value);
        }
        Ok(Value::Object(object))
    }
}

impl<T> From<T> for Captured<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> Deref for Captured<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Captured<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: PartialEq> PartialEq for Captured<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Captured<T> {}

impl<T: fmt::Debug> fmt::Debug for Captured<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: Serialize + WireFields> fmt::Display for Captured<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_wire() {
            Ok(value) => write!(f, "{value}"),
            Err(_) => write!(f, "<unrenderable record>"),
        }
    }
}

impl<T: Serialize + WireFields> Serialize for Captured<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.raw.is_none() {
            return self.value.serialize(serializer);
        }
        self.to_wire()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Captured<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let value = T::deserialize(&raw).map_err(D::Error::custom)?;
        let raw = match raw {
            Value::Object(object) => Some(object),
            _ => None,
        };
        Ok(Self { value, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    }

    impl WireFields for Record {
        const FIELDS: &'static [&'static str] = &["name", "note"];
    }

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let input = json!({"name": "a", "added_later": {"x": 1}, "flag": true});
        let record: Captured<Record> = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(record.name, "a");

        let output = serde_json::to_value(&record).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn typed_edits_win_over_captured_values() {
        let input = json!({"name": "a", "note": "old", "extra": 1});
        let mut record: Captured<Record> = serde_json::from_value(input).unwrap();
        record.name = "b".to_string();
        record.note = None;

        let output = serde_json::to_value(&record).unwrap();
        assert_eq!(output, json!({"name": "b", "extra": 1}));
    }

    #[test]
    fn locally_built_records_have_no_raw() {
        let record = Captured::new(Record {
            name: "a".to_string(),
            note: None,
        });
        assert!(record.raw().is_none());
        assert!(record.unknown_fields().is_empty());
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"name": "a"}));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Request {
        name: String,
    }

    impl WireFields for Request {
        const FIELDS: &'static [&'static str] = &["name"];
    }

    #[test]
    fn unknown_fields_carry_over_to_built_records() {
        let request: Captured<Request> =
            serde_json::from_value(json!({"name": "a", "labels": ["edge"], "note": "x"})).unwrap();

        let record = Captured::with_unknown(
            Record {
                name: request.name.clone(),
                note: None,
            },
            request.unknown_fields(),
        );
        // `note` belongs to the record, so the request's copy is not kept.
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"name": "a", "labels": ["edge"]})
        );
    }

    #[test]
    fn merged_unknown_fields_replace_older_values() {
        let mut record: Captured<Record> =
            serde_json::from_value(json!({"name": "a", "labels": ["edge"], "tier": 1})).unwrap();
        let mut update = Map::new();
        update.insert("labels".to_string(), json!(["core"]));
        update.insert("name".to_string(), json!("ignored"));
        record.merge_unknown(update);

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"name": "a", "labels": ["core"], "tier": 1})
        );
    }

    #[test]
    fn empty_unknown_map_keeps_record_local() {
        let record = Captured::with_unknown(
            Record {
                name: "a".to_string(),
                note: None,
            },
            Map::new(),
        );
        assert!(record.raw().is_none());
    }

    #[test]
    fn display_renders_wire_json() {
        let record: Captured<Record> =
            serde_json::from_value(json!({"name": "a", "z": 2})).unwrap();
        let rendered: Value = serde_json::from_str(&record.to_string()).unwrap();
        assert_eq!(rendered, json!({"name": "a", "z": 2}));
    }

    #[test]
    fn typed_errors_are_reported() {
        let err = serde_json::from_value::<Captured<Record>>(json!({"note": "x"})).unwrap_err();
        assert!(err.to_string().contains("name"));
    }
}
