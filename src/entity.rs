use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Fields consulted for an entity's identity, in priority order.
const IDENTITY_FIELDS: [&str; 3] = ["obu_id", "_id", "regnNumber"];

/// Hex characters kept from the structural hash
const HASH_KEY_LEN: usize = 16;

/// Stable identity of an [`Entity`].
///
/// Keys derived from an id field carry the raw field value, so a plain
/// vehicle id compares equal to the key of the record it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Wrap a raw key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tracked vehicle record as served by the backend.
///
/// The record is kept as raw JSON; only the identity fields are
/// interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Value);

impl Entity {
    /// Wrap a JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Field lookup on object records
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Underlying JSON value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume into the underlying JSON value
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Derive the identity key.
    ///
    /// The first non-empty of `obu_id`, `_id`, `regnNumber` wins. Records
    /// with none of them are keyed by a BLAKE3 hash of their canonical JSON.
    /// That fallback is weak: changing any field of such a record yields a
    /// different key, so the cache treats it as a different vehicle.
    ///
    /// Returns `None` for non-object values and empty objects.
    pub fn identity_key(&self) -> Option<EntityKey> {
        let fields = self.0.as_object().filter(|m| !m.is_empty())?;

        let from_field = IDENTITY_FIELDS
            .iter()
            .filter_map(|name| fields.get(*name))
            .find_map(id_text);
        if let Some(id) = from_field {
            return Some(EntityKey(id));
        }

        let canonical = serde_json::to_vec(&Canonical(&self.0)).ok()?;
        let hash = blake3::hash(&canonical).to_hex();
        Some(EntityKey(format!("#{}", &hash.as_str()[..HASH_KEY_LEN])))
    }
}

impl From<Value> for Entity {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Serializes a JSON value with object keys sorted at every depth,
/// whatever map ordering serde_json was built with.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(fields) => {
                let mut sorted: Vec<_> = fields.iter().collect();
                sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

                let mut map = serializer.serialize_map(Some(sorted.len()))?;
                for (key, value) in sorted {
                    map.serialize_entry(key, &Canonical(value))?;
                }
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Canonical(item))?;
                }
                seq.end()
            }
            other => other.serialize(serializer),
        }
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_priority() {
        let entity = Entity::new(json!({"obu_id": "OBU-1", "_id": "abc", "regnNumber": "TN01"}));
        assert_eq!(entity.identity_key(), Some(EntityKey::from("OBU-1")));

        let entity = Entity::new(json!({"_id": "abc", "regnNumber": "TN01"}));
        assert_eq!(entity.identity_key(), Some(EntityKey::from("abc")));

        let entity = Entity::new(json!({"regnNumber": "TN01", "route": "R5"}));
        assert_eq!(entity.identity_key(), Some(EntityKey::from("TN01")));
    }

    #[test]
    fn test_empty_fields_are_skipped() {
        let entity = Entity::new(json!({"obu_id": "", "_id": null, "regnNumber": "TN01"}));
        assert_eq!(entity.identity_key(), Some(EntityKey::from("TN01")));

        let entity = Entity::new(json!({"obu_id": "   ", "_id": 42}));
        assert_eq!(entity.identity_key(), Some(EntityKey::from("42")));
    }

    #[test]
    fn test_structural_hash_fallback() {
        let entity = Entity::new(json!({"route": "R5", "clgNo": 20}));
        let key = entity.identity_key().expect("hash key");
        assert!(key.as_str().starts_with('#'));
        assert_eq!(key.as_str().len(), 1 + HASH_KEY_LEN);

        // Field order does not matter
        let reordered: Entity = serde_json::from_str(r#"{"clgNo":20,"route":"R5"}"#).unwrap();
        assert_eq!(reordered.identity_key(), Some(key.clone()));

        // Nested objects are canonical too
        let nested: Entity =
            serde_json::from_str(r#"{"route":"R5","stop":{"name":"Adyar","lat":13.0,"stops":[{"b":1,"a":2}]}}"#)
                .unwrap();
        let nested_reordered: Entity =
            serde_json::from_str(r#"{"stop":{"stops":[{"a":2,"b":1}],"lat":13.0,"name":"Adyar"},"route":"R5"}"#)
                .unwrap();
        assert_eq!(nested.identity_key(), nested_reordered.identity_key());

        // Any field change alters the key
        let changed = Entity::new(json!({"route": "R5", "clgNo": 21}));
        assert_ne!(changed.identity_key(), Some(key));
    }

    #[test]
    fn test_key_stable_across_round_trip() {
        let entity = Entity::new(json!({"route": "R5", "stops": ["A", "B"], "lat": 12.9}));
        let encoded = serde_json::to_string(&entity).unwrap();
        let decoded: Entity = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, entity);
        assert_eq!(decoded.identity_key(), entity.identity_key());
    }

    #[test]
    fn test_no_key_for_non_objects() {
        assert_eq!(Entity::new(json!(null)).identity_key(), None);
        assert_eq!(Entity::new(json!({})).identity_key(), None);
        assert_eq!(Entity::new(json!("BUS-42")).identity_key(), None);
        assert_eq!(Entity::new(json!([1, 2])).identity_key(), None);
    }
}
