//! Conversion between domain records and entities.
//!
//! Records go through their serde representation. Marshalling maps each
//! serialized field onto a [`Value`]: integers that fit in `i64` become
//! [`Value::Integer`], other numbers [`Value::Double`], nested structs and
//! maps [`Value::Entity`], sequences [`Value::Array`]. Properties listed in
//! [`Record::PROPERTY_TYPES`] are coerced to their declared type instead, so
//! RFC 3339 strings become [`Value::Timestamp`] and byte sequences
//! [`Value::Blob`]. The identity field is carried by the key and never stored
//! as a property. Unmarshalling reverses the mapping and puts the key's
//! identifier back into the identity field.

use chrono::{DateTime, Utc};
use dsr_types::{Entity, Key, KeyId, PropertyMap, Value, ValueType};
use serde_json::{Map, Number, Value as Json};

use crate::error::{RepositoryError, RepositoryResult};
use crate::metadata::{EntityInformation, Record};

/// Split `record` into its identifier and its stored properties.
pub fn to_properties<T: Record>(
    record: &T,
    info: &EntityInformation<T>,
) -> RepositoryResult<(KeyId, PropertyMap)> {
    let kind = info.kind();
    let fields = match serde_json::to_value(record) {
        Ok(Json::Object(fields)) => fields,
        Ok(other) => {
            return Err(RepositoryError::marshalling(
                kind,
                None,
                format!("record serialized as {} instead of a struct", json_type(&other)),
            ))
        }
        Err(err) => {
            return Err(RepositoryError::Marshalling {
                kind: kind.to_string(),
                field: None,
                key: None,
                reason: err.to_string(),
                source: Some(err),
            })
        }
    };

    let mut id = None;
    let mut properties = PropertyMap::new();
    for (name, json) in fields {
        if name == info.id_field() {
            id = Some(key_id(kind, &name, json)?);
            continue;
        }
        let value = match info.property_type(&name) {
            Some(declared) => to_declared(json, &name, declared, false),
            None => to_value(json, &name, false),
        }
        .map_err(|(field, reason)| RepositoryError::marshalling(kind, Some(field), reason))?;
        properties.insert(name, value);
    }
    let id = id.ok_or_else(|| {
        RepositoryError::marshalling(
            kind,
            Some(info.id_field().to_string()),
            "identity field was not serialized",
        )
    })?;
    Ok((id, properties))
}

/// Marshal `record` into an entity stored under `key`.
pub fn to_entity<T: Record>(
    record: &T,
    key: Key,
    info: &EntityInformation<T>,
) -> RepositoryResult<Entity> {
    let (_, properties) = to_properties(record, info).map_err(|err| with_key(err, &key))?;
    Ok(Entity::with_properties(key, properties))
}

/// Unmarshal `entity` into a record, restoring the identity from its key.
pub fn to_record<T: Record>(entity: &Entity, info: &EntityInformation<T>) -> RepositoryResult<T> {
    let kind = info.kind();
    let mut fields = Map::new();
    for (name, value) in entity.properties() {
        let json = to_json(value).map_err(|reason| RepositoryError::Marshalling {
            kind: kind.to_string(),
            field: Some(name.clone()),
            key: Some(entity.key().clone()),
            reason,
            source: None,
        })?;
        fields.insert(name.clone(), json);
    }
    let id = match entity.key().id() {
        KeyId::Id(id) => Json::from(*id),
        KeyId::Name(name) => Json::from(name.as_str()),
    };
    fields.insert(info.id_field().to_string(), id);

    serde_json::from_value(Json::Object(fields)).map_err(|err| RepositoryError::Marshalling {
        kind: kind.to_string(),
        field: None,
        key: Some(entity.key().clone()),
        reason: err.to_string(),
        source: Some(err),
    })
}

fn with_key(err: RepositoryError, key: &Key) -> RepositoryError {
    match err {
        RepositoryError::Marshalling {
            kind,
            field,
            reason,
            source,
            ..
        } => RepositoryError::Marshalling {
            kind,
            field,
            key: Some(key.clone()),
            reason,
            source,
        },
        other => other,
    }
}

fn key_id(kind: &str, field: &str, json: Json) -> RepositoryResult<KeyId> {
    let fail = |reason: String| RepositoryError::marshalling(kind, Some(field.to_string()), reason);
    match json {
        Json::Number(n) => match n.as_i64() {
            Some(id) => Ok(KeyId::Id(id)),
            None if n.is_u64() => Err(fail(format!("identifier {n} exceeds the signed 64-bit range"))),
            None => Err(fail(format!("identifier {n} is not an integer"))),
        },
        Json::String(name) => Ok(KeyId::Name(name)),
        other => Err(fail(format!(
            "identifier must be an integer or a string, found {}",
            json_type(&other)
        ))),
    }
}

type Coercion<T> = Result<T, (String, String)>;

fn to_value(json: Json, path: &str, in_array: bool) -> Coercion<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if n.is_u64() {
                return Err((
                    path.to_string(),
                    format!("unsigned integer {n} exceeds the signed 64-bit range"),
                ));
            } else {
                match n.as_f64() {
                    Some(d) => Value::Double(d),
                    None => return Err((path.to_string(), format!("unrepresentable number {n}"))),
                }
            }
        }
        Json::String(s) => Value::String(s),
        Json::Array(items) => {
            if in_array {
                return Err((
                    path.to_string(),
                    "arrays cannot directly contain arrays".to_string(),
                ));
            }
            let values = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| to_value(item, &format!("{path}[{i}]"), true))
                .collect::<Coercion<Vec<_>>>()?;
            Value::Array(values)
        }
        Json::Object(fields) => {
            let mut properties = PropertyMap::new();
            for (name, item) in fields {
                let value = to_value(item, &format!("{path}.{name}"), false)?;
                properties.insert(name, value);
            }
            Value::Entity(properties)
        }
    })
}

/// Coerce a property to its declared type. Sequences are coerced element by
/// element, except that a flat sequence declared as a blob is the blob.
fn to_declared(json: Json, path: &str, declared: ValueType, in_array: bool) -> Coercion<Value> {
    match (declared, json) {
        (_, Json::Null) => Ok(Value::Null),
        (ValueType::Timestamp, Json::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|err| (path.to_string(), format!("invalid timestamp {s:?}: {err}"))),
        (ValueType::Blob, Json::Array(items)) if items.iter().all(Json::is_number) => {
            to_bytes(items, path).map(Value::Blob)
        }
        (ValueType::Key, json @ Json::Object(_)) => serde_json::from_value::<Key>(json)
            .map(Value::Key)
            .map_err(|err| (path.to_string(), format!("invalid key: {err}"))),
        (ValueType::Array, json @ Json::Array(_)) => to_value(json, path, in_array),
        (_, Json::Array(items)) => {
            if in_array {
                return Err((
                    path.to_string(),
                    "arrays cannot directly contain arrays".to_string(),
                ));
            }
            let values = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| to_declared(item, &format!("{path}[{i}]"), declared, true))
                .collect::<Coercion<Vec<_>>>()?;
            Ok(Value::Array(values))
        }
        (declared, json) => match (declared, to_value(json, path, in_array)?) {
            (ValueType::Double, Value::Integer(i)) => Ok(Value::Double(i as f64)),
            (declared, value) if value.value_type() == declared => Ok(value),
            (declared, value) => Err((
                path.to_string(),
                format!("declared as {declared}, serialized as {}", value.value_type()),
            )),
        },
    }
}

fn to_bytes(items: Vec<Json>, path: &str) -> Coercion<Vec<u8>> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| (format!("{path}[{i}]"), format!("{item} is not a byte")))
        })
        .collect()
}

fn to_json(value: &Value) -> Result<Json, String> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Double(d) => match Number::from_f64(*d) {
            Some(n) => Json::Number(n),
            None => return Err(format!("non-finite double {d}")),
        },
        Value::String(s) => Json::String(s.clone()),
        Value::Blob(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::Timestamp(ts) => Json::String(ts.to_rfc3339()),
        Value::Key(key) => serde_json::to_value(key).map_err(|err| err.to_string())?,
        Value::Entity(properties) => {
            let mut fields = Map::new();
            for (name, item) in properties {
                fields.insert(name.clone(), to_json(item)?);
            }
            Json::Object(fields)
        }
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect::<Result<_, _>>()?),
    })
}

fn json_type(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "a sequence",
        Json::Object(_) => "a map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use dsr_types::KeyFactory;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Address {
        city: String,
        zip: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        id: i64,
        name: String,
        age: u32,
        score: f64,
        active: bool,
        tags: Vec<String>,
        address: Address,
        nickname: Option<String>,
        born: DateTime<Utc>,
        attributes: BTreeMap<String, i64>,
    }

    impl Record for Person {
        const ID_FIELD: &'static str = "id";
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tag {
        name: String,
        weight: u64,
        grid: Vec<Vec<i32>>,
    }

    impl Record for Tag {
        const ID_FIELD: &'static str = "name";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Event {
        id: i64,
        at: DateTime<Utc>,
        history: Vec<DateTime<Utc>>,
        payload: Vec<u8>,
        parent: Option<Key>,
        weight: f64,
        label: String,
    }

    impl Record for Event {
        const ID_FIELD: &'static str = "id";
        const PROPERTY_TYPES: &'static [(&'static str, ValueType)] = &[
            ("at", ValueType::Timestamp),
            ("history", ValueType::Timestamp),
            ("payload", ValueType::Blob),
            ("parent", ValueType::Key),
            ("weight", ValueType::Double),
        ];
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Reading {
        id: i64,
        taken: String,
    }

    impl Record for Reading {
        const ID_FIELD: &'static str = "id";
        const PROPERTY_TYPES: &'static [(&'static str, ValueType)] =
            &[("taken", ValueType::Timestamp)];
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Counter {
        id: i64,
        count: i64,
    }

    impl Record for Counter {
        const ID_FIELD: &'static str = "id";
        const PROPERTY_TYPES: &'static [(&'static str, ValueType)] =
            &[("count", ValueType::String)];
    }

    fn event(id: i64) -> Event {
        Event {
            id,
            at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
                + chrono::Duration::milliseconds(250),
            history: vec![Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()],
            payload: vec![0, 7, 255],
            parent: Some(key(3)),
            weight: 2.0,
            label: "launch".into(),
        }
    }

    fn person(id: i64) -> Person {
        Person {
            id,
            name: "Ada".into(),
            age: 36,
            score: 9.5,
            active: true,
            tags: vec!["math".into(), "poetry".into()],
            address: Address {
                city: "London".into(),
                zip: None,
            },
            nickname: None,
            born: Utc.with_ymd_and_hms(1815, 12, 10, 0, 0, 0).unwrap(),
            attributes: BTreeMap::from([("height".to_string(), 165)]),
        }
    }

    fn key(id: impl Into<KeyId>) -> Key {
        KeyFactory::new("p").set_kind("Person").new_key(id).unwrap()
    }

    #[test]
    fn marshal_maps_field_types() {
        let info = EntityInformation::<Person>::new().unwrap();
        let (id, props) = to_properties(&person(1), &info).unwrap();
        assert_eq!(id, KeyId::Id(1));
        assert!(!props.contains_key("id"));
        assert_eq!(props["name"], Value::String("Ada".into()));
        assert_eq!(props["age"], Value::Integer(36));
        assert_eq!(props["score"], Value::Double(9.5));
        assert_eq!(props["active"], Value::Boolean(true));
        assert_eq!(props["nickname"], Value::Null);
        assert_eq!(
            props["tags"],
            Value::Array(vec!["math".into(), "poetry".into()])
        );
        let address = props["address"].as_entity().unwrap();
        assert_eq!(address["city"], Value::String("London".into()));
        assert_eq!(address["zip"], Value::Null);
    }

    #[test]
    fn round_trip_restores_identity_from_key() {
        let info = EntityInformation::<Person>::new().unwrap();
        let original = person(42);
        let entity = to_entity(&original, key(42), &info).unwrap();
        assert!(!entity.contains("id"));
        let back: Person = to_record(&entity, &info).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn unsigned_overflow_names_the_field() {
        let info = EntityInformation::<Tag>::new().unwrap();
        let tag = Tag {
            name: "big".into(),
            weight: u64::MAX,
            grid: Vec::new(),
        };
        let err = to_properties(&tag, &info).unwrap_err();
        match err {
            RepositoryError::Marshalling { field, .. } => assert_eq!(field.as_deref(), Some("weight")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nested_arrays_are_rejected() {
        let info = EntityInformation::<Tag>::new().unwrap();
        let tag = Tag {
            name: "grid".into(),
            weight: 1,
            grid: vec![vec![1, 2], vec![3]],
        };
        let err = to_properties(&tag, &info).unwrap_err();
        match err {
            RepositoryError::Marshalling { field, .. } => {
                assert_eq!(field.as_deref(), Some("grid[0]"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn string_identity_becomes_name() {
        let info = EntityInformation::<Tag>::new().unwrap();
        let tag = Tag {
            name: "rust".into(),
            weight: 3,
            grid: Vec::new(),
        };
        let (id, props) = to_properties(&tag, &info).unwrap();
        assert_eq!(id, KeyId::Name("rust".into()));
        assert!(!props.contains_key("name"));
    }

    #[test]
    fn type_mismatch_on_read_carries_key() {
        let info = EntityInformation::<Person>::new().unwrap();
        let mut entity = to_entity(&person(5), key(5), &info).unwrap();
        entity.set("age", "thirty-six");
        let err = to_record::<Person>(&entity, &info).unwrap_err();
        match err {
            RepositoryError::Marshalling { key: Some(k), source, .. } => {
                assert_eq!(k, key(5));
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_property_fails_to_unmarshal() {
        let info = EntityInformation::<Person>::new().unwrap();
        let mut entity = to_entity(&person(5), key(5), &info).unwrap();
        entity.remove("name");
        assert!(to_record::<Person>(&entity, &info).is_err());
    }

    #[test]
    fn name_key_into_integer_identity_fails() {
        let info = EntityInformation::<Person>::new().unwrap();
        let (_, props) = to_properties(&person(5), &info).unwrap();
        let entity = Entity::with_properties(key("five"), props);
        assert!(to_record::<Person>(&entity, &info).is_err());
    }

    #[test]
    fn blob_and_key_values_unmarshal() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Attachment {
            id: String,
            data: Vec<u8>,
            owner: Key,
        }
        impl Record for Attachment {
            const ID_FIELD: &'static str = "id";
        }

        let info = EntityInformation::<Attachment>::new().unwrap();
        let mut props = PropertyMap::new();
        props.insert("data".into(), Value::Blob(vec![1, 2, 255]));
        props.insert("owner".into(), Value::Key(key(9)));
        let entity = Entity::with_properties(key("a"), props);
        let record: Attachment = to_record(&entity, &info).unwrap();
        assert_eq!(record.id, "a");
        assert_eq!(record.data, vec![1, 2, 255]);
        assert_eq!(record.owner, key(9));
    }

    #[test]
    fn declared_types_are_stored_natively() {
        let info = EntityInformation::<Event>::new().unwrap();
        let original = event(1);
        let (_, props) = to_properties(&original, &info).unwrap();
        assert_eq!(props["at"], Value::Timestamp(original.at));
        assert_eq!(
            props["history"],
            Value::Array(vec![Value::Timestamp(original.history[0])])
        );
        assert_eq!(props["payload"], Value::Blob(vec![0, 7, 255]));
        assert_eq!(props["parent"], Value::Key(key(3)));
        assert_eq!(props["weight"], Value::Double(2.0));
        assert_eq!(props["label"], Value::String("launch".into()));

        let entity = to_entity(&original, key(1), &info).unwrap();
        let back: Event = to_record(&entity, &info).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn declared_types_accept_null_and_empty() {
        let info = EntityInformation::<Event>::new().unwrap();
        let original = Event {
            history: Vec::new(),
            payload: Vec::new(),
            parent: None,
            ..event(2)
        };
        let (_, props) = to_properties(&original, &info).unwrap();
        assert_eq!(props["history"], Value::Array(Vec::new()));
        assert_eq!(props["payload"], Value::Blob(Vec::new()));
        assert_eq!(props["parent"], Value::Null);
        let back: Event = to_record(&to_entity(&original, key(2), &info).unwrap(), &info).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn declared_type_mismatch_names_the_field() {
        let info = EntityInformation::<Reading>::new().unwrap();
        let bad_timestamp = Reading {
            id: 1,
            taken: "yesterday".into(),
        };
        match to_properties(&bad_timestamp, &info).unwrap_err() {
            RepositoryError::Marshalling { field, .. } => assert_eq!(field.as_deref(), Some("taken")),
            other => panic!("unexpected error: {other}"),
        }
        let good = Reading {
            id: 2,
            taken: "2024-01-01T00:00:00Z".into(),
        };
        let (_, props) = to_properties(&good, &info).unwrap();
        assert_eq!(
            props["taken"],
            Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );

        let info = EntityInformation::<Counter>::new().unwrap();
        let bad_count = Counter { id: 1, count: 1 };
        match to_properties(&bad_count, &info).unwrap_err() {
            RepositoryError::Marshalling { field, reason, .. } => {
                assert_eq!(field.as_deref(), Some("count"));
                assert!(reason.contains("declared as string"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    proptest! {
        #[test]
        fn marshal_round_trip(
            id in any::<i64>(),
            name in ".{0,24}",
            age in any::<u32>(),
            score in -1.0e9f64..1.0e9,
            active in any::<bool>(),
            tags in prop::collection::vec("[a-z]{1,8}", 0..5),
            nickname in prop::option::of("[a-z]{1,8}"),
        ) {
            let info = EntityInformation::<Person>::new().unwrap();
            let original = Person { id, name, age, score, active, tags, nickname, ..person(0) };
            let entity = to_entity(&original, key(id), &info).unwrap();
            let back: Person = to_record(&entity, &info).unwrap();
            prop_assert_eq!(back, original);
        }
    }
}
