//! Domain-type metadata: kind name, identity field, and declared properties.
//!
//! Field names are discovered from the type's `Deserialize` impl, which hands
//! its field list to `deserialize_struct`, unless the type lists them itself
//! in [`Record::FIELDS`]. Discovery runs once per type and the result is
//! cached for the life of the process.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, RwLock};

use dsr_types::{KeyId, ValueType};
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Serialize;
use tracing::info;

use crate::codec;
use crate::error::{RepositoryError, RepositoryResult};

/// A domain type a repository can persist.
///
/// The type must serialize as a struct with named fields. One of those
/// fields, named by [`Record::ID_FIELD`], holds the identifier: an integer
/// becomes an integer-id key, a string becomes a name key.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Event {
///     id: i64,
///     at: DateTime<Utc>,
///     payload: Vec<u8>,
/// }
///
/// impl Record for Event {
///     const ID_FIELD: &'static str = "id";
///     const PROPERTY_TYPES: &'static [(&'static str, ValueType)] =
///         &[("at", ValueType::Timestamp), ("payload", ValueType::Blob)];
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + 'static {
    /// Name of the field that holds the identifier, as serialized.
    const ID_FIELD: &'static str;

    /// Serialized field names, identity included, in declaration order.
    ///
    /// Leave empty to discover them from the `Deserialize` impl. Types whose
    /// impl does not describe a plain struct, such as those using
    /// `#[serde(flatten)]`, must list them here.
    const FIELDS: &'static [&'static str] = &[];

    /// Stored types of top-level properties, by serialized name.
    ///
    /// Timestamps serialize as RFC 3339 strings and byte buffers as integer
    /// sequences, so neither can be recognised from the serde data alone.
    /// A property declared [`ValueType::Timestamp`], [`ValueType::Blob`] or
    /// [`ValueType::Key`] is stored as that type; any declared type must
    /// match what the field serializes to, and query arguments bound to the
    /// property must share its rank. For sequences the declared type applies
    /// to the elements. Undeclared properties keep their serde shape.
    const PROPERTY_TYPES: &'static [(&'static str, ValueType)] = &[];

    /// Kind name under which entities of this type are stored.
    ///
    /// Defaults to the unqualified type name without generic arguments.
    fn kind() -> &'static str {
        simple_type_name::<Self>()
    }
}

/// Unqualified name of `T`: `app::model::Person<u8>` becomes `Person`.
pub fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Metadata shared by every [`EntityInformation`] of one type.
#[derive(Debug)]
pub struct EntityMetadata {
    kind: &'static str,
    id_field: &'static str,
    fields: &'static [&'static str],
    properties: Vec<String>,
    property_types: &'static [(&'static str, ValueType)],
}

impl EntityMetadata {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn id_field(&self) -> &'static str {
        self.id_field
    }

    /// Every declared field, identity included.
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Declared fields other than the identity, in declaration order.
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Declared stored type of `property`, if any.
    pub fn property_type(&self, property: &str) -> Option<ValueType> {
        self.property_types
            .iter()
            .find(|(name, _)| *name == property)
            .map(|(_, value_type)| *value_type)
    }

    pub fn property_types(&self) -> &'static [(&'static str, ValueType)] {
        self.property_types
    }
}

/// Typed view of a domain type's metadata.
pub struct EntityInformation<T> {
    metadata: Arc<EntityMetadata>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityInformation<T> {
    fn clone(&self) -> Self {
        Self {
            metadata: Arc::clone(&self.metadata),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for EntityInformation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInformation")
            .field("kind", &self.metadata.kind)
            .field("id_field", &self.metadata.id_field)
            .field("fields", &self.metadata.fields)
            .finish()
    }
}

type Registry = RwLock<HashMap<TypeId, Arc<EntityMetadata>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

impl<T: Record> EntityInformation<T> {
    /// Metadata for `T`, discovered on first use.
    ///
    /// Fails if `T` does not deserialize as a struct and lists no
    /// [`Record::FIELDS`], declares no field named [`Record::ID_FIELD`], or
    /// declares a property type for a name that is not a stored property.
    pub fn new() -> RepositoryResult<Self> {
        let type_id = TypeId::of::<T>();
        if let Some(metadata) = registry().read().expect("lock poisoned").get(&type_id) {
            return Ok(Self::from_metadata(Arc::clone(metadata)));
        }

        let discovered = Arc::new(discover::<T>()?);
        let metadata = Arc::clone(
            registry()
                .write()
                .expect("lock poisoned")
                .entry(type_id)
                .or_insert(discovered),
        );
        Ok(Self::from_metadata(metadata))
    }

    /// Identifier held by `record`.
    pub fn id_of(&self, record: &T) -> RepositoryResult<KeyId> {
        codec::to_properties(record, self).map(|(id, _)| id)
    }
}

impl<T> EntityInformation<T> {
    fn from_metadata(metadata: Arc<EntityMetadata>) -> Self {
        Self {
            metadata,
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.metadata.kind
    }

    pub fn id_field(&self) -> &'static str {
        self.metadata.id_field
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.metadata.fields
    }

    pub fn properties(&self) -> &[String] {
        &self.metadata.properties
    }

    pub fn property_type(&self, property: &str) -> Option<ValueType> {
        self.metadata.property_type(property)
    }

    pub fn property_types(&self) -> &'static [(&'static str, ValueType)] {
        self.metadata.property_types
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }
}

fn discover<T: Record>() -> RepositoryResult<EntityMetadata> {
    let type_name = type_name::<T>();
    let fields = if T::FIELDS.is_empty() {
        struct_fields::<T>().map_err(|reason| RepositoryError::NotAStruct {
            type_name,
            reason,
        })?
    } else {
        T::FIELDS
    };
    if !fields.contains(&T::ID_FIELD) {
        return Err(RepositoryError::MissingIdentity {
            type_name,
            id_field: T::ID_FIELD,
            fields: fields.to_vec(),
        });
    }
    let properties: Vec<String> = fields
        .iter()
        .filter(|f| **f != T::ID_FIELD)
        .map(|f| f.to_string())
        .collect();
    if let Some((field, _)) = T::PROPERTY_TYPES
        .iter()
        .find(|(name, _)| !properties.iter().any(|p| p.as_str() == *name))
    {
        return Err(RepositoryError::UnknownProperty {
            type_name,
            field: *field,
        });
    }
    info!(
        kind = T::kind(),
        id_field = T::ID_FIELD,
        fields = fields.len(),
        typed = T::PROPERTY_TYPES.len(),
        "discovered entity metadata"
    );
    Ok(EntityMetadata {
        kind: T::kind(),
        id_field: T::ID_FIELD,
        fields,
        properties,
        property_types: T::PROPERTY_TYPES,
    })
}

/// Field names `T` asks for when deserialized as a struct.
fn struct_fields<T: DeserializeOwned>() -> Result<&'static [&'static str], String> {
    let mut fields = None;
    // The capture always fails once it has seen (or failed to see) a struct.
    let _ = T::deserialize(FieldCapture {
        fields: &mut fields,
    });
    fields.ok_or_else(|| {
        "type does not deserialize as a plain struct with named fields; list them in `Record::FIELDS`"
            .to_string()
    })
}

struct FieldCapture<'a> {
    fields: &'a mut Option<&'static [&'static str]>,
}

#[derive(Debug)]
struct CaptureDone;

impl fmt::Display for CaptureDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("field capture finished")
    }
}

impl std::error::Error for CaptureDone {}

impl de::Error for CaptureDone {
    fn custom<M: fmt::Display>(_msg: M) -> Self {
        CaptureDone
    }
}

impl<'de> Deserializer<'de> for FieldCapture<'_> {
    type Error = CaptureDone;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
        Err(CaptureDone)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        *self.fields = Some(fields);
        Err(CaptureDone)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}
