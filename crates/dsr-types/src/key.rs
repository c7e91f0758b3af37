use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of a single key segment.
///
/// The store distinguishes numeric ids from string names. Numeric ids sort
/// before names, which is also the order the derived `Ord` produces.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// Integer-id form.
    Id(i64),
    /// String-name form.
    Name(String),
}

impl KeyId {
    /// Returns `true` for the integer-id form.
    pub fn is_id(&self) -> bool {
        matches!(self, KeyId::Id(_))
    }

    /// Returns `true` for the string-name form.
    pub fn is_name(&self) -> bool {
        matches!(self, KeyId::Name(_))
    }

    /// The numeric id, if this is the integer-id form.
    pub fn as_id(&self) -> Option<i64> {
        match self {
            KeyId::Id(id) => Some(*id),
            KeyId::Name(_) => None,
        }
    }

    /// The string name, if this is the string-name form.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            KeyId::Id(_) => None,
            KeyId::Name(name) => Some(name),
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{id}"),
            KeyId::Name(name) => write!(f, "{name:?}"),
        }
    }
}

macro_rules! key_id_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for KeyId {
                fn from(id: $t) -> Self {
                    KeyId::Id(i64::from(id))
                }
            }
        )*
    };
}

key_id_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl TryFrom<u64> for KeyId {
    type Error = TypeError;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        i64::try_from(id)
            .map(KeyId::Id)
            .map_err(|_| TypeError::IdOutOfRange(id.to_string()))
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        KeyId::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        KeyId::Name(name)
    }
}

impl From<&String> for KeyId {
    fn from(name: &String) -> Self {
        KeyId::Name(name.clone())
    }
}

/// One `(kind, identifier)` segment of a hierarchical key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    kind: String,
    id: KeyId,
}

impl PathElement {
    pub fn new(kind: impl Into<String>, id: impl Into<KeyId>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn has_id(&self) -> bool {
        self.id.is_id()
    }

    pub fn has_name(&self) -> bool {
        self.id.is_name()
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// A fully-qualified store key.
///
/// A key is the ordered ancestor path followed by one terminal
/// `(kind, identifier)` segment, qualified by project and namespace. Two keys
/// with the same terminal segment under different ancestors are different
/// keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    project_id: String,
    namespace: Option<String>,
    ancestors: Vec<PathElement>,
    kind: String,
    id: KeyId,
}

impl Key {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Parent path, oldest ancestor first.
    pub fn ancestors(&self) -> &[PathElement] {
        &self.ancestors
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// The terminal segment of this key.
    pub fn leaf(&self) -> PathElement {
        PathElement::new(self.kind.clone(), self.id.clone())
    }

    /// Full path: ancestors followed by the terminal segment.
    pub fn path(&self) -> Vec<PathElement> {
        let mut path = self.ancestors.clone();
        path.push(self.leaf());
        path
    }

    /// The key of the immediate parent, if this key has ancestors.
    pub fn parent(&self) -> Option<Key> {
        let (last, init) = self.ancestors.split_last()?;
        Some(Key {
            project_id: self.project_id.clone(),
            namespace: self.namespace.clone(),
            ancestors: init.to_vec(),
            kind: last.kind.clone(),
            id: last.id.clone(),
        })
    }

    /// Returns `true` if `ancestor` is this key or lies on its parent path.
    ///
    /// Keys from a different project or namespace never match.
    pub fn is_descendant_of(&self, ancestor: &Key) -> bool {
        if self.project_id != ancestor.project_id || self.namespace != ancestor.namespace {
            return false;
        }
        let path = self.path();
        let prefix = ancestor.path();
        path.len() >= prefix.len() && path[..prefix.len()] == prefix[..]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ancestor in &self.ancestors {
            write!(f, "{ancestor}/")?;
        }
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// Builds keys for one project/namespace.
///
/// A factory is configured with a kind and an ancestor path and then stamps
/// out fresh keys; nothing is cached between calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFactory {
    project_id: String,
    namespace: Option<String>,
    kind: Option<String>,
    ancestors: Vec<PathElement>,
}

impl KeyFactory {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            namespace: None,
            kind: None,
            ancestors: Vec::new(),
        }
    }

    pub fn set_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn set_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn add_ancestor(mut self, ancestor: PathElement) -> Self {
        self.ancestors.push(ancestor);
        self
    }

    /// Append ancestors in iteration order (oldest first).
    pub fn add_ancestors<I>(mut self, ancestors: I) -> Self
    where
        I: IntoIterator<Item = PathElement>,
    {
        self.ancestors.extend(ancestors);
        self
    }

    /// Build a key with the configured kind, ancestors and the given id.
    pub fn new_key(&self, id: impl Into<KeyId>) -> Result<Key, TypeError> {
        let kind = match self.kind.as_deref() {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => return Err(TypeError::EmptyKind),
        };
        let id = id.into();
        if let KeyId::Name(name) = &id {
            if name.is_empty() {
                return Err(TypeError::EmptyName);
            }
        }
        Ok(Key {
            project_id: self.project_id.clone(),
            namespace: self.namespace.clone(),
            ancestors: self.ancestors.clone(),
            kind,
            id,
        })
    }
}

/// Derive the key of a `kind` entity identified by `id` under `ancestors`.
///
/// Ancestors are applied oldest first as the parent path and the terminal
/// `(kind, id)` segment is appended. Integer identifiers use the integer-id
/// form, everything else the string-name form.
pub fn derive_key(
    factory: KeyFactory,
    kind: &str,
    id: impl Into<KeyId>,
    ancestors: &[PathElement],
) -> Result<Key, TypeError> {
    factory
        .set_kind(kind)
        .add_ancestors(ancestors.iter().cloned())
        .new_key(id)
}
