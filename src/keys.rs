//! Key grammar and addressing.
//!
//! ```text
//! collection ::= [a-z](_?[a-z]+)*
//! id         ::= [1-9][0-9]*
//! field      ::= [a-z][a-z0-9_]*
//! Fqid       ::= collection/id
//! Fqfield    ::= collection/id/field
//! Cf         ::= collection/field
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DatastoreError, Result};
use crate::types::Id;

pub const KEY_SEPARATOR: char = '/';

/// Field names starting with this prefix are reserved for the engine.
pub const RESERVED_FIELD_PREFIX: &str = "meta_";
pub const META_DELETED: &str = "meta_deleted";
pub const META_POSITION: &str = "meta_position";

pub const COLLECTION_MAX_LEN: usize = 32;
pub const FQID_MAX_LEN: usize = 48;
pub const COLLECTIONFIELD_MAX_LEN: usize = 239;

fn collection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z](?:_?[a-z]+)*$").expect("static regex"))
}

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[1-9][0-9]*$").expect("static regex"))
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"))
}

pub fn is_valid_collection(collection: &str) -> bool {
    collection.len() <= COLLECTION_MAX_LEN && collection_re().is_match(collection)
}

pub fn is_valid_field(field: &str) -> bool {
    field_re().is_match(field)
}

pub fn is_reserved_field(field: &str) -> bool {
    field.starts_with(RESERVED_FIELD_PREFIX)
}

pub fn assert_collection(collection: &str) -> Result<()> {
    if collection.len() > COLLECTION_MAX_LEN {
        return Err(DatastoreError::InvalidFormat(format!(
            "Collection \"{collection}\" is longer than {COLLECTION_MAX_LEN} characters"
        )));
    }
    if !collection_re().is_match(collection) {
        return Err(DatastoreError::InvalidFormat(format!(
            "Invalid collection: \"{collection}\""
        )));
    }
    Ok(())
}

pub fn assert_field(field: &str) -> Result<()> {
    if !is_valid_field(field) {
        return Err(DatastoreError::InvalidFormat(format!("Invalid field: \"{field}\"")));
    }
    Ok(())
}

/// Reject field names a caller is not allowed to write into `collection`.
pub fn assert_writable_field(collection: &str, field: &str) -> Result<()> {
    CollectionField::new(collection, field)?;
    if is_reserved_field(field) {
        return Err(DatastoreError::InvalidFormat(format!(
            "Field \"{field}\" uses the reserved prefix \"{RESERVED_FIELD_PREFIX}\""
        )));
    }
    Ok(())
}

pub fn parse_id(raw: &str) -> Result<Id> {
    if !id_re().is_match(raw) {
        return Err(DatastoreError::InvalidFormat(format!("Invalid id: \"{raw}\"")));
    }
    raw.parse::<Id>()
        .map_err(|_| DatastoreError::InvalidFormat(format!("Id out of range: \"{raw}\"")))
}

pub fn assert_id(id: Id) -> Result<()> {
    if id <= 0 {
        return Err(DatastoreError::InvalidFormat(format!("Id must be positive, got {id}")));
    }
    Ok(())
}

/// Lowest and highest (exclusive) fqid strings of a collection, for
/// index-friendly prefix scans. `'0'` is the character following `'/'`.
pub fn collection_fqid_range(collection: &str) -> (String, String) {
    (format!("{collection}/"), format!("{collection}0"))
}

// ============================================================================
// Fqid
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqid {
    collection: String,
    id: Id,
}

impl Fqid {
    pub fn new(collection: impl Into<String>, id: Id) -> Result<Self> {
        let collection = collection.into();
        assert_collection(&collection)?;
        assert_id(id)?;
        let fqid = Self { collection, id };
        let len = fqid.to_string().len();
        if len > FQID_MAX_LEN {
            return Err(DatastoreError::InvalidFormat(format!(
                "Fqid \"{fqid}\" is longer than {FQID_MAX_LEN} characters"
            )));
        }
        Ok(fqid)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn fqfield(&self, field: impl Into<String>) -> Fqfield {
        Fqfield {
            fqid: self.clone(),
            field: field.into(),
        }
    }

    pub fn collectionfield(&self, field: &str) -> CollectionField {
        CollectionField {
            collection: self.collection.clone(),
            field: field.to_string(),
        }
    }
}

impl fmt::Display for Fqid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.collection, KEY_SEPARATOR, self.id)
    }
}

impl FromStr for Fqid {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() > FQID_MAX_LEN {
            return Err(DatastoreError::InvalidFormat(format!(
                "Fqid \"{s}\" is longer than {FQID_MAX_LEN} characters"
            )));
        }
        let mut parts = s.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(collection), Some(id), None) => Fqid::new(collection, parse_id(id)?),
            _ => Err(DatastoreError::InvalidFormat(format!("Invalid fqid: \"{s}\""))),
        }
    }
}

// ============================================================================
// Fqfield
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqfield {
    fqid: Fqid,
    field: String,
}

impl Fqfield {
    pub fn new(fqid: Fqid, field: impl Into<String>) -> Result<Self> {
        let field = field.into();
        assert_field(&field)?;
        Ok(Self { fqid, field })
    }

    pub fn fqid(&self) -> &Fqid {
        &self.fqid
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn collectionfield(&self) -> CollectionField {
        self.fqid.collectionfield(&self.field)
    }
}

impl fmt::Display for Fqfield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.fqid, KEY_SEPARATOR, self.field)
    }
}

impl FromStr for Fqfield {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(collection), Some(id), Some(field), None) => {
                Fqfield::new(Fqid::new(collection, parse_id(id)?)?, field)
            }
            _ => Err(DatastoreError::InvalidFormat(format!("Invalid fqfield: \"{s}\""))),
        }
    }
}

// ============================================================================
// CollectionField
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionField {
    collection: String,
    field: String,
}

impl CollectionField {
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let field = field.into();
        assert_collection(&collection)?;
        assert_field(&field)?;
        let cf = Self { collection, field };
        if cf.to_string().len() > COLLECTIONFIELD_MAX_LEN {
            return Err(DatastoreError::InvalidFormat(format!(
                "Collectionfield \"{cf}\" is longer than {COLLECTIONFIELD_MAX_LEN} characters"
            )));
        }
        Ok(cf)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl fmt::Display for CollectionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.collection, KEY_SEPARATOR, self.field)
    }
}

impl FromStr for CollectionField {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(collection), Some(field), None) => CollectionField::new(collection, field),
            _ => Err(DatastoreError::InvalidFormat(format!(
                "Invalid collectionfield: \"{s}\""
            ))),
        }
    }
}

// ============================================================================
// LockKey
// ============================================================================

/// Key of a `locked_fields` entry: a whole model, one field of a model, or a
/// field across a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Fqid(Fqid),
    Fqfield(Fqfield),
    CollectionField(CollectionField),
}

impl FromStr for LockKey {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split(KEY_SEPARATOR).count() {
            3 => Ok(LockKey::Fqfield(s.parse()?)),
            2 => {
                let second = s.split(KEY_SEPARATOR).nth(1).unwrap_or_default();
                if second.starts_with(|c: char| c.is_ascii_digit()) {
                    Ok(LockKey::Fqid(s.parse()?))
                } else {
                    Ok(LockKey::CollectionField(s.parse()?))
                }
            }
            _ => Err(DatastoreError::InvalidFormat(format!("Invalid lock key: \"{s}\""))),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Fqid(k) => fmt::Display::fmt(k, f),
            LockKey::Fqfield(k) => fmt::Display::fmt(k, f),
            LockKey::CollectionField(k) => fmt::Display::fmt(k, f),
        }
    }
}

// ============================================================================
// Serde as strings
// ============================================================================

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Fqid);
string_serde!(Fqfield);
string_serde!(CollectionField);

// ============================================================================
// Tests
// ============================================================================
