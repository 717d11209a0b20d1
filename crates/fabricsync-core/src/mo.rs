//! Managed objects - the Fabric's wire shape
//!
//! Events and push payloads are MOs serialized as
//! `{"<class>": {"attributes": {...}, "children": [...]}}`, wrapped in an
//! `{"imdata": [...]}` envelope on the event stream. The core reads `dn`,
//! `status`, `severity`, `rn`, `name` and `code`; everything else is opaque.

use crate::dn::Dn;
use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ATTR_DN: &str = "dn";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_SEVERITY: &str = "severity";
pub const ATTR_RN: &str = "rn";
pub const ATTR_NAME: &str = "name";
pub const ATTR_CODE: &str = "code";

pub const STATUS_CREATED: &str = "created";
pub const STATUS_MODIFIED: &str = "modified";
pub const STATUS_DELETED: &str = "deleted";
pub const SEVERITY_CLEARED: &str = "cleared";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManagedObject {
    pub class: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<ManagedObject>,
}

/// The `imdata` envelope carried by subscription payloads.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventBatch {
    pub imdata: Vec<ManagedObject>,
}

impl ManagedObject {
    pub fn new(class: impl Into<String>, dn: &Dn) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_DN.to_string(), dn.to_string());
        Self {
            class: class.into(),
            attributes,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn dn(&self) -> Option<Dn> {
        self.attr(ATTR_DN).map(Dn::from)
    }

    pub fn status(&self) -> Option<&str> {
        self.attr(ATTR_STATUS)
    }

    pub fn severity(&self) -> Option<&str> {
        self.attr(ATTR_SEVERITY)
    }

    /// Deleted status, or a cleared severity for fault objects.
    pub fn is_deleting(&self) -> bool {
        self.status()
            .or_else(|| self.severity())
            .map(|s| s == STATUS_DELETED || s == SEVERITY_CLEARED)
            .unwrap_or(false)
    }

    /// Fold a later event for the same (class, dn) into this one. Later
    /// attribute values win; a later non-empty child list replaces ours.
    pub fn merge_from(&mut self, later: ManagedObject) {
        self.attributes.extend(later.attributes);
        if !later.children.is_empty() {
            self.children = later.children;
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct MoBody {
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<ManagedObject>,
}

impl Serialize for ManagedObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            &self.class,
            &MoBody {
                attributes: self.attributes.clone(),
                children: self.children.clone(),
            },
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ManagedObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, MoBody>::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(D::Error::custom(format!(
                "managed object must have exactly one class key, got {}",
                map.len()
            )));
        }
        match map.into_iter().next() {
            Some((class, body)) => Ok(Self {
                class,
                attributes: body.attributes,
                children: body.children,
            }),
            None => Err(D::Error::custom("managed object must not be empty")),
        }
    }
}
