//! Worker fleet definitions

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::validation::validate_identifier;
use crate::{Error, Result, FLEET_TAG_KEY};

/// Operating system family of a fleet's workers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Linux workers
    #[default]
    Linux,
    /// Windows workers
    Windows,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Windows => write!(f, "windows"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One elastic worker fleet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetDefinition {
    /// Fleet name; defaults to the map key it was declared under
    #[serde(default)]
    pub name: String,

    /// Worker operating system
    #[serde(default)]
    pub os_family: OsFamily,

    /// Deadline groups the workers join (job routing)
    #[serde(default)]
    pub groups: Vec<String>,

    /// Deadline pools the workers join (job routing)
    #[serde(default)]
    pub pools: Vec<String>,

    /// Instance class names, e.g. "c5.4xlarge"
    #[serde(default)]
    pub instance_types: Vec<String>,

    /// Region to machine image id
    #[serde(default)]
    pub worker_images: BTreeMap<String, String>,

    /// Upper bound on fleet size
    pub max_capacity: u32,

    /// Tags applied to every fleet resource
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Commands appended to the worker boot script
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_data: Vec<String>,

    /// Whether the resource tracker follows this fleet's instances
    #[serde(default = "default_true")]
    pub track_with_resource_tracker: bool,
}

impl FleetDefinition {
    /// Validate the definition's own fields
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();

        validate_identifier(name)
            .map_err(|e| Error::validation_for_field(name, "fleets.name", e))?;

        if self.instance_types.is_empty() {
            return Err(Error::validation_for_field(
                name,
                format!("fleets.{name}.instanceTypes"),
                "fleet must list at least one instance type",
            ));
        }

        if self.max_capacity == 0 {
            return Err(Error::validation_for_field(
                name,
                format!("fleets.{name}.maxCapacity"),
                "maxCapacity must be a positive integer",
            ));
        }

        for group in self.groups.iter().chain(self.pools.iter()) {
            validate_identifier(group).map_err(|e| {
                Error::validation_for_field(name, format!("fleets.{name}.groups"), e)
            })?;
        }

        for key in self.tags.keys() {
            if key.is_empty() {
                return Err(Error::validation_for(name, "tag keys cannot be empty"));
            }
            if key.starts_with("aws:") {
                return Err(Error::validation_for(
                    name,
                    format!("tag key '{key}' uses the reserved aws: prefix"),
                ));
            }
            if key == FLEET_TAG_KEY {
                return Err(Error::validation_for(
                    name,
                    format!("tag key '{FLEET_TAG_KEY}' is derived from the fleet name"),
                ));
            }
        }

        Ok(())
    }
}

/// Fleet definitions keyed by name, in declaration order
///
/// Deserialization keeps every entry, including repeated keys, so that
/// [`FleetMap::validate`] can report duplicates instead of the last entry
/// silently winning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FleetMap {
    entries: Vec<(String, FleetDefinition)>,
}

impl FleetMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a definition under `key`; an empty `name` takes the key
    pub fn insert(&mut self, key: impl Into<String>, mut definition: FleetDefinition) {
        let key = key.into();
        if definition.name.is_empty() {
            definition.name = key.clone();
        }
        self.entries.push((key, definition));
    }

    /// Builder-style [`FleetMap::insert`]
    pub fn with(mut self, key: impl Into<String>, definition: FleetDefinition) -> Self {
        self.insert(key, definition);
        self
    }

    /// Number of entries, duplicates included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no fleet is declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FleetDefinition)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Definitions sorted by fleet name
    ///
    /// This is the order fleets are composed and provisioned in.
    pub fn sorted(&self) -> Vec<&FleetDefinition> {
        let mut fleets: Vec<_> = self.entries.iter().map(|(_, v)| v).collect();
        fleets.sort_by(|a, b| a.name.cmp(&b.name));
        fleets
    }

    /// Look up a fleet by name
    pub fn get(&self, name: &str) -> Option<&FleetDefinition> {
        self.entries.iter().map(|(_, v)| v).find(|v| v.name == name)
    }

    /// Validate uniqueness and every definition
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (key, definition) in &self.entries {
            if !seen.insert(definition.name.as_str()) {
                return Err(Error::validation_for_field(
                    &definition.name,
                    format!("fleets.{key}"),
                    format!("duplicate fleet name '{}'", definition.name),
                ));
            }
            definition.validate()?;
        }
        Ok(())
    }
}

impl Serialize for FleetMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, definition) in &self.entries {
            map.serialize_entry(key, definition)?;
        }
        map.end()
    }
}

struct FleetMapVisitor;

impl<'de> Visitor<'de> for FleetMapVisitor {
    type Value = FleetMap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of fleet name to fleet definition")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<FleetMap, A::Error> {
        let mut fleets = FleetMap::new();
        while let Some((key, definition)) = access.next_entry::<String, FleetDefinition>()? {
            fleets.insert(key, definition);
        }
        Ok(fleets)
    }
}

impl<'de> Deserialize<'de> for FleetMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(FleetMapVisitor)
    }
}
