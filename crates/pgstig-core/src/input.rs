//! Input store - layered, named configuration values consumed by controls
//!
//! Inputs resolve in priority order: runtime overrides, then profile files (later files
//! win over earlier ones), then built-in defaults. Once a run starts the store is shared
//! read-only between controls.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Where a resolved input value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// Shipped with the control catalog
    Default,
    /// Loaded from an input file
    Profile,
    /// Supplied on the command line
    Runtime,
}

/// An input value together with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub value: Value,
    pub source: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Named input definition, as used by the defaults file
#[derive(Debug, Clone, Deserialize)]
struct InputDefinition {
    name: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    description: Option<String>,
}

/// Accepted input file layouts
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputFile {
    Described { inputs: Vec<InputDefinition> },
    Plain(BTreeMap<String, Value>),
}

/// Layered store of named inputs
#[derive(Debug, Clone, Default)]
pub struct InputStore {
    entries: HashMap<String, ResolvedInput>,
}

impl InputStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value unless a higher-priority layer already set it
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>, source: InputSource) {
        let name = name.into();
        let value = value.into();

        match self.entries.get_mut(&name) {
            Some(existing) if existing.source > source => {
                debug!(input = %name, "Ignoring {:?} value, {:?} layer wins", source, existing.source);
            }
            Some(existing) => {
                existing.value = value;
                existing.source = source;
            }
            None => {
                self.entries.insert(
                    name,
                    ResolvedInput {
                        value,
                        source,
                        description: None,
                    },
                );
            }
        }
    }

    /// Layer a runtime override on top of everything else
    pub fn set_override(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.insert(name, value, InputSource::Runtime);
    }

    /// Parse `name=value` where the value uses YAML scalar/list syntax
    pub fn parse_override(spec: &str) -> Result<(String, Value)> {
        let (name, raw) = spec.split_once('=').ok_or_else(|| Error::InvalidInput {
            name: spec.to_string(),
            message: "expected name=value".into(),
        })?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput {
                name: spec.to_string(),
                message: "input name is empty".into(),
            });
        }

        let raw = raw.trim();
        let value = if raw.is_empty() {
            Value::Text(String::new())
        } else {
            serde_yaml::from_str(raw).unwrap_or_else(|_| Value::Text(raw.to_string()))
        };

        Ok((name.to_string(), value))
    }

    /// Load a YAML document into the given layer
    pub fn load_yaml(&mut self, yaml: &str, source: InputSource) -> Result<usize> {
        if yaml.trim().is_empty() {
            return Ok(0);
        }

        let file: InputFile = serde_yaml::from_str(yaml)?;
        let mut count = 0;

        match file {
            InputFile::Described { inputs } => {
                for def in inputs {
                    let description = def.description.clone();
                    self.insert(&def.name, def.value, source);
                    if let Some(entry) = self.entries.get_mut(&def.name) {
                        if entry.description.is_none() {
                            entry.description = description;
                        }
                    }
                    count += 1;
                }
            }
            InputFile::Plain(map) => {
                for (name, value) in map {
                    self.insert(name, value, source);
                    count += 1;
                }
            }
        }

        Ok(count)
    }

    /// Load an input file into the profile layer
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.display().to_string(),
            },
            _ => Error::Io(e),
        })?;

        let count = self.load_yaml(&content, InputSource::Profile)?;
        debug!("Loaded {} inputs from {}", count, path.display());
        Ok(count)
    }

    /// Resolve an input, failing if no layer supplies it
    pub fn resolve(&self, name: &str) -> Result<&Value> {
        self.entries
            .get(name)
            .map(|e| &e.value)
            .ok_or_else(|| Error::MissingInput {
                name: name.to_string(),
            })
    }

    /// Resolve an input that may legitimately be absent or blank
    pub fn optional(&self, name: &str) -> Option<&Value> {
        self.entries
            .get(name)
            .map(|e| &e.value)
            .filter(|v| !v.is_empty())
    }

    /// Full entry, including provenance
    pub fn entry(&self, name: &str) -> Option<&ResolvedInput> {
        self.entries.get(name)
    }

    pub fn string(&self, name: &str) -> Result<String> {
        match self.resolve(name)? {
            Value::Text(s) => Ok(s.clone()),
            Value::Integer(i) => Ok(i.to_string()),
            other => Err(type_mismatch(name, "string", other)),
        }
    }

    /// Resolve a list input; a scalar string is accepted as a one-element list
    pub fn list(&self, name: &str) -> Result<Vec<String>> {
        match self.resolve(name)? {
            Value::List(items) => Ok(items.clone()),
            Value::Text(s) if s.is_empty() => Ok(Vec::new()),
            Value::Text(s) => Ok(vec![s.clone()]),
            other => Err(type_mismatch(name, "list", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        let value = self.resolve(name)?;
        value
            .as_bool()
            .ok_or_else(|| type_mismatch(name, "boolean", value))
    }

    pub fn integer(&self, name: &str) -> Result<i64> {
        let value = self.resolve(name)?;
        value
            .as_integer()
            .ok_or_else(|| type_mismatch(name, "integer", value))
    }

    /// All input names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn type_mismatch(name: &str, expected: &str, actual: &Value) -> Error {
    Error::InvalidInput {
        name: name.to_string(),
        message: format!("expected {}, found {}", expected, actual.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DEFAULTS: &str = r#"
inputs:
  - name: approved_auth_methods
    description: Authentication methods approved by the organization
    value: [gss, sspi, ldap, cert]
  - name: pg_owner
    value: postgres
  - name: windows_runner
    value: false
"#;

    #[test]
    fn test_missing_input_fails() {
        let store = InputStore::new();
        let err = store.resolve("pg_owner").unwrap_err();
        assert!(matches!(err, Error::MissingInput { ref name } if name == "pg_owner"));
    }

    #[test]
    fn test_layering_priority() {
        let mut store = InputStore::new();
        store.load_yaml(DEFAULTS, InputSource::Default).unwrap();
        store
            .load_yaml("pg_owner: pgadmin\n", InputSource::Profile)
            .unwrap();

        assert_eq!(store.string("pg_owner").unwrap(), "pgadmin");
        assert_eq!(store.entry("pg_owner").unwrap().source, InputSource::Profile);

        store.set_override("pg_owner", "dba");
        assert_eq!(store.string("pg_owner").unwrap(), "dba");

        // A later default never beats an override
        store.insert("pg_owner", "postgres", InputSource::Default);
        assert_eq!(store.string("pg_owner").unwrap(), "dba");
    }

    #[test]
    fn test_descriptions_kept() {
        let mut store = InputStore::new();
        store.load_yaml(DEFAULTS, InputSource::Default).unwrap();
        let entry = store.entry("approved_auth_methods").unwrap();
        assert_eq!(
            entry.description.as_deref(),
            Some("Authentication methods approved by the organization")
        );
        assert_eq!(
            store.list("approved_auth_methods").unwrap(),
            vec!["gss", "sspi", "ldap", "cert"]
        );
        assert!(!store.bool("windows_runner").unwrap());
    }

    #[test]
    fn test_type_mismatch() {
        let mut store = InputStore::new();
        store.set_override("windows_runner", vec!["yes"]);
        let err = store.bool("windows_runner").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_parse_override() {
        let (name, value) = InputStore::parse_override("approved_auth_methods=[cert, gss]").unwrap();
        assert_eq!(name, "approved_auth_methods");
        assert_eq!(value, Value::from(vec!["cert", "gss"]));

        let (_, value) = InputStore::parse_override("pg_timezone=UTC").unwrap();
        assert_eq!(value, Value::from("UTC"));

        let (_, value) = InputStore::parse_override("min_org_allowed_postgres_version=").unwrap();
        assert!(value.is_empty());

        assert!(InputStore::parse_override("no-equals-sign").is_err());
    }

    #[test]
    fn test_optional_treats_blank_as_absent() {
        let mut store = InputStore::new();
        store.set_override("min_org_allowed_postgres_version", "");
        assert!(store.optional("min_org_allowed_postgres_version").is_none());
        assert!(store.optional("never_set").is_none());
    }

    #[test]
    fn test_float_and_null_values_plain() {
        let mut store = InputStore::new();
        let count = store
            .load_yaml(
                "min_org_allowed_postgres_version: 16.2\npg_timezone:\npg_version: 16\n",
                InputSource::Profile,
            )
            .unwrap();
        assert_eq!(count, 3);

        assert_eq!(store.string("min_org_allowed_postgres_version").unwrap(), "16.2");
        assert_eq!(store.string("pg_timezone").unwrap(), "");
        assert!(store.optional("pg_timezone").is_none());
        assert_eq!(store.integer("pg_version").unwrap(), 16);
    }

    #[test]
    fn test_float_and_null_values_described() {
        let yaml = r#"
inputs:
  - name: min_org_allowed_postgres_version
    description: Oldest release the organization allows
    value: 16.2
  - name: pg_timezone
    value:
  - name: pg_shared_dirs
"#;
        let mut store = InputStore::new();
        assert_eq!(store.load_yaml(yaml, InputSource::Default).unwrap(), 3);

        assert_eq!(store.string("min_org_allowed_postgres_version").unwrap(), "16.2");
        assert!(store.optional("pg_timezone").is_none());
        assert!(store.list("pg_shared_dirs").unwrap().is_empty());
    }

    #[test]
    fn test_integer_accessor() {
        let mut store = InputStore::new();
        store.set_override("pg_version", "16");
        assert_eq!(store.integer("pg_version").unwrap(), 16);

        store.set_override("pg_version", "sixteen");
        assert_eq!(store.integer("pg_version").unwrap_err().code(), "INVALID_INPUT");
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "pg_superusers:\n  - postgres\n  - rdsadmin").unwrap();

        let mut store = InputStore::new();
        assert_eq!(store.load_file(&path).unwrap(), 1);
        assert_eq!(
            store.list("pg_superusers").unwrap(),
            vec!["postgres", "rdsadmin"]
        );

        let err = store.load_file(dir.path().join("absent.yml")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
