//! Typed values carried by inputs and compared by matchers

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed value: an input's configured value, or a fact read from the target
///
/// Deserialization accepts any scalar: floats keep their written form as text and a
/// null becomes empty text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Text(String),
    List(Vec<String>),
}

impl Value {
    /// Empty text, or a list with no non-blank elements
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Text(s) => s.trim().is_empty(),
            Value::List(items) => items.iter().all(|i| i.trim().is_empty()),
            Value::Bool(_) | Value::Integer(_) => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "on" | "yes" => Some(true),
                "false" | "f" | "off" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// View the value as a list of strings; scalars become one-element lists
    pub fn to_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items.clone(),
            Value::Text(s) if s.is_empty() => Vec::new(),
            other => vec![other.render()],
        }
    }

    /// Render as a single line suitable for report messages
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Text(s) => s.clone(),
            Value::List(items) => format!("[{}]", items.join(", ")),
        }
    }

    /// Name of the variant, for type mismatch messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Text(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean, number, string, null or list of scalars")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(i64::try_from(v)
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(v.to_string())))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::default())
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::default())
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            if let Value::List(_) = item {
                return Err(de::Error::custom("nested lists are not supported"));
            }
            items.push(item.render());
        }
        Ok(Value::List(items))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Value::List(items.into_iter().map(String::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_yaml() {
        let v: Value = serde_yaml::from_str("[cert, gss]").unwrap();
        assert_eq!(v, Value::from(vec!["cert", "gss"]));

        let v: Value = serde_yaml::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));

        let v: Value = serde_yaml::from_str("5432").unwrap();
        assert_eq!(v, Value::Integer(5432));

        let v: Value = serde_yaml::from_str("/var/lib/pgsql/data").unwrap();
        assert_eq!(v, Value::from("/var/lib/pgsql/data"));
    }

    #[test]
    fn test_loose_scalars() {
        let v: Value = serde_yaml::from_str("16.2").unwrap();
        assert_eq!(v, Value::from("16.2"));

        let v: Value = serde_yaml::from_str("~").unwrap();
        assert_eq!(v, Value::from(""));
        assert!(v.is_empty());

        let v: Value = serde_yaml::from_str("[16, 16.2, on]").unwrap();
        assert_eq!(v, Value::from(vec!["16", "16.2", "on"]));

        assert!(serde_yaml::from_str::<Value>("[[a]]").is_err());
        assert!(serde_yaml::from_str::<Value>("{a: b}").is_err());
    }

    #[test]
    fn test_emptiness() {
        assert!(Value::from("  ").is_empty());
        assert!(Value::List(vec![]).is_empty());
        assert!(Value::from(vec![""]).is_empty());
        assert!(!Value::from("pgaudit").is_empty());
        assert!(!Value::Bool(false).is_empty());
    }

    #[test]
    fn test_bool_coercion() {
        assert_eq!(Value::from("t").as_bool(), Some(true));
        assert_eq!(Value::from("off").as_bool(), Some(false));
        assert_eq!(Value::from("maybe").as_bool(), None);
    }
}
