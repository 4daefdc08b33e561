use std::fmt;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Keys a schema table may carry and still count as a descriptor. Anything
/// else makes the table a subsection.
pub const DESCRIPTOR_FIELDS: [&str; 8] = [
    "default",
    "type",
    "of",
    "unmanaged",
    "source",
    "description",
    "label",
    "category",
];

const METADATA_FIELDS: [&str; 3] = ["description", "label", "category"];

pub fn is_descriptor(node: &Value) -> bool {
    let Some(object) = node.as_object() else {
        return false;
    };
    object.contains_key("type") && object.keys().all(|key| DESCRIPTOR_FIELDS.contains(&key.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
    List,
    Json,
    Other(String),
}

impl ValueType {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "list" => Self::List,
            "json" => Self::Json,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Json => "json",
            Self::Other(other) => other,
        }
    }

    pub fn empty_value(&self) -> Value {
        match self {
            Self::Number => Value::from(0),
            _ => Value::String(String::new()),
        }
    }
}

/// Where a sourced descriptor copies its value from: another service's
/// resolved configuration at `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub service: String,
    pub path: Vec<String>,
}

impl SourceRef {
    pub fn parse(value: &str) -> Result<Self> {
        let segments: Vec<&str> = value.trim().split('.').collect();
        if !(3..=4).contains(&segments.len()) || segments.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::SchemaInvalid(format!(
                "source '{value}' must look like service.section[.subsection].config"
            )));
        }
        Ok(Self {
            service: segments[0].trim().to_owned(),
            path: segments[1..].iter().map(|s| s.trim().to_owned()).collect(),
        })
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.path.join("."))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub value_type: ValueType,
    pub default: Option<Value>,
    pub of: Option<Value>,
    pub unmanaged: bool,
    pub source: Option<SourceRef>,
    pub metadata: Map<String, Value>,
}

impl Descriptor {
    pub fn from_object(location: &str, object: &Map<String, Value>) -> Result<Self> {
        let value_type = match object.get("type") {
            Some(Value::String(kind)) => ValueType::parse(kind),
            other => {
                return Err(Error::SchemaInvalid(format!(
                    "descriptor {location} has a non-string type {other:?}"
                )))
            }
        };

        let unmanaged = match object.get("unmanaged") {
            None => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(Error::SchemaInvalid(format!(
                    "descriptor {location} has a non-boolean unmanaged flag {other}"
                )))
            }
        };

        let source = match object.get("source") {
            None => None,
            Some(Value::String(source)) => Some(SourceRef::parse(source)?),
            Some(other) => {
                return Err(Error::SchemaInvalid(format!(
                    "descriptor {location} has a non-string source {other}"
                )))
            }
        };

        let metadata = object
            .iter()
            .filter(|(key, _)| METADATA_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            value_type,
            default: object.get("default").cloned(),
            of: object.get("of").cloned(),
            unmanaged,
            source,
            metadata,
        })
    }

    /// Coerces a raw value, typically a string, to the declared type.
    /// Only numbers are converted; everything else passes through.
    pub fn coerce(&self, value: Value) -> Value {
        if self.value_type != ValueType::Number {
            return value;
        }
        let Value::String(raw) = &value else {
            return value;
        };
        if raw.is_empty() {
            return value;
        }
        match parse_integer_prefix(raw) {
            Some(parsed) => Value::from(parsed),
            None => {
                tracing::warn!(raw = %raw, "numeric config value is not an integer; keeping it as text");
                value
            }
        }
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".to_owned(), Value::String(self.value_type.as_str().to_owned()));
        if let Some(default) = &self.default {
            object.insert("default".to_owned(), default.clone());
        }
        if let Some(of) = &self.of {
            object.insert("of".to_owned(), of.clone());
        }
        if self.unmanaged {
            object.insert("unmanaged".to_owned(), Value::Bool(true));
        }
        if let Some(source) = &self.source {
            object.insert("source".to_owned(), Value::String(source.to_string()));
        }
        for (key, value) in &self.metadata {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }
}

/// Leading-integer parse: optional sign then digits, trailing text ignored.
fn parse_integer_prefix(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (sign, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let end = digits
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(digits.len(), |(index, _)| index);
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|parsed| sign * parsed)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn number() -> Descriptor {
        Descriptor::from_object("db.port", json!({"type": "number"}).as_object().expect("object"))
            .expect("valid descriptor")
    }

    #[test]
    fn descriptor_shape_requires_type_and_known_keys() {
        assert!(is_descriptor(&json!({"type": "string", "default": "x", "description": "d"})));
        assert!(!is_descriptor(&json!({"default": "x"})));
        assert!(!is_descriptor(&json!({"type": {"type": "string"}, "port": {"type": "number"}})));
        assert!(!is_descriptor(&json!("string")));
    }

    #[test]
    fn numbers_are_coerced_like_a_leading_integer_parse() {
        let descriptor = number();
        assert_eq!(descriptor.coerce(json!("5433")), json!(5433));
        assert_eq!(descriptor.coerce(json!(" -12px")), json!(-12));
        assert_eq!(descriptor.coerce(json!(7)), json!(7));
        assert_eq!(descriptor.coerce(json!("")), json!(""));
        assert_eq!(descriptor.coerce(json!("abc")), json!("abc"));
    }

    #[test]
    fn strings_pass_through_coercion() {
        let descriptor =
            Descriptor::from_object("a.b", json!({"type": "string"}).as_object().expect("object"))
                .expect("valid descriptor");
        assert_eq!(descriptor.coerce(json!("5433")), json!("5433"));
    }

    #[test]
    fn source_refs_need_a_service_and_a_path() {
        let source = SourceRef::parse("reticulum.auth.token").expect("valid source");
        assert_eq!(source.service, "reticulum");
        assert_eq!(source.path, vec!["auth", "token"]);
        assert_eq!(source.to_string(), "reticulum.auth.token");

        let error = SourceRef::parse("reticulum.token").expect_err("too short");
        assert!(matches!(error, Error::SchemaInvalid(_)));
    }

    #[test]
    fn rejects_non_boolean_unmanaged_flag() {
        let object = json!({"type": "string", "unmanaged": "yes"});
        let error = Descriptor::from_object("a.b", object.as_object().expect("object"))
            .expect_err("flag must be boolean");
        assert!(error.to_string().contains("unmanaged"));
    }
}
