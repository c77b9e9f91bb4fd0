//! Property values, references, and resolved outputs.
//!
//! A declared property is either already known ([`Property::Resolved`]) or
//! waits on another resource's output ([`Property::Pending`]). Containers and
//! the `$concat` / `$coalesce` combinators keep that distinction for their
//! children until every part is known.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

/// Placeholder shown wherever a secret value would be rendered.
pub const SECRET_MASK: &str = "[secret]";

/// A deferred value: output `output` of resource `resource`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Logical name of the source resource.
    pub resource: String,
    /// Output key on the source resource.
    pub output: String,
}

impl Reference {
    /// Creates a reference.
    #[must_use]
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }

    /// Parses `resource.output`, splitting at the first dot.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (resource, output) = text.split_once('.')?;
        if resource.is_empty() || output.is_empty() {
            return None;
        }
        Some(Self::new(resource, output))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.output)
    }
}

/// A declared input property.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// A fully known value.
    Resolved(Value),
    /// Waits on another resource's output.
    Pending(Reference),
    /// Names a config option; replaced by [`Property::Resolved`] when bound.
    Config(String),
    /// String concatenation of the parts.
    Concat(Vec<Self>),
    /// First non-null part.
    Coalesce(Vec<Self>),
    /// List with at least one unresolved element.
    List(Vec<Self>),
    /// Map with at least one unresolved entry.
    Map(BTreeMap<String, Self>),
}

/// Result of looking at a property before its sources are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedValue {
    /// Value is known at plan time.
    Known(Value),
    /// Value depends on an output that will only exist after apply.
    Unknown,
}

impl Property {
    /// Parses a manifest value, recognising `$ref`, `$config`, `$concat`, and `$coalesce`.
    ///
    /// # Errors
    ///
    /// Returns an error if a `$`-expression is malformed.
    pub fn parse(value: &Value, path: &str) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) if map.len() == 1 && map.keys().all(|k| k.starts_with('$')) => {
                let Some((key, inner)) = map.iter().next() else {
                    return Ok(Self::Resolved(value.clone()));
                };
                Self::parse_expression(key, inner, path)
            }
            Value::Object(map) => {
                let mut entries = BTreeMap::new();
                for (key, child) in map {
                    entries.insert(key.clone(), Self::parse(child, &format!("{path}.{key}"))?);
                }
                Ok(Self::Map(entries).simplify())
            }
            Value::Array(items) => {
                let parts = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::parse(item, &format!("{path}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::List(parts).simplify())
            }
            scalar => Ok(Self::Resolved(scalar.clone())),
        }
    }

    fn parse_expression(key: &str, inner: &Value, path: &str) -> Result<Self, ConfigError> {
        match key {
            "$ref" => {
                let text = inner
                    .as_str()
                    .ok_or_else(|| ConfigError::expression(path, "$ref expects a string"))?;
                Reference::parse(text).map(Self::Pending).ok_or_else(|| {
                    ConfigError::expression(path, format!("'{text}' is not of the form resource.output"))
                })
            }
            "$config" => inner
                .as_str()
                .map(|name| Self::Config(name.to_string()))
                .ok_or_else(|| ConfigError::expression(path, "$config expects a string")),
            "$concat" | "$coalesce" => {
                let items = inner
                    .as_array()
                    .ok_or_else(|| ConfigError::expression(path, format!("{key} expects a list")))?;
                let parts = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::parse(item, &format!("{path}{key}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()?;
                let expr = if key == "$concat" {
                    Self::Concat(parts)
                } else {
                    Self::Coalesce(parts)
                };
                Ok(expr.simplify())
            }
            other => Err(ConfigError::expression(
                path,
                format!("unknown expression '{other}'"),
            )),
        }
    }

    /// Shorthand for a pending reference.
    #[must_use]
    pub fn reference(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Pending(Reference::new(resource, output))
    }

    /// Returns true if the value is fully known.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Collects every reference in this property.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Pending(r) => out.push(r),
            Self::Concat(parts) | Self::Coalesce(parts) | Self::List(parts) => {
                for part in parts {
                    part.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for part in entries.values() {
                    part.collect_references(out);
                }
            }
            Self::Resolved(_) | Self::Config(_) => {}
        }
    }

    /// Returns the first config option left unbound, if any.
    #[must_use]
    pub fn unbound_config(&self) -> Option<&str> {
        match self {
            Self::Config(name) => Some(name),
            Self::Concat(parts) | Self::Coalesce(parts) | Self::List(parts) => {
                parts.iter().find_map(Self::unbound_config)
            }
            Self::Map(entries) => entries.values().find_map(Self::unbound_config),
            Self::Resolved(_) | Self::Pending(_) => None,
        }
    }

    /// Replaces `$config` expressions with their option values.
    ///
    /// # Errors
    ///
    /// Returns an error if an option is not declared.
    pub fn bind_config(self, options: &BTreeMap<String, Value>) -> Result<Self, ConfigError> {
        let bound = match self {
            Self::Config(name) => match options.get(&name) {
                Some(value) => Self::Resolved(value.clone()),
                None => return Err(ConfigError::UnknownOption { name }),
            },
            Self::Concat(parts) => Self::Concat(Self::bind_all(parts, options)?),
            Self::Coalesce(parts) => Self::Coalesce(Self::bind_all(parts, options)?),
            Self::List(parts) => Self::List(Self::bind_all(parts, options)?),
            Self::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| v.bind_config(options).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
            other => other,
        };
        Ok(bound.simplify())
    }

    fn bind_all(parts: Vec<Self>, options: &BTreeMap<String, Value>) -> Result<Vec<Self>, ConfigError> {
        parts.into_iter().map(|p| p.bind_config(options)).collect()
    }

    /// Folds children that became fully known into [`Property::Resolved`].
    #[must_use]
    pub fn simplify(self) -> Self {
        match self {
            Self::List(parts) => {
                let parts: Vec<Self> = parts.into_iter().map(Self::simplify).collect();
                if parts.iter().all(Self::is_resolved) {
                    Self::Resolved(Value::Array(parts.into_iter().filter_map(Self::into_value).collect()))
                } else {
                    Self::List(parts)
                }
            }
            Self::Map(entries) => {
                let entries: BTreeMap<String, Self> =
                    entries.into_iter().map(|(k, v)| (k, v.simplify())).collect();
                if entries.values().all(Self::is_resolved) {
                    Self::Resolved(Value::Object(
                        entries
                            .into_iter()
                            .filter_map(|(k, v)| v.into_value().map(|v| (k, v)))
                            .collect(),
                    ))
                } else {
                    Self::Map(entries)
                }
            }
            Self::Concat(parts) => {
                let parts: Vec<Self> = parts.into_iter().map(Self::simplify).collect();
                if parts.iter().all(Self::is_resolved) {
                    let joined: String = parts
                        .iter()
                        .filter_map(|p| match p {
                            Self::Resolved(v) => Some(display_fragment(v)),
                            _ => None,
                        })
                        .collect();
                    Self::Resolved(Value::String(joined))
                } else {
                    Self::Concat(parts)
                }
            }
            Self::Coalesce(parts) => {
                let mut remaining: Vec<Self> = parts
                    .into_iter()
                    .map(Self::simplify)
                    .skip_while(|p| matches!(p, Self::Resolved(Value::Null)))
                    .collect();
                match remaining.first() {
                    None => Self::Resolved(Value::Null),
                    Some(Self::Resolved(_)) => remaining.swap_remove(0),
                    Some(_) => Self::Coalesce(remaining),
                }
            }
            other => other,
        }
    }

    fn into_value(self) -> Option<Value> {
        match self {
            Self::Resolved(v) => Some(v),
            _ => None,
        }
    }

    /// Resolves the property using `lookup` for references.
    ///
    /// # Errors
    ///
    /// Returns the first reference `lookup` could not answer.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Resolved(v) => Ok(v.clone()),
            Self::Pending(r) => lookup(r).ok_or_else(|| r.clone()),
            Self::Config(name) => Err(Reference::new("$config", name.clone())),
            Self::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    joined.push_str(&display_fragment(&part.resolve(lookup)?));
                }
                Ok(Value::String(joined))
            }
            Self::Coalesce(parts) => {
                for part in parts {
                    let value = part.resolve(lookup)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Self::List(parts) => parts
                .iter()
                .map(|p| p.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, part) in entries {
                    map.insert(key.clone(), part.resolve(lookup)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// Evaluates what is knowable before apply.
    #[must_use]
    pub fn planned<F>(&self, lookup: &F) -> PlannedValue
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        self.resolve(lookup)
            .map_or(PlannedValue::Unknown, PlannedValue::Known)
    }

    /// Resolves with string placeholders in place of references, for schema checks.
    #[must_use]
    pub fn placeholder(&self) -> Value {
        let placeholder = |r: &Reference| Some(Value::String(format!("<pending:{r}>")));
        self.resolve(&placeholder).unwrap_or(Value::Null)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::Resolved(Value::String(value.to_string()))
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Self::Resolved(value)
    }
}

/// Renders a JSON value the way `$concat` joins it.
fn display_fragment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// A resolved output value, tagged when it must be treated as a secret.
#[derive(Clone, PartialEq, Eq)]
pub struct OutputValue {
    /// The value.
    pub value: Value,
    /// Whether the value is a secret.
    pub secret: bool,
}

impl OutputValue {
    /// Creates a plain output.
    #[must_use]
    pub const fn plain(value: Value) -> Self {
        Self {
            value,
            secret: false,
        }
    }

    /// Creates a secret output.
    #[must_use]
    pub const fn secret(value: Value) -> Self {
        Self {
            value,
            secret: true,
        }
    }

    /// Renders the value, optionally revealing secrets.
    #[must_use]
    pub fn render(&self, reveal: bool) -> String {
        if self.secret && !reveal {
            return SECRET_MASK.to_string();
        }
        display_fragment(&self.value)
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

impl fmt::Debug for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            write!(f, "OutputValue({SECRET_MASK})")
        } else {
            write!(f, "OutputValue({})", self.value)
        }
    }
}

/// Outputs of one resource, keyed by output name.
pub type Outputs = BTreeMap<String, OutputValue>;

/// Resolved inputs of one resource, keyed by property name.
pub type InputMap = BTreeMap<String, Value>;

/// Plan-time view of a resource's inputs.
pub type PlannedInputs = BTreeMap<String, PlannedValue>;
