//! Desired-spec values and output references
//!
//! A spec is a tree of literal JSON values and references to outputs of other
//! resources. References are only resolved once the producing resource is
//! ready; every reference also becomes a dependency edge of the consumer.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::ResourceHandle;
use crate::{Error, Result};

/// Reference to one output attribute of another resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    /// Resource that produces the attribute
    pub resource: ResourceHandle,
    /// Attribute name
    pub attribute: String,
}

/// One value in a desired spec
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Plain JSON value
    Literal(Value),
    /// Another resource's output, substituted as-is
    Output(OutputRef),
    /// String template with `{0}`, `{1}`, ... placeholders filled from outputs
    Interpolate {
        /// Template text
        template: String,
        /// Outputs substituted for the numbered placeholders
        refs: Vec<OutputRef>,
    },
    /// List of values
    List(Vec<FieldValue>),
    /// Nested object
    Object(BTreeMap<String, FieldValue>),
    /// Single-entry object whose key is itself computed
    Entry {
        /// Rendered as text to form the key
        key: Box<FieldValue>,
        /// Entry value
        value: Box<FieldValue>,
    },
}

impl FieldValue {
    /// Build an interpolated string
    pub fn interpolate(
        template: impl Into<String>,
        refs: impl IntoIterator<Item = OutputRef>,
    ) -> Self {
        Self::Interpolate {
            template: template.into(),
            refs: refs.into_iter().collect(),
        }
    }

    /// Build a nested object from key/value pairs
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a single-entry object with a computed key
    pub fn entry(key: impl Into<FieldValue>, value: impl Into<FieldValue>) -> Self {
        Self::Entry {
            key: Box::new(key.into()),
            value: Box::new(value.into()),
        }
    }

    /// Collect every output this value references
    pub fn collect_refs(&self, out: &mut BTreeSet<OutputRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Output(r) => {
                out.insert(r.clone());
            }
            Self::Interpolate { refs, .. } => out.extend(refs.iter().cloned()),
            Self::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Self::Object(map) => map.values().for_each(|v| v.collect_refs(out)),
            Self::Entry { key, value } => {
                key.collect_refs(out);
                value.collect_refs(out);
            }
        }
    }

    /// Resolve into plain JSON using `lookup` for every reference
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value>
    where
        F: Fn(&OutputRef) -> Result<Value>,
    {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Output(r) => lookup(r),
            Self::Interpolate { template, refs } => render(template, refs, lookup),
            Self::List(items) => items
                .iter()
                .map(|v| v.resolve(lookup))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Self::Object(map) => map
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Result<serde_json::Map<_, _>>>()
                .map(Value::Object),
            Self::Entry { key, value } => {
                let mut map = serde_json::Map::new();
                map.insert(value_to_text(&key.resolve(lookup)?), value.resolve(lookup)?);
                Ok(Value::Object(map))
            }
        }
    }
}

/// Fill `{N}` placeholders in one left-to-right pass, so substituted text is
/// never scanned again. Unknown indices are kept verbatim.
fn render<F>(template: &str, refs: &[OutputRef], lookup: &F) -> Result<Value>
where
    F: Fn(&OutputRef) -> Result<Value>,
{
    let mut values: Vec<Option<String>> = vec![None; refs.len()];
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.len() - after.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let index = after[..digits].parse::<usize>().ok().filter(|i| *i < refs.len());

        match index {
            Some(i) if after[digits..].starts_with('}') => {
                if values[i].is_none() {
                    values[i] = Some(value_to_text(&lookup(&refs[i])?));
                }
                rendered.push_str(values[i].as_deref().unwrap_or_default());
                rest = &after[digits + 1..];
            }
            _ => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);

    if let Some(unused) = values.iter().position(Option::is_none) {
        return Err(Error::validation(format!(
            "template '{template}' has no placeholder {{{unused}}}"
        )));
    }
    Ok(Value::String(rendered))
}

/// Strings substitute without quotes; everything else as compact JSON
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

impl From<OutputRef> for FieldValue {
    fn from(r: OutputRef) -> Self {
        Self::Output(r)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Literal(Value::String(s.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Literal(Value::String(s))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }
}

impl From<u32> for FieldValue {
    fn from(n: u32) -> Self {
        Self::Literal(Value::from(n))
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Desired spec: top-level field name to value
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSpec {
    fields: BTreeMap<String, FieldValue>,
}

impl ResourceSpec {
    /// Empty spec
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field (builder style)
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a field only when a value is present
    pub fn field_opt(self, name: impl Into<String>, value: Option<impl Into<FieldValue>>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    /// Field by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Iterate over fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Every output referenced anywhere in the spec
    pub fn refs(&self) -> BTreeSet<OutputRef> {
        let mut out = BTreeSet::new();
        for value in self.fields.values() {
            value.collect_refs(&mut out);
        }
        out
    }

    /// Resolve every field into a JSON object
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value>
    where
        F: Fn(&OutputRef) -> Result<Value>,
    {
        FieldValue::Object(self.fields.clone()).resolve(lookup)
    }
}
