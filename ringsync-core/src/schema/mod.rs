pub mod descriptor;
pub mod loader;

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::tree::{self, ConfigTree};

pub use descriptor::{is_descriptor, Descriptor, SourceRef, ValueType, DESCRIPTOR_FIELDS};
pub use loader::{load_schemas, SchemaSet};

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Descriptor(Descriptor),
    Subsection(BTreeMap<String, SchemaNode>),
}

impl SchemaNode {
    fn from_value(location: &str, value: &Value) -> Result<Self> {
        if is_descriptor(value) {
            let object = value.as_object().ok_or_else(|| {
                Error::SchemaInvalid(format!("descriptor {location} is not a table"))
            })?;
            return Ok(Self::Descriptor(Descriptor::from_object(location, object)?));
        }

        match value {
            Value::Object(children) => {
                let mut nodes = BTreeMap::new();
                for (key, child) in children {
                    let child_location = format!("{location}.{key}");
                    nodes.insert(key.clone(), Self::from_value(&child_location, child)?);
                }
                Ok(Self::Subsection(nodes))
            }
            other => Err(Error::SchemaInvalid(format!(
                "schema contains invalid field {location} = {other}"
            ))),
        }
    }

    pub fn as_descriptor(&self) -> Option<&Descriptor> {
        match self {
            Self::Descriptor(descriptor) => Some(descriptor),
            Self::Subsection(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Descriptor(descriptor) => descriptor.to_value(),
            Self::Subsection(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_value()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for SchemaNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    sections: BTreeMap<String, SchemaNode>,
}

impl Schema {
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(root) = value else {
            return Err(Error::SchemaInvalid("schema root must be a table".to_owned()));
        };
        let mut sections = BTreeMap::new();
        for (section, node) in root {
            sections.insert(section.clone(), SchemaNode::from_value(section, node)?);
        }
        Ok(Self { sections })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value: Value = toml::from_str(content)
            .map_err(|err| Error::SchemaInvalid(format!("schema is not valid TOML: {err}")))?;
        Self::from_value(&value)
    }

    pub fn sections(&self) -> &BTreeMap<String, SchemaNode> {
        &self.sections
    }

    pub fn node<S: AsRef<str>>(&self, path: &[S]) -> Option<&SchemaNode> {
        let (first, rest) = path.split_first()?;
        let mut current = self.sections.get(first.as_ref())?;
        for key in rest {
            match current {
                SchemaNode::Subsection(children) => current = children.get(key.as_ref())?,
                SchemaNode::Descriptor(_) => return None,
            }
        }
        Some(current)
    }

    pub fn descriptor<S: AsRef<str>>(&self, path: &[S]) -> Option<&Descriptor> {
        self.node(path).and_then(SchemaNode::as_descriptor)
    }

    /// Default values for every descriptor that declares one. Descriptors
    /// without a default are absent, and subsections left empty are dropped.
    pub fn defaults(&self) -> ConfigTree {
        fn collect(children: &BTreeMap<String, SchemaNode>) -> ConfigTree {
            let mut config = Map::new();
            for (key, node) in children {
                match node {
                    SchemaNode::Descriptor(descriptor) => {
                        if let Some(default) = &descriptor.default {
                            config.insert(key.clone(), default.clone());
                        }
                    }
                    SchemaNode::Subsection(grandchildren) => {
                        let nested = collect(grandchildren);
                        if !nested.is_empty() {
                            config.insert(key.clone(), Value::Object(nested));
                        }
                    }
                }
            }
            config
        }
        collect(&self.sections)
    }

    /// The blank a stored field is scrubbed to before merging: `0` for
    /// numbers, `{}` for subsections, otherwise (unmodeled fields included)
    /// an empty string.
    pub fn empty_value<S: AsRef<str>>(&self, path: &[S]) -> Value {
        match self.node(path) {
            Some(SchemaNode::Descriptor(descriptor)) => descriptor.value_type.empty_value(),
            Some(SchemaNode::Subsection(_)) => Value::Object(Map::new()),
            None => Value::String(String::new()),
        }
    }

    pub fn coerce<S: AsRef<str>>(&self, path: &[S], value: Value) -> Value {
        match self.descriptor(path) {
            Some(descriptor) => descriptor.coerce(value),
            None => value,
        }
    }

    pub fn coerce_tree(&self, config: &ConfigTree) -> ConfigTree {
        let mut coerced = Map::new();
        tree::for_each_leaf(config, &mut |path, value| {
            tree::set_path(&mut coerced, path, self.coerce(path, value.clone()));
        });
        coerced
    }

    pub fn is_unmanaged<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.descriptor(path).is_some_and(|descriptor| descriptor.unmanaged)
    }

    /// Copy of `stored` with every leaf replaced by its blank. Subsections
    /// and unmodeled objects recurse so nested stale values are scrubbed too.
    pub fn blank(&self, stored: &ConfigTree) -> ConfigTree {
        fn walk(schema: &Schema, stored: &ConfigTree, prefix: &mut Vec<String>) -> ConfigTree {
            let mut blanked = Map::new();
            for (key, value) in stored {
                prefix.push(key.clone());
                let blank = match (schema.node(prefix.as_slice()), value) {
                    (Some(SchemaNode::Subsection(_)) | None, Value::Object(children)) => {
                        Value::Object(walk(schema, children, prefix))
                    }
                    _ => schema.empty_value(prefix.as_slice()),
                };
                blanked.insert(key.clone(), blank);
                prefix.pop();
            }
            blanked
        }
        walk(self, stored, &mut Vec::new())
    }

    /// Removes every field whose descriptor is marked unmanaged, along with
    /// any section the removal leaves empty.
    pub fn strip_unmanaged(&self, config: &mut ConfigTree) {
        for (path, descriptor) in self.descriptors() {
            if !descriptor.unmanaged || tree::remove_path(config, path.as_slice()).is_none() {
                continue;
            }
            for depth in (1..path.len()).rev() {
                let parent = &path[..depth];
                let emptied = matches!(
                    tree::get_path(config, parent),
                    Some(Value::Object(children)) if children.is_empty()
                );
                if !emptied {
                    break;
                }
                tree::remove_path(config, parent);
            }
        }
    }

    pub fn descriptors(&self) -> Vec<(Vec<String>, &Descriptor)> {
        fn walk<'a>(
            children: &'a BTreeMap<String, SchemaNode>,
            prefix: &mut Vec<String>,
            found: &mut Vec<(Vec<String>, &'a Descriptor)>,
        ) {
            for (key, node) in children {
                prefix.push(key.clone());
                match node {
                    SchemaNode::Descriptor(descriptor) => found.push((prefix.clone(), descriptor)),
                    SchemaNode::Subsection(grandchildren) => walk(grandchildren, prefix, found),
                }
                prefix.pop();
            }
        }
        let mut found = Vec::new();
        walk(&self.sections, &mut Vec::new(), &mut found);
        found
    }

    pub fn sourced(&self) -> Vec<(Vec<String>, &SourceRef)> {
        self.descriptors()
            .into_iter()
            .filter_map(|(path, descriptor)| descriptor.source.as_ref().map(|source| (path, source)))
            .collect()
    }

    /// Checks that every field of an operator patch names a descriptor that
    /// may be edited: one that is neither unmanaged nor sourced.
    pub fn validate_editable(&self, patch: &ConfigTree) -> Result<()> {
        fn walk(
            children: &BTreeMap<String, SchemaNode>,
            patch: &ConfigTree,
            prefix: &mut Vec<String>,
        ) -> Result<()> {
            for (key, value) in patch {
                prefix.push(key.clone());
                let location = prefix.join(".");
                match (children.get(key), value) {
                    (Some(SchemaNode::Subsection(grandchildren)), Value::Object(nested)) => {
                        walk(grandchildren, nested, prefix)?;
                    }
                    (Some(SchemaNode::Subsection(_)), _) => {
                        return Err(Error::Validation(format!(
                            "{location} is a section and needs a table of values"
                        )));
                    }
                    (Some(SchemaNode::Descriptor(descriptor)), _) if descriptor.unmanaged => {
                        return Err(Error::Validation(format!(
                            "{location} is unmanaged and cannot be edited here"
                        )));
                    }
                    (Some(SchemaNode::Descriptor(descriptor)), _) if descriptor.source.is_some() => {
                        return Err(Error::Validation(format!(
                            "{location} is sourced from another service"
                        )));
                    }
                    (Some(SchemaNode::Descriptor(_)), _) => {}
                    (None, _) => {
                        return Err(Error::Validation(format!("{location} is not in the schema")));
                    }
                }
                prefix.pop();
            }
            Ok(())
        }
        walk(&self.sections, patch, &mut Vec::new())
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.sections.serialize(serializer)
    }
}
