use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// A single typed value from a source form's property list.
///
/// Source properties are heterogeneous; values that cannot be interpreted
/// as one of the scalar kinds are carried through as opaque source text and
/// resolved (or dropped) at the emission boundary, never inside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Carried-through source text for values with no scalar reading.
    /// Constructed only by format-specific parsers: untagged
    /// deserialization always yields `Str` for string payloads, so an
    /// `Opaque` value serialized to JSON comes back as `Str`.
    Opaque(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) | PropertyValue::Opaque(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// A data-binding declaration on a control: which property is bound, and to
/// what source/member pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingDescriptor {
    pub property: String,
    pub data_source: String,
    pub data_member: String,
}

/// One node in a parsed form's control tree.
///
/// Children are owned; `parent` is a non-owning back-reference holding the
/// parent's display name, used only for upward lookups against a root. The
/// tree is acyclic by construction and sibling names are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlNode {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub events: BTreeMap<String, String>,
    #[serde(default)]
    pub bindings: Vec<BindingDescriptor>,
    #[serde(default)]
    pub children: Vec<ControlNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl ControlNode {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Unknown property names are not an error; downstream consumers simply
    /// see the property as absent.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    pub fn child(&self, name: &str) -> Option<&ControlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut ControlNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Depth-first lookup anywhere in the subtree, including self.
    pub fn find(&self, name: &str) -> Option<&ControlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Depth-first pre-order visit of the subtree, including self.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ControlNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Node count of the subtree, including self.
    pub fn subtree_size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(ControlNode::subtree_size)
            .sum::<usize>()
    }

    /// Attaches `node` as the last child. The child's back-reference is
    /// (re)pointed at this node; a sibling with the same display name is
    /// rejected to keep lookups unambiguous.
    pub fn attach_child(&mut self, mut node: ControlNode) -> Result<(), TreeError> {
        if self.children.iter().any(|c| c.name == node.name) {
            return Err(TreeError::DuplicateSiblingName(node.name));
        }
        node.parent = Some(self.name.clone());
        self.children.push(node);
        Ok(())
    }

    /// Removes and returns the direct child with the given name, clearing
    /// its back-reference.
    pub fn detach_child(&mut self, name: &str) -> Option<ControlNode> {
        let idx = self.children.iter().position(|c| c.name == name)?;
        let mut node = self.children.remove(idx);
        node.parent = None;
        Some(node)
    }

    /// Integer (x, y) from the `location` property, when present.
    ///
    /// Components that fail to parse default to 0; a node with any
    /// `location` property still counts as positioned. Documented
    /// limitation of the source format, not an error.
    pub fn position(&self) -> Option<(i32, i32)> {
        let value = self.property("location")?;
        match value {
            PropertyValue::Str(raw) | PropertyValue::Opaque(raw) => Some(parse_point(raw)),
            PropertyValue::Int(v) => Some((*v as i32, 0)),
            PropertyValue::Bool(_) => Some((0, 0)),
        }
    }

    /// The `dock` property when set to something other than `none`.
    pub fn dock_edge(&self) -> Option<&str> {
        let edge = self.property("dock")?.as_str()?;
        if edge.eq_ignore_ascii_case("none") {
            return None;
        }
        Some(edge)
    }
}

fn parse_point(raw: &str) -> (i32, i32) {
    let mut parts = raw.split(',');
    let x = parse_coord(parts.next());
    let y = parse_coord(parts.next());
    (x, y)
}

fn parse_coord(part: Option<&str>) -> i32 {
    part.and_then(|p| p.trim().parse::<i32>().ok()).unwrap_or(0)
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
