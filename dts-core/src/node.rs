//! Device tree nodes.
//!
//! Two node types live here. [`DtsNode`] is a node stored inside a
//! [`DtsMap`](crate::DtsMap): it knows its own path and refers to its
//! children by position. [`Node`] is a detached, owned subtree: it is what
//! gets inserted into a map, what comes out when a node is removed, and what
//! the decoder assembles before the map is flattened.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{Cell, PropertyEntry, PropertyValue};

/// A node stored in a [`DtsMap`](crate::DtsMap).
///
/// The structural fields (path, name and children) can only be changed
/// through the map, which keeps the path index in sync. Properties and labels
/// can be edited freely through [`DtsMap::lookup_mut`](crate::DtsMap::lookup_mut).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtsNode {
    pub(crate) path: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) labels: Vec<String>,
    #[serde(default)]
    pub(crate) properties: Vec<PropertyEntry>,
    #[serde(default)]
    pub(crate) children: Vec<usize>,
}

impl DtsNode {
    pub(crate) fn detached(node: &Node, path: String) -> Self {
        Self {
            path,
            name: node.name.clone(),
            labels: node.labels.clone(),
            properties: node.properties.clone(),
            children: Vec::new(),
        }
    }

    /// Returns the fully-qualified path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the name of this node, including any `@unit` suffix. The root
    /// node's name is empty.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the part of the name before the `@`.
    pub fn base_name(&self) -> &str {
        split_unit(&self.name).0
    }

    /// Returns the unit address, if the name has one.
    pub fn unit_address(&self) -> Option<&str> {
        split_unit(&self.name).1
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the properties in declaration order.
    pub fn properties(&self) -> &[PropertyEntry] {
        &self.properties
    }

    /// Returns the positions of this node's children in
    /// [`DtsMap::nodes`](crate::DtsMap::nodes).
    pub fn child_indices(&self) -> &[usize] {
        &self.children
    }

    /// Finds a property value by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        find_property(&self.properties, name)
    }

    /// Returns a name→value view of the properties.
    ///
    /// The map carries no ordering; [`properties`](Self::properties) is the
    /// authoritative declaration order.
    pub fn property_map(&self) -> HashMap<&str, &PropertyValue> {
        self.properties
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.value))
            .collect()
    }

    /// Sets a property. An existing property with the same name keeps its
    /// position and has its value replaced; the old value is returned.
    /// Otherwise the property is appended.
    pub fn set_property(&mut self, entry: PropertyEntry) -> Result<Option<PropertyValue>> {
        check_entry(&entry)?;
        Ok(set_entry(&mut self.properties, entry))
    }

    /// Removes a property by name.
    pub fn remove_property(&mut self, name: &str) -> Option<PropertyEntry> {
        let pos = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(pos))
    }

    /// Moves a property to `index` in the declaration order. Indices past the
    /// end move the property last.
    pub fn move_property(&mut self, name: &str, index: usize) -> Result<()> {
        let pos = self
            .properties
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| Error::PropertyNotFound {
                path: self.path.clone(),
                name: name.to_owned(),
            })?;
        let entry = self.properties.remove(pos);
        let index = index.min(self.properties.len());
        self.properties.insert(index, entry);
        Ok(())
    }

    /// Adds a label. Returns `false` if the node already carries it.
    pub fn add_label(&mut self, label: impl Into<String>) -> Result<bool> {
        let label = label.into();
        check_label(&label)?;
        if self.labels.contains(&label) {
            return Ok(false);
        }
        self.labels.push(label);
        Ok(true)
    }

    /// Removes a label. Returns `false` if the node did not carry it.
    pub fn remove_label(&mut self, label: &str) -> bool {
        let before = self.labels.len();
        self.labels.retain(|l| l != label);
        self.labels.len() != before
    }
}

/// A detached device tree node that owns its children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) labels: Vec<String>,
    pub(crate) properties: Vec<PropertyEntry>,
    pub(crate) children: Vec<Node>,
}

impl Node {
    /// Creates a new [`Node`] with the given name.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dts_core::Node;
    /// let node = Node::new("isp@1");
    /// assert_eq!(node.name(), "isp@1");
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a new [`NodeBuilder`] with the given name.
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            node: Node::new(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn properties(&self) -> &[PropertyEntry] {
        &self.properties
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        find_property(&self.properties, name)
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Sets a property, replacing the value in place if the name exists.
    pub fn set_property(&mut self, entry: PropertyEntry) -> Option<PropertyValue> {
        set_entry(&mut self.properties, entry)
    }

    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Appends a child. Sibling names are checked when the node is inserted
    /// into a [`DtsMap`](crate::DtsMap).
    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Merges `other` into this node: properties are overridden in place or
    /// appended, children with the same name are merged recursively and the
    /// rest are appended.
    pub(crate) fn merge(&mut self, other: Node) {
        for label in other.labels {
            self.add_label(label);
        }
        for entry in other.properties {
            self.set_property(entry);
        }
        for child in other.children {
            match self.children.iter_mut().find(|c| c.name == child.name) {
                Some(existing) => existing.merge(child),
                None => self.children.push(child),
            }
        }
    }

    /// Returns the path of the first node in this subtree carrying `label`,
    /// where this node sits at `path`.
    pub(crate) fn label_path(&self, path: &str, label: &str) -> Option<String> {
        if self.labels.iter().any(|l| l == label) {
            return Some(path.to_owned());
        }
        self.children
            .iter()
            .find_map(|child| child.label_path(&join_path(path, &child.name), label))
    }

    /// Walks down from this node (the root) to the node at `path`.
    pub(crate) fn descendant_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.iter_mut().find(|c| c.name == segment)?;
        }
        Some(node)
    }

    /// Checks names, labels and sibling uniqueness for this subtree, which
    /// would sit at `path`.
    pub(crate) fn validate(&self, path: &str) -> Result<()> {
        if !path.is_empty() && path != "/" {
            check_node_name(&self.name)?;
        }
        for label in &self.labels {
            check_label(label)?;
        }
        for entry in &self.properties {
            check_entry(entry)?;
        }
        let mut seen = HashSet::new();
        for child in &self.children {
            let child_path = join_path(path, &child.name);
            if !seen.insert(child.name.as_str()) {
                return Err(Error::duplicate(child_path));
            }
            child.validate(&child_path)?;
        }
        Ok(())
    }
}

/// A builder for creating [`Node`]s.
#[derive(Debug, Default)]
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    /// Adds a property to the node.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.node.set_property(PropertyEntry::new(name, value));
        self
    }

    /// Adds a label to the node.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.node.add_label(label);
        self
    }

    /// Adds a child to the node.
    #[must_use]
    pub fn child(mut self, child: Node) -> Self {
        self.node.add_child(child);
        self
    }

    /// Builds the `Node`.
    #[must_use]
    pub fn build(self) -> Node {
        self.node
    }
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Returns the path of the parent of `path`, or `None` for the root.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", "")) | None => None,
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
    }
}

fn split_unit(name: &str) -> (&str, Option<&str>) {
    match name.split_once('@') {
        Some((base, unit)) => (base, Some(unit)),
        None => (name, None),
    }
}

fn find_property<'a>(properties: &'a [PropertyEntry], name: &str) -> Option<&'a PropertyValue> {
    properties.iter().find(|p| p.name == name).map(|p| &p.value)
}

fn set_entry(properties: &mut Vec<PropertyEntry>, entry: PropertyEntry) -> Option<PropertyValue> {
    let value = entry.value.normalized();
    match properties.iter_mut().find(|p| p.name == entry.name) {
        Some(existing) => Some(std::mem::replace(&mut existing.value, value)),
        None => {
            properties.push(PropertyEntry {
                name: entry.name,
                value,
            });
            None
        }
    }
}

pub(crate) fn is_node_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ",._+-".contains(c)
}

pub(crate) fn is_property_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ",._+?#-".contains(c)
}

pub(crate) fn is_valid_node_name(name: &str) -> bool {
    let (base, unit) = split_unit(name);
    let valid = |s: &str| !s.is_empty() && s.chars().all(is_node_name_char);
    valid(base) && unit.map_or(true, valid)
}

pub(crate) fn is_valid_property_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_property_name_char)
}

pub(crate) fn is_valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn check_node_name(name: &str) -> Result<()> {
    if is_valid_node_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidNodeName {
            name: name.to_owned(),
        })
    }
}

pub(crate) fn check_property_name(name: &str) -> Result<()> {
    if is_valid_property_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidPropertyName {
            name: name.to_owned(),
        })
    }
}

/// Checks a property name and every label the value refers to.
pub(crate) fn check_entry(entry: &PropertyEntry) -> Result<()> {
    check_property_name(&entry.name)?;
    match &entry.value {
        PropertyValue::PhandleRef(label) => check_label(label),
        PropertyValue::Cells(cells) => cells.iter().try_for_each(|cell| match cell {
            Cell::Ref(label) => check_label(label),
            Cell::Num(_) => Ok(()),
        }),
        _ => Ok(()),
    }
}

pub(crate) fn check_label(label: &str) -> Result<()> {
    if is_valid_label(label) {
        Ok(())
    } else {
        Err(Error::InvalidLabel {
            label: label.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_names() {
        for (name, valid) in [
            ("isp", true),
            ("isp@0", true),
            ("csi2@fe801000", true),
            ("cache@0,0", true),
            ("l2-cache", true),
            ("", false),
            ("@0", false),
            ("isp@", false),
            ("a/b", false),
            ("#address-cells", false),
            ("isp 0", false),
        ] {
            assert_eq!(is_valid_node_name(name), valid, "{name}");
        }
    }

    #[test]
    fn property_names() {
        for (name, valid) in [
            ("reg", true),
            ("#address-cells", true),
            ("ibm,ppc-interrupt-server#s", true),
            ("", false),
            ("a=b", false),
            ("a b", false),
        ] {
            assert_eq!(is_valid_property_name(name), valid, "{name}");
        }
    }

    #[test]
    fn labels() {
        for (label, valid) in [
            ("isp0", true),
            ("L2_0", true),
            ("_x", true),
            ("0isp", false),
            ("isp-0", false),
            ("", false),
        ] {
            assert_eq!(is_valid_label(label), valid, "{label}");
        }
    }

    #[test]
    fn parent_paths() {
        for (path, parent) in [
            ("/", None),
            ("/a", Some("/")),
            ("/a/b", Some("/a")),
            ("/a/b@1/c", Some("/a/b@1")),
        ] {
            assert_eq!(parent_path(path), parent, "{path}");
        }
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
    }

    #[test]
    fn set_property_replaces_in_place() {
        let mut node = Node::builder("isp@0")
            .property("status", "disabled")
            .property("reg", 0u32)
            .build();
        let old = node.set_property(PropertyEntry::new("status", "okay"));
        assert_eq!(old, Some(PropertyValue::from("disabled")));
        let names: Vec<_> = node.properties().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["status", "reg"]);
        assert_eq!(node.property("status"), Some(&PropertyValue::from("okay")));
    }

    #[test]
    fn merge_overrides_and_appends() {
        let mut base = Node::builder("")
            .property("model", "a")
            .child(Node::builder("isp@0").property("status", "disabled").build())
            .build();
        let patch = Node::builder("")
            .property("model", "b")
            .property("compatible", "soc")
            .child(
                Node::builder("isp@0")
                    .label("isp0")
                    .property("status", "okay")
                    .build(),
            )
            .child(Node::new("csi@1"))
            .build();
        base.merge(patch);

        assert_eq!(base.property("model"), Some(&PropertyValue::from("b")));
        assert_eq!(base.properties().len(), 2);
        assert_eq!(base.children().len(), 2);
        let isp = base.child("isp@0").unwrap();
        assert_eq!(isp.labels(), ["isp0"]);
        assert_eq!(isp.property("status"), Some(&PropertyValue::from("okay")));
        assert_eq!(base.label_path("/", "isp0").as_deref(), Some("/isp@0"));
    }

    #[test]
    fn references_must_be_labels() {
        for value in [
            PropertyValue::PhandleRef("csi 0".into()),
            PropertyValue::Cells(vec![Cell::Num(1), Cell::Ref(String::new())]),
        ] {
            let node = Node::builder("isp@0").property("remote", value).build();
            assert!(
                matches!(node.validate("/isp@0"), Err(Error::InvalidLabel { .. })),
                "{node:?}"
            );
        }
        let node = Node::builder("isp@0")
            .property("remote", PropertyValue::PhandleRef("csi0".into()))
            .property("clocks", PropertyValue::Cells(vec![Cell::Ref("cru".into())]))
            .build();
        assert_eq!(node.validate("/isp@0"), Ok(()));
    }

    #[test]
    fn validate_rejects_duplicate_siblings() {
        let node = Node::builder("")
            .child(Node::new("a"))
            .child(Node::new("a"))
            .build();
        assert_eq!(node.validate("/"), Err(Error::duplicate("/a")));
    }
}
