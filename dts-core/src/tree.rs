//! The device tree store.
//!
//! A [`DtsMap`] keeps every node in a single vector. The parent→child
//! relation ([`DtsNode::child_indices`]) is the source of truth; the vector
//! order (a pre-order walk from the root), each node's path and the path
//! index are derived from it and rebuilt after every structural change.

use std::collections::{HashMap, HashSet};
use std::mem;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::node::{check_node_name, join_path, parent_path, DtsNode, Node};
use crate::value::{MemoryReservation, PropertyEntry, PropertyValue};

/// The path of the root node.
pub const ROOT_PATH: &str = "/";

/// An editable device tree.
///
/// # Examples
///
/// ```
/// # use dts_core::{DtsMap, Node};
/// let mut tree = DtsMap::new();
/// tree.insert_child("/", Node::builder("isp@0").property("status", "okay").build())
///     .unwrap();
/// assert_eq!(tree.lookup("/isp@0").unwrap().name(), "isp@0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawDtsMap")]
pub struct DtsMap {
    root_path: String,
    memory_reservations: Vec<MemoryReservation>,
    nodes: Vec<DtsNode>,
    #[serde(serialize_with = "serialize_index")]
    path_index: HashMap<String, usize>,
}

impl Default for DtsMap {
    fn default() -> Self {
        Self::new()
    }
}

impl DtsMap {
    /// Creates a tree holding only an empty root node.
    pub fn new() -> Self {
        let root = DtsNode::detached(&Node::default(), ROOT_PATH.to_owned());
        Self {
            root_path: ROOT_PATH.to_owned(),
            memory_reservations: Vec::new(),
            nodes: vec![root],
            path_index: HashMap::from([(ROOT_PATH.to_owned(), 0)]),
        }
    }

    /// Builds a tree from a detached root node.
    ///
    /// The root's own name is ignored. Fails if any node, property or label
    /// name is invalid or if two siblings share a name.
    pub fn from_root(mut root: Node) -> Result<Self> {
        root.name.clear();
        root.validate(ROOT_PATH)?;

        let mut tree = Self {
            root_path: ROOT_PATH.to_owned(),
            memory_reservations: Vec::new(),
            nodes: Vec::new(),
            path_index: HashMap::new(),
        };
        tree.append_subtree(root);
        tree.rebuild();
        Ok(tree)
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn root(&self) -> &DtsNode {
        &self.nodes[0]
    }

    /// Returns all nodes in pre-order. The root is at position 0.
    pub fn nodes(&self) -> &[DtsNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn memory_reservations(&self) -> &[MemoryReservation] {
        &self.memory_reservations
    }

    pub fn memory_reservations_mut(&mut self) -> &mut Vec<MemoryReservation> {
        &mut self.memory_reservations
    }

    /// Returns the position of the node at `path` in [`nodes`](Self::nodes).
    pub fn position(&self, path: &str) -> Option<usize> {
        self.path_index.get(path).copied()
    }

    /// Finds a node by its path.
    ///
    /// # Performance
    ///
    /// This is a constant-time operation.
    pub fn lookup(&self, path: &str) -> Option<&DtsNode> {
        self.position(path).map(|i| &self.nodes[i])
    }

    /// Finds a node by its path for property and label editing.
    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut DtsNode> {
        let i = self.position(path)?;
        Some(&mut self.nodes[i])
    }

    /// Returns the children of `node` in declaration order.
    pub fn children<'a>(&'a self, node: &'a DtsNode) -> impl Iterator<Item = &'a DtsNode> + 'a {
        node.children.iter().map(move |&i| &self.nodes[i])
    }

    /// Returns the parent of the node at `path`.
    pub fn parent(&self, path: &str) -> Option<&DtsNode> {
        self.position(path)?;
        self.lookup(parent_path(path)?)
    }

    /// Finds the node carrying `label`.
    pub fn find_label(&self, label: &str) -> Option<&DtsNode> {
        self.nodes
            .iter()
            .find(|node| node.labels.iter().any(|l| l == label))
    }

    /// Sets a property on the node at `path`; see [`DtsNode::set_property`].
    pub fn set_property(
        &mut self,
        path: &str,
        entry: PropertyEntry,
    ) -> Result<Option<PropertyValue>> {
        self.lookup_mut(path)
            .ok_or_else(|| Error::not_found(path))?
            .set_property(entry)
    }

    /// Removes a property from the node at `path`.
    pub fn remove_property(&mut self, path: &str, name: &str) -> Result<PropertyEntry> {
        self.lookup_mut(path)
            .ok_or_else(|| Error::not_found(path))?
            .remove_property(name)
            .ok_or_else(|| Error::PropertyNotFound {
                path: path.to_owned(),
                name: name.to_owned(),
            })
    }

    /// Appends `node` (with its whole subtree) as the last child of the node
    /// at `parent`. Returns the path of the inserted node.
    ///
    /// The tree is left untouched on failure.
    pub fn insert_child(&mut self, parent: &str, node: Node) -> Result<String> {
        let parent_pos = self.position(parent).ok_or_else(|| Error::not_found(parent))?;
        let path = join_path(parent, &node.name);
        node.validate(&path)?;
        if self.path_index.contains_key(&path) {
            return Err(Error::duplicate(path));
        }

        let child_pos = self.append_subtree(node);
        self.nodes[parent_pos].children.push(child_pos);
        self.rebuild();
        Ok(path)
    }

    /// Removes the node at `path` and its whole subtree, returning it as a
    /// detached [`Node`].
    pub fn remove_node(&mut self, path: &str) -> Result<Node> {
        let pos = self.position(path).ok_or_else(|| Error::not_found(path))?;
        let parent = parent_path(path).ok_or(Error::RootNode)?;
        let parent_pos = self.position(parent).ok_or_else(|| Error::not_found(parent))?;

        let detached = self.subtree(pos);
        self.nodes[parent_pos].children.retain(|&c| c != pos);
        self.rebuild();
        Ok(detached)
    }

    /// Renames the node at `old_path` to `new_name`, updating the paths of
    /// all its descendants. Returns the new path.
    pub fn rename_path(&mut self, old_path: &str, new_name: &str) -> Result<String> {
        let pos = self
            .position(old_path)
            .ok_or_else(|| Error::not_found(old_path))?;
        let parent = parent_path(old_path).ok_or(Error::RootNode)?;
        check_node_name(new_name)?;
        let new_path = join_path(parent, new_name);
        if new_path != old_path && self.path_index.contains_key(&new_path) {
            return Err(Error::duplicate(new_path));
        }

        new_name.clone_into(&mut self.nodes[pos].name);
        self.rebuild();
        Ok(new_path)
    }

    /// Returns a detached copy of the subtree at `path`.
    pub fn to_node(&self, path: &str) -> Option<Node> {
        self.position(path).map(|pos| self.subtree(pos))
    }

    /// Verifies the tree invariants by walking every node.
    ///
    /// This is a diagnostic pass; regular lookups always go through the path
    /// index.
    pub fn check_consistency(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::InvalidModel { reason });

        let Some(root) = self.nodes.first() else {
            return invalid("the tree has no root node".into());
        };
        if root.path != self.root_path || !root.name.is_empty() {
            return invalid(format!("node 0 is not the root (`{}`)", root.path));
        }
        if self.path_index.len() != self.nodes.len() {
            return invalid(format!(
                "the path index has {} entries for {} nodes",
                self.path_index.len(),
                self.nodes.len()
            ));
        }

        let mut expected = 0;
        let mut stack = vec![0];
        while let Some(i) = stack.pop() {
            if i != expected {
                return invalid(format!("node {i} is out of pre-order (expected {expected})"));
            }
            expected += 1;

            let node = &self.nodes[i];
            if self.path_index.get(&node.path) != Some(&i) {
                return invalid(format!("`{}` is not indexed at {i}", node.path));
            }
            for &c in node.children.iter().rev() {
                let Some(child) = self.nodes.get(c) else {
                    return invalid(format!("`{}` refers to missing node {c}", node.path));
                };
                if child.path != join_path(&node.path, &child.name) {
                    return invalid(format!(
                        "`{}` is listed as a child of `{}`",
                        child.path, node.path
                    ));
                }
                stack.push(c);
            }
        }
        if expected != self.nodes.len() {
            return invalid(format!(
                "{} nodes are not reachable from the root",
                self.nodes.len() - expected
            ));
        }
        Ok(())
    }

    pub(crate) fn set_memory_reservations(&mut self, reservations: Vec<MemoryReservation>) {
        self.memory_reservations = reservations;
    }

    /// Pushes `node` and its descendants onto the end of `nodes`, returning
    /// the position of `node`. The caller links `node` to its parent; paths
    /// are filled in by the next rebuild.
    fn append_subtree(&mut self, node: Node) -> usize {
        let first = self.nodes.len();
        let mut stack: Vec<(Node, Option<usize>)> = vec![(node, None)];
        while let Some((mut node, parent)) = stack.pop() {
            let pos = self.nodes.len();
            let children = mem::take(&mut node.children);
            self.nodes.push(DtsNode::detached(&node, String::new()));
            if let Some(parent) = parent {
                self.nodes[parent].children.push(pos);
            }
            stack.extend(children.into_iter().rev().map(|c| (c, Some(pos))));
        }
        first
    }

    fn subtree(&self, pos: usize) -> Node {
        let node = &self.nodes[pos];
        Node {
            name: node.name.clone(),
            labels: node.labels.clone(),
            properties: node.properties.clone(),
            children: node.children.iter().map(|&c| self.subtree(c)).collect(),
        }
    }

    /// Re-derives node order, paths and the path index from the parent→child
    /// relation. Nodes that are no longer reachable from the root are dropped.
    fn rebuild(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0];
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend(self.nodes[i].children.iter().rev());
        }

        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }

        let mut old_nodes: Vec<Option<DtsNode>> =
            mem::take(&mut self.nodes).into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        for old in order {
            let node = old_nodes[old].take();
            debug_assert!(node.is_some(), "node {old} is shared by two parents");
            if let Some(mut node) = node {
                for c in &mut node.children {
                    *c = remap[*c];
                }
                nodes.push(node);
            }
        }

        nodes[0].path.clone_from(&self.root_path);
        for i in 0..nodes.len() {
            let parent = nodes[i].path.clone();
            for c in nodes[i].children.clone() {
                nodes[c].path = join_path(&parent, &nodes[c].name);
            }
        }

        self.path_index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.path.clone(), i))
            .collect();
        self.nodes = nodes;
    }
}

fn serialize_index<S: Serializer>(
    index: &HashMap<String, usize>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut entries: Vec<_> = index.iter().collect();
    entries.sort_by_key(|entry| *entry.1);
    serializer.collect_map(entries)
}

/// The exchange shape as received from the editing UI, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDtsMap {
    #[serde(default = "default_root_path")]
    root_path: String,
    #[serde(default)]
    memory_reservations: Vec<MemoryReservation>,
    nodes: Vec<DtsNode>,
    #[serde(default)]
    path_index: Option<HashMap<String, usize>>,
}

fn default_root_path() -> String {
    ROOT_PATH.to_owned()
}

impl TryFrom<RawDtsMap> for DtsMap {
    type Error = Error;

    fn try_from(raw: RawDtsMap) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidModel { reason };

        if raw.root_path != ROOT_PATH {
            return Err(invalid(format!("unsupported root path `{}`", raw.root_path)));
        }
        if raw.nodes.is_empty() {
            return Err(invalid("the tree has no root node".into()));
        }

        let mut visited = HashSet::new();
        let root = detach_raw(&raw.nodes, 0, &mut visited)?;
        if visited.len() != raw.nodes.len() {
            return Err(invalid(format!(
                "{} nodes are not reachable from the root",
                raw.nodes.len() - visited.len()
            )));
        }

        let mut tree = DtsMap::from_root(root)?;
        tree.memory_reservations = raw.memory_reservations;

        for (i, (given, derived)) in raw.nodes.iter().zip(&tree.nodes).enumerate() {
            if given.path != derived.path {
                return Err(invalid(format!(
                    "node {i} has path `{}`, expected `{}`",
                    given.path, derived.path
                )));
            }
        }
        if let Some(index) = raw.path_index {
            if index != tree.path_index {
                return Err(invalid("the path index does not match the nodes".into()));
            }
        }
        Ok(tree)
    }
}

fn detach_raw(nodes: &[DtsNode], pos: usize, visited: &mut HashSet<usize>) -> Result<Node> {
    let node = nodes.get(pos).ok_or_else(|| Error::InvalidModel {
        reason: format!("reference to missing node {pos}"),
    })?;
    if !visited.insert(pos) {
        return Err(Error::InvalidModel {
            reason: format!("node {pos} (`{}`) has more than one parent", node.path),
        });
    }
    let children = node
        .children
        .iter()
        .map(|&c| detach_raw(nodes, c, visited))
        .collect::<Result<_>>()?;
    Ok(Node {
        name: node.name.clone(),
        labels: node.labels.clone(),
        properties: node
            .properties
            .iter()
            .map(|entry| PropertyEntry {
                name: entry.name.clone(),
                value: entry.value.clone().normalized(),
            })
            .collect(),
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Cell, PropertyEntry};

    fn sample() -> DtsMap {
        DtsMap::from_root(
            Node::builder("")
                .property("compatible", "vendor,soc")
                .child(
                    Node::builder("isp@0")
                        .label("isp0")
                        .property("status", "okay")
                        .child(Node::new("port@0"))
                        .child(Node::new("port@1"))
                        .build(),
                )
                .child(Node::new("csi@1"))
                .build(),
        )
        .unwrap()
    }

    fn paths(tree: &DtsMap) -> Vec<&str> {
        tree.nodes().iter().map(DtsNode::path).collect()
    }

    #[test]
    fn from_root_flattens_in_pre_order() {
        let tree = sample();
        assert_eq!(
            paths(&tree),
            ["/", "/isp@0", "/isp@0/port@0", "/isp@0/port@1", "/csi@1"]
        );
        assert_eq!(tree.root().child_indices(), [1, 4]);
        assert_eq!(tree.lookup("/isp@0").unwrap().child_indices(), [2, 3]);
        tree.check_consistency().unwrap();
    }

    #[test]
    fn insert_places_subtree_after_parent_descendants() {
        let mut tree = sample();
        let path = tree
            .insert_child("/isp@0", Node::builder("port@2").child(Node::new("ep")).build())
            .unwrap();
        assert_eq!(path, "/isp@0/port@2");
        assert_eq!(
            paths(&tree),
            [
                "/",
                "/isp@0",
                "/isp@0/port@0",
                "/isp@0/port@1",
                "/isp@0/port@2",
                "/isp@0/port@2/ep",
                "/csi@1"
            ]
        );
        tree.check_consistency().unwrap();
    }

    #[test]
    fn insert_failures_leave_tree_untouched() {
        let mut tree = sample();
        let before = tree.clone();
        for (parent, node, err) in [
            ("/nope", Node::new("a"), Error::not_found("/nope")),
            ("/", Node::new("isp@0"), Error::duplicate("/isp@0")),
            (
                "/",
                Node::new("bad name"),
                Error::InvalidNodeName {
                    name: "bad name".into(),
                },
            ),
            (
                "/",
                Node::builder("x").child(Node::new("y")).child(Node::new("y")).build(),
                Error::duplicate("/x/y"),
            ),
        ] {
            assert_eq!(tree.insert_child(parent, node), Err(err));
            assert_eq!(tree, before);
        }
    }

    #[test]
    fn remove_drops_the_whole_subtree() {
        let mut tree = sample();
        let removed = tree.remove_node("/isp@0").unwrap();
        assert_eq!(removed.children().len(), 2);
        assert_eq!(paths(&tree), ["/", "/csi@1"]);
        assert!(tree.lookup("/isp@0/port@1").is_none());
        assert_eq!(tree.position("/csi@1"), Some(1));
        tree.check_consistency().unwrap();

        assert_eq!(tree.remove_node("/isp@0"), Err(Error::not_found("/isp@0")));
        assert_eq!(tree.remove_node("/"), Err(Error::RootNode));
    }

    #[test]
    fn rename_rewrites_descendant_paths() {
        let mut tree = sample();
        assert_eq!(tree.rename_path("/isp@0", "isp@1").unwrap(), "/isp@1");
        assert_eq!(
            paths(&tree),
            ["/", "/isp@1", "/isp@1/port@0", "/isp@1/port@1", "/csi@1"]
        );
        assert!(tree.lookup("/isp@0/port@0").is_none());
        tree.check_consistency().unwrap();

        let before = tree.clone();
        assert_eq!(
            tree.rename_path("/isp@1", "csi@1"),
            Err(Error::duplicate("/csi@1"))
        );
        assert_eq!(tree.rename_path("/", "x"), Err(Error::RootNode));
        assert_eq!(tree, before);
    }

    #[test]
    fn property_edits_go_through_the_index() {
        let mut tree = sample();
        tree.set_property("/csi@1", PropertyEntry::new("reg", 1u32))
            .unwrap();
        tree.set_property("/csi@1", PropertyEntry::flag("clock-noncontinuous"))
            .unwrap();
        tree.lookup_mut("/csi@1")
            .unwrap()
            .move_property("clock-noncontinuous", 0)
            .unwrap();
        let names: Vec<_> = tree
            .lookup("/csi@1")
            .unwrap()
            .properties()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, ["clock-noncontinuous", "reg"]);

        assert_eq!(
            tree.remove_property("/csi@1", "nope"),
            Err(Error::PropertyNotFound {
                path: "/csi@1".into(),
                name: "nope".into()
            })
        );
        assert_eq!(
            tree.set_property("/nope", PropertyEntry::flag("x")),
            Err(Error::not_found("/nope"))
        );
    }

    #[test]
    fn references_are_checked_before_editing() {
        let mut tree = sample();
        let before = tree.clone();
        for value in [
            PropertyValue::PhandleRef("csi 0".into()),
            PropertyValue::Cells(vec![Cell::Ref(String::new())]),
        ] {
            assert!(matches!(
                tree.set_property("/csi@1", PropertyEntry::new("remote", value.clone())),
                Err(Error::InvalidLabel { .. })
            ));
            assert!(matches!(
                tree.insert_child("/", Node::builder("x").property("remote", value).build()),
                Err(Error::InvalidLabel { .. })
            ));
            assert_eq!(tree, before);
        }
    }

    #[test]
    fn parent_and_labels() {
        let tree = sample();
        assert_eq!(tree.parent("/isp@0/port@1").unwrap().path(), "/isp@0");
        assert_eq!(tree.parent("/isp@0").unwrap().path(), "/");
        assert!(tree.parent("/").is_none());
        assert_eq!(tree.find_label("isp0").unwrap().path(), "/isp@0");
        let children: Vec<_> = tree.children(tree.root()).map(DtsNode::name).collect();
        assert_eq!(children, ["isp@0", "csi@1"]);
    }

    #[test]
    fn json_exchange_round_trip() {
        let tree = sample();
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["rootPath"], "/");
        assert_eq!(json["pathIndex"]["/isp@0/port@1"], 3);
        assert_eq!(json["nodes"][1]["children"], serde_json::json!([2, 3]));

        let back: DtsMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn json_with_inconsistent_paths_is_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["nodes"][2]["path"] = "/elsewhere".into();
        let err = serde_json::from_value::<DtsMap>(json).unwrap_err();
        assert!(err.to_string().contains("inconsistent model"), "{err}");

        let mut json = serde_json::to_value(sample()).unwrap();
        json["nodes"][0]["children"] = serde_json::json!([1, 1]);
        assert!(serde_json::from_value::<DtsMap>(json).is_err());
    }
}
