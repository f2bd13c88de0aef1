use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::map::ElementToJsonStrategy;
use crate::error::{PipelineError, Result};

pub(crate) type NodeId = usize;

pub(crate) const ROOT: NodeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Property,
    AnyObject,
    Object,
    Array,
    ArrayItem,
    Ignored,
    Flatten,
}

impl From<&ElementToJsonStrategy> for NodeKind {
    fn from(strategy: &ElementToJsonStrategy) -> Self {
        match strategy {
            ElementToJsonStrategy::Property => Self::Property,
            ElementToJsonStrategy::AnyObject => Self::AnyObject,
            ElementToJsonStrategy::Object(_) => Self::Object,
            ElementToJsonStrategy::Array(_) => Self::Array,
            ElementToJsonStrategy::ArrayItem(_) => Self::ArrayItem,
            ElementToJsonStrategy::Ignored => Self::Ignored,
            ElementToJsonStrategy::Flatten => Self::Flatten,
        }
    }
}

#[derive(Debug)]
pub(crate) struct XmlNode {
    pub name: String,
    pub kind: NodeKind,
    pub value: String,
    pub properties: BTreeMap<String, NodeId>,
    pub collection: Vec<NodeId>,
}

/// Arena of nodes built while parsing; node `ROOT` stands for the document.
#[derive(Debug)]
pub(crate) struct XmlTree {
    nodes: Vec<XmlNode>,
}

impl XmlTree {
    pub fn new() -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.add("", NodeKind::AnyObject);
        tree
    }

    pub fn add(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        self.nodes.push(XmlNode {
            name: name.into(),
            kind,
            value: String::new(),
            properties: BTreeMap::new(),
            collection: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn node(&self, id: NodeId) -> &XmlNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut XmlNode {
        &mut self.nodes[id]
    }

    /// The document as JSON.
    ///
    /// A root holding a single array yields that array. Otherwise the root's
    /// properties form an object, or failing that its items form an array.
    pub fn into_value(self) -> Result<Value> {
        let root = self.node(ROOT);
        if root.properties.len() == 1 {
            if let Some(&only) = root.properties.values().next() {
                if self.node(only).kind == NodeKind::Array {
                    return Ok(self.value_of(only));
                }
            }
        }
        if !root.properties.is_empty() {
            return Ok(Value::Object(self.object_of(ROOT)));
        }
        if !root.collection.is_empty() {
            return Ok(self.array_of(ROOT));
        }
        Err(PipelineError::Decode(
            "XML document produced no JSON content".into(),
        ))
    }

    fn value_of(&self, id: NodeId) -> Value {
        let node = self.node(id);
        match node.kind {
            NodeKind::Property => Value::String(node.value.clone()),
            NodeKind::Array => self.array_of(id),
            NodeKind::Object | NodeKind::AnyObject | NodeKind::ArrayItem | NodeKind::Flatten => {
                if node.properties.is_empty() && !node.value.is_empty() {
                    Value::String(node.value.clone())
                } else {
                    Value::Object(self.object_of(id))
                }
            }
            NodeKind::Ignored => Value::Null,
        }
    }

    fn array_of(&self, id: NodeId) -> Value {
        Value::Array(
            self.node(id)
                .collection
                .iter()
                .filter(|&&item| self.node(item).kind != NodeKind::Ignored)
                .map(|&item| self.value_of(item))
                .collect(),
        )
    }

    fn object_of(&self, id: NodeId) -> Map<String, Value> {
        let mut object = Map::new();
        for (key, &child) in &self.node(id).properties {
            match self.node(child).kind {
                NodeKind::Ignored => {}
                NodeKind::Flatten => object = self.object_of(child),
                _ => {
                    object.insert(key.clone(), self.value_of(child));
                }
            }
        }
        object
    }
}
