use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;

use super::map::{AttributeToJsonStrategy, XmlMap};
use super::tree::{NodeId, NodeKind, XmlTree, ROOT};
use crate::error::{PipelineError, Result};

/// Streaming builder that turns parser events into an [`XmlTree`].
///
/// Two paths are tracked: the literal element path, and the map path, which
/// skips elements mapped as flatten. An element's metadata is looked up by
/// map path first, then by element path.
struct TreeBuilder<'m> {
    map: Option<&'m XmlMap>,
    tree: XmlTree,
    open: Vec<NodeId>,
    element_path: Vec<String>,
    map_path: Vec<String>,
}

impl<'m> TreeBuilder<'m> {
    fn new(map: Option<&'m XmlMap>) -> Self {
        Self {
            map,
            tree: XmlTree::new(),
            open: vec![ROOT],
            element_path: Vec::new(),
            map_path: Vec::new(),
        }
    }

    fn lookup(&self, path: &[String]) -> Option<&'m super::XmlMetadata> {
        self.map.and_then(|map| map.get(&path.join(".")))
    }

    fn start(&mut self, name: &str, attributes: Vec<(String, String)>) {
        self.element_path.push(name.to_string());
        let by_element = self.lookup(&self.element_path);
        let flattened = by_element.is_some_and(|m| NodeKind::from(&m.json_type) == NodeKind::Flatten);
        if !flattened {
            self.map_path.push(name.to_string());
        }
        let by_map = self.lookup(&self.map_path);

        let json_name = by_map.map_or(name, |m| m.json_name.as_str());
        let node = self.tree.add(json_name, NodeKind::Ignored);
        self.open.push(node);

        let metadata = by_map.or(by_element);
        if self.map.is_some() && metadata.is_none() {
            tracing::debug!(
                path = %self.element_path.join("."),
                "no XML metadata for element; ignoring"
            );
            return;
        }

        let strategy = metadata.map_or(AttributeToJsonStrategy::UnderscoredProperties, |m| {
            m.attribute_strategy
        });
        if strategy == AttributeToJsonStrategy::Ignored {
            return;
        }
        for (key, value) in attributes {
            let default_key = format!("_{key}");
            let json_key = self
                .map
                .and_then(|map| map.get(&default_key))
                .map_or(default_key, |m| m.json_name.clone());
            let attribute = self.tree.add(json_key.clone(), NodeKind::Property);
            self.tree.node_mut(attribute).value = value;
            self.tree.node_mut(node).properties.insert(json_key, attribute);
        }
    }

    fn text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let Some(&current) = self.open.last() else {
            return;
        };
        if current != ROOT {
            self.tree.node_mut(current).value.push_str(text);
        }
    }

    fn end(&mut self) -> Result<()> {
        let unbalanced = || PipelineError::Decode("unbalanced XML end tag".into());
        let current = self
            .open
            .pop()
            .filter(|&id| id != ROOT)
            .ok_or_else(unbalanced)?;
        let parent = *self.open.last().ok_or_else(unbalanced)?;

        let metadata = self
            .lookup(&self.map_path)
            .or_else(|| self.lookup(&self.element_path));
        let name = self.tree.node(current).name.clone();

        match (self.map, metadata) {
            (_, Some(metadata)) => {
                let kind = NodeKind::from(&metadata.json_type);
                self.tree.node_mut(current).kind = kind;
                match kind {
                    NodeKind::Property | NodeKind::Object | NodeKind::Array | NodeKind::AnyObject => {
                        self.tree.node_mut(parent).properties.insert(name, current);
                    }
                    NodeKind::ArrayItem => self.tree.node_mut(parent).collection.push(current),
                    NodeKind::Flatten => {
                        let properties = std::mem::take(&mut self.tree.node_mut(current).properties);
                        self.tree.node_mut(parent).properties = properties;
                    }
                    NodeKind::Ignored => {}
                }
            }
            (None, None) => {
                let has_children = !self.tree.node(current).properties.is_empty();
                let kind = if parent == ROOT || has_children {
                    NodeKind::AnyObject
                } else {
                    NodeKind::Property
                };
                self.tree.node_mut(current).kind = kind;
                self.tree.node_mut(parent).properties.insert(name, current);
            }
            (Some(_), None) => self.tree.node_mut(current).kind = NodeKind::Ignored,
        }

        if let Some(element) = self.element_path.pop() {
            if self.map_path.last() == Some(&element) {
                self.map_path.pop();
            }
        }
        Ok(())
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    start
        .attributes()
        .map(|attribute| {
            let attribute = attribute.map_err(|e| PipelineError::Decode(e.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| PipelineError::Decode(e.to_string()))?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

/// Decode an XML document into JSON.
///
/// With a map, only mapped elements are kept and each is shaped by its
/// [`XmlMetadata`](super::XmlMetadata). Without one, the structure is
/// inferred: top-level elements and elements with children become objects,
/// leaf text becomes strings, and attributes become `_name` properties.
pub fn decode(data: &[u8], map: Option<&XmlMap>) -> Result<Value> {
    if map.is_none() {
        tracing::debug!("no XML map supplied; inferring document structure");
    }

    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);
    let mut builder = TreeBuilder::new(map);
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            PipelineError::Decode(format!(
                "malformed XML at position {}: {e}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(start) => {
                let attributes = attributes(&start)?;
                builder.start(&element_name(&start), attributes);
            }
            Event::Empty(start) => {
                let attributes = attributes(&start)?;
                builder.start(&element_name(&start), attributes);
                builder.end()?;
            }
            Event::End(_) => builder.end()?,
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| PipelineError::Decode(e.to_string()))?;
                builder.text(&text);
            }
            Event::CData(data) => {
                let data = data.into_inner();
                builder.text(&String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if builder.open.len() != 1 {
        return Err(PipelineError::Decode(
            "malformed XML: document ended inside an element".into(),
        ));
    }
    builder.tree.into_value()
}
