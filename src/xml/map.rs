use std::collections::HashMap;
use std::fmt;

use crate::error::{PipelineError, Result};
use crate::paged::PagedCodingKeys;

/// How an XML element turns into JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementToJsonStrategy {
    /// A string-valued property of the parent.
    Property,
    /// An object whose shape is not described by a model.
    AnyObject,
    /// An object described by a model's own map.
    Object(XmlModelType),
    /// An array of model items; the items are the element's children.
    Array(XmlModelType),
    /// One item of the enclosing array.
    ArrayItem(XmlModelType),
    /// Dropped, together with everything below it.
    Ignored,
    /// The element's children replace the parent's properties.
    Flatten,
}

/// How XML attributes turn into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeToJsonStrategy {
    #[default]
    Ignored,
    /// Each attribute becomes a property named `_<attribute>`.
    UnderscoredProperties,
}

/// Translation of one dot-separated element path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlMetadata {
    pub json_name: String,
    pub json_type: ElementToJsonStrategy,
    pub attribute_strategy: AttributeToJsonStrategy,
}

impl XmlMetadata {
    pub fn new(json_name: impl Into<String>, json_type: ElementToJsonStrategy) -> Self {
        Self {
            json_name: json_name.into(),
            json_type,
            attribute_strategy: AttributeToJsonStrategy::Ignored,
        }
    }

    /// A plain string property.
    pub fn property(json_name: impl Into<String>) -> Self {
        Self::new(json_name, ElementToJsonStrategy::Property)
    }

    pub fn with_attributes(mut self, strategy: AttributeToJsonStrategy) -> Self {
        self.attribute_strategy = strategy;
        self
    }
}

/// A model type whose XML shape is declared by its own map.
///
/// ```
/// use sdk_pipeline::xml::{XmlMap, XmlMetadata, XmlModel};
///
/// struct Blob;
///
/// impl XmlModel for Blob {
///     fn xml_map() -> XmlMap {
///         XmlMap::from([
///             ("Name", XmlMetadata::property("name")),
///             ("Snapshot", XmlMetadata::property("snapshot")),
///         ])
///     }
/// }
///
/// assert_eq!(XmlMap::for_model::<Blob>().len(), 2);
/// ```
pub trait XmlModel {
    fn xml_map() -> XmlMap;
}

/// Scalar items carry no map of their own.
impl XmlModel for String {
    fn xml_map() -> XmlMap {
        XmlMap::new()
    }
}

/// Type token for an [`XmlModel`], stored in the strategies that refer to
/// another model.
#[derive(Clone, Copy)]
pub struct XmlModelType {
    name: &'static str,
    map: fn() -> XmlMap,
}

impl XmlModelType {
    pub fn of<T: XmlModel + 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            map: T::xml_map,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The model's own map, unprefixed.
    pub fn xml_map(&self) -> XmlMap {
        (self.map)()
    }
}

impl PartialEq for XmlModelType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for XmlModelType {}

impl fmt::Debug for XmlModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XmlModelType({})", self.name)
    }
}

/// Dot-separated element path to [`XmlMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlMap {
    entries: HashMap<String, XmlMetadata>,
}

impl XmlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map declared by `T`, with nested model maps folded in under
    /// their element paths.
    pub fn for_model<T: XmlModel + 'static>() -> Self {
        Self::for_type(XmlModelType::of::<T>(), None)
    }

    /// Like [`for_model`](Self::for_model), with every path under `prefix`.
    pub fn for_type(model: XmlModelType, prefix: Option<&str>) -> Self {
        let mut map = Self::new();
        for (key, metadata) in model.xml_map().entries {
            let path = match prefix {
                Some(prefix) => format!("{prefix}.{key}"),
                None => key,
            };
            if let ElementToJsonStrategy::Object(inner) | ElementToJsonStrategy::ArrayItem(inner) =
                &metadata.json_type
            {
                map.entries
                    .extend(Self::for_type(*inner, Some(&path)).entries);
            }
            map.entries.insert(path, metadata);
        }
        map
    }

    /// Map for a paged XML response.
    ///
    /// Every segment of the items and continuation token paths is filled in
    /// as an object, the items path itself becomes an array of `item_type`,
    /// the token path a property, and the item element an array item whose
    /// children follow `item_type`'s own map.
    pub fn paged(keys: &PagedCodingKeys, item_type: XmlModelType) -> Result<Self> {
        let item_name = keys.xml_item_name.as_deref().ok_or_else(|| {
            PipelineError::Decode(
                "Coding keys for XML must specify the element name for collection items".into(),
            )
        })?;

        let mut map = Self::new();
        map.fill_path(&keys.items);
        if let Some(items) = map.entries.get_mut(&keys.items) {
            items.json_type = ElementToJsonStrategy::Array(item_type);
        }

        map.fill_path(&keys.continuation_token);
        if let Some(token) = map.entries.get_mut(&keys.continuation_token) {
            *token = XmlMetadata::property(token.json_name.clone());
        }

        let prefix = format!("{}.{}", keys.items, item_name);
        map.entries.insert(
            prefix.clone(),
            XmlMetadata::new(item_name, ElementToJsonStrategy::ArrayItem(item_type))
                .with_attributes(AttributeToJsonStrategy::UnderscoredProperties),
        );
        map.entries
            .extend(Self::for_type(item_type, Some(&prefix)).entries);
        Ok(map)
    }

    fn fill_path(&mut self, path: &str) {
        let mut current = String::new();
        for component in path.split('.') {
            if !current.is_empty() {
                current.push('.');
            }
            current.push_str(component);
            self.entries.insert(
                current.clone(),
                XmlMetadata::new(component, ElementToJsonStrategy::AnyObject)
                    .with_attributes(AttributeToJsonStrategy::UnderscoredProperties),
            );
        }
    }

    pub fn get(&self, path: &str) -> Option<&XmlMetadata> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, metadata: XmlMetadata) -> Option<XmlMetadata> {
        self.entries.insert(path.into(), metadata)
    }

    pub fn with(mut self, path: impl Into<String>, metadata: XmlMetadata) -> Self {
        self.insert(path, metadata);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &XmlMetadata)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, XmlMetadata)> for XmlMap {
    fn from_iter<I: IntoIterator<Item = (K, XmlMetadata)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<K: Into<String>, const N: usize> From<[(K, XmlMetadata); N]> for XmlMap {
    fn from(entries: [(K, XmlMetadata); N]) -> Self {
        entries.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag;

    impl XmlModel for Tag {
        fn xml_map() -> XmlMap {
            XmlMap::from([("Key", XmlMetadata::property("key"))])
        }
    }

    struct Item;

    impl XmlModel for Item {
        fn xml_map() -> XmlMap {
            XmlMap::from([
                ("Name", XmlMetadata::property("name")),
                (
                    "Tags",
                    XmlMetadata::new("tags", ElementToJsonStrategy::Array(XmlModelType::of::<Tag>())),
                ),
                (
                    "Tags.Tag",
                    XmlMetadata::new("tag", ElementToJsonStrategy::ArrayItem(XmlModelType::of::<Tag>())),
                ),
            ])
        }
    }

    #[test]
    fn test_for_model_folds_nested_models() {
        let map = XmlMap::for_model::<Item>();
        assert_eq!(map.get("Name").unwrap().json_name, "name");
        assert_eq!(map.get("Tags.Tag.Key").unwrap().json_name, "key");
        assert!(map.get("Tags.Key").is_none());
    }

    #[test]
    fn test_paged_map_layout() {
        let keys = PagedCodingKeys::new("Results.Items", "Results.Next").with_xml_item_name("Item");
        let map = XmlMap::paged(&keys, XmlModelType::of::<Item>()).unwrap();

        assert_eq!(map.get("Results").unwrap().json_type, ElementToJsonStrategy::AnyObject);
        assert_eq!(
            map.get("Results.Items").unwrap().json_type,
            ElementToJsonStrategy::Array(XmlModelType::of::<Item>())
        );
        assert_eq!(
            map.get("Results.Items.Item").unwrap().json_type,
            ElementToJsonStrategy::ArrayItem(XmlModelType::of::<Item>())
        );
        assert_eq!(map.get("Results.Next").unwrap().json_type, ElementToJsonStrategy::Property);
        assert_eq!(map.get("Results.Items.Item.Name").unwrap().json_name, "name");
        assert_eq!(map.get("Results.Items.Item.Tags.Tag.Key").unwrap().json_name, "key");
    }

    #[test]
    fn test_paged_map_requires_item_name() {
        let err = XmlMap::paged(&PagedCodingKeys::default(), XmlModelType::of::<Item>()).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_model_type_identity() {
        assert_eq!(XmlModelType::of::<Tag>(), XmlModelType::of::<Tag>());
        assert_ne!(XmlModelType::of::<Tag>(), XmlModelType::of::<Item>());
    }
}
