//! XML to JSON decoding driven by an [`XmlMap`].
//!
//! Services that answer in XML are decoded into a [`serde_json::Value`] so
//! the rest of the client only ever deals with JSON. The map says, per
//! dot-separated element path, what each element becomes:
//!
//! ```text
//! <EnumerationResults>                 "EnumerationResults"        AnyObject
//!   <Blobs>                            "EnumerationResults.Blobs"  Array(Blob)
//!     <Blob><Name>a</Name></Blob>      "...Blobs.Blob"             ArrayItem(Blob)
//!   </Blobs>                           "...Blobs.Blob.Name"        Property
//!   <NextMarker>m</NextMarker>         "EnumerationResults.NextMarker" Property
//! </EnumerationResults>
//! ```
//!
//! Elements with no entry are dropped. Without a map the structure is
//! inferred instead.

mod map;
mod parser;
mod tree;

pub use map::{
    AttributeToJsonStrategy, ElementToJsonStrategy, XmlMap, XmlMetadata, XmlModel, XmlModelType,
};
pub use parser::decode;
