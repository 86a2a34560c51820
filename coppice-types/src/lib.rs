mod id;
mod ordered_map;
mod qname;
mod schema;
mod value;

pub use id::Id;
pub use ordered_map::OrderedMap;
pub use qname::QName;
pub use schema::{
    ChildDecl, OptionSet, PropertyDecl, Schema, SchemaOptions, ValueKind, VersionKind,
};
pub use value::{Path, Value};
