use crate::{OrderedMap, QName};

/// How the repository treats a versionable property or child at version
/// time. `compute` and `abort` are rare in practice but are valid CND
/// tokens and must round-trip.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum VersionKind {
    Copy,
    Version,
    Initialize,
    Compute,
    Ignore,
    Abort,
}

impl Default for VersionKind {
    fn default() -> Self {
        VersionKind::Copy
    }
}

/// The value-kind a property declaration names. Defaults to `String` when a
/// CND property clause omits the type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ValueKind {
    String,
    Binary,
    Long,
    Double,
    Date,
    Boolean,
    Name,
    Path,
    Reference,
    Undefined,
}

/// The option bits a property or child-node declaration can carry. `version`
/// only applies to properties; child declarations leave it at the default.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OptionSet {
    pub primary: bool,
    pub autocreated: bool,
    pub mandatory: bool,
    pub protected: bool,
    pub multiple: bool,
    pub version: VersionKind,
}

impl Default for OptionSet {
    fn default() -> Self {
        OptionSet {
            primary: false,
            autocreated: false,
            mandatory: false,
            protected: false,
            multiple: false,
            version: VersionKind::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PropertyDecl {
    pub name: QName,
    pub value_kind: ValueKind,
    pub default: Option<String>,
    pub constraints: Vec<String>,
    pub options: OptionSet,
}

/// `name` is `None` for the wildcard child declaration `*`.
#[derive(Clone, Debug)]
pub struct ChildDecl {
    pub name: Option<QName>,
    pub required_types: Vec<QName>,
    pub default_type: Option<QName>,
    pub options: OptionSet,
    /// `true` when the (single, non-wildcard) required type is itself a
    /// container -- the homogeneous-list-property case (spec.md §4.3's
    /// "when the required type is a container... wrap in a list-property
    /// field"), detected by the compiler, not by an option bit (same-name
    /// siblings already forbid `multiple` on a named child).
    pub list_property: bool,
}

/// Type-level options a `typedef` clause can carry (`nt_options` in the CND
/// grammar): `orderable` controls whether children keep an explicit order
/// list, `mixin` marks the type as addable to any node rather than only
/// usable as a primary type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SchemaOptions {
    pub orderable: bool,
    pub mixin: bool,
}

/// A compiled CND type definition.
#[derive(Clone, Debug)]
pub struct Schema {
    pub name: QName,
    pub supertypes: Vec<QName>,
    pub options: SchemaOptions,
    pub properties: OrderedMap<QName, PropertyDecl>,
    pub children: OrderedMap<QName, ChildDecl>,
    /// Accumulated allowed item types for the wildcard child declaration, if
    /// any was declared; an empty vec with `has_wildcard_child == true` means
    /// "any schema is admitted".
    pub wildcard_required_types: Vec<QName>,
    pub has_wildcard_child: bool,
}

impl Schema {
    pub fn new(name: QName) -> Schema {
        Schema {
            name,
            supertypes: Vec::new(),
            options: SchemaOptions::default(),
            properties: OrderedMap::new(),
            children: OrderedMap::new(),
            wildcard_required_types: Vec::new(),
            has_wildcard_child: false,
        }
    }

    /// A schema is a container iff it declared at least one wildcard child.
    pub fn is_container(&self) -> bool {
        self.has_wildcard_child
    }
}
