use std::collections::HashSet;

use coppice_base::{not_found, Result};
use coppice_types::{OrderedMap, QName, Schema};
use tracing::debug;

/// The root type a session's `root()` object is built from regardless of
/// what the repository happens to name it; `ecmnt:document` is the base
/// every document type transitively extends (spec.md §3's "a schema is a
/// *document* iff it transitively extends the document base").
pub const DOCUMENT_BASE_TYPE: &str = "ecmnt:document";

/// The type of the synthetic container a `Document`'s children live under
/// (spec.md §4.7's `NoChildren` sentinel materializes one of these on first
/// `add_child`), analogous to the original's `cpsnt:children`.
pub const CHILDREN_CONTAINER_TYPE: &str = "ecmnt:children";

/// The runtime representation a loaded node of a given type should take,
/// mirroring `db.py`'s class-dispatch table (`_basic_classes`, and the
/// `isOrExtends` checks in `_loadSchemas`) with a concrete enum instead of
/// a dict of Python classes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ClassKind {
    Document,
    Workspace,
    Container,
    ObjectProperty,
    ListProperty,
}

/// Registry of compiled schemas plus the class-kind hint used to pick a
/// runtime representation for a loaded node. Built once at bootstrap (see
/// `coppice-db`) and shared read-only across every session after that,
/// matching §5's "schema manager is... frozen thereafter".
#[derive(Clone, Debug, Default)]
pub struct SchemaManager {
    schemas: OrderedMap<QName, Schema>,
}

impl SchemaManager {
    pub fn new() -> SchemaManager {
        SchemaManager {
            schemas: OrderedMap::new(),
        }
    }

    /// Registers schemas from a compiled CND batch, in the order the
    /// compiler produced them, preserving deterministic iteration.
    pub fn add_schemas(&mut self, schemas: impl IntoIterator<Item = Schema>) {
        for schema in schemas {
            self.schemas.insert(schema.name.clone(), schema);
        }
    }

    pub fn get_schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(&QName::new(name))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    /// `true` iff `name` transitively extends `DOCUMENT_BASE_TYPE` (or
    /// is that type itself), walking the supertype chain. Unknown
    /// supertypes (system types excluded from full materialization) are
    /// silently treated as non-document, matching the original's
    /// best-effort `isOrExtends` on a possibly-missing interface.
    pub fn is_document(&self, name: &str) -> bool {
        self.is_or_extends(name, DOCUMENT_BASE_TYPE, &mut HashSet::new())
    }

    fn is_or_extends(&self, name: &str, target: &str, seen: &mut HashSet<String>) -> bool {
        if name == target {
            return true;
        }
        if !seen.insert(name.to_owned()) {
            return false;
        }
        let Some(schema) = self.get_schema(name) else {
            return false;
        };
        schema
            .supertypes
            .iter()
            .any(|s| self.is_or_extends(s.as_str(), target, seen))
    }

    /// The runtime class a freshly-unghosted node of this type should be
    /// built as. Containers (wildcard-child schemas) that are not
    /// themselves documents become `Container`; document types become
    /// `Document`; everything else is a plain `ObjectProperty`.
    /// `ListProperty` is never returned here -- the session decides that
    /// dynamically per spec.md §4.6.2, when the wire reports same-name
    /// siblings under a schema that declares the child singular.
    pub fn get_class(&self, name: &str) -> Result<ClassKind> {
        if name == CHILDREN_CONTAINER_TYPE {
            return Ok(ClassKind::Container);
        }
        let schema = self
            .get_schema(name)
            .ok_or_else(|| not_found(format!("unknown node type: {name}")))?;
        if self.is_document(name) {
            Ok(ClassKind::Document)
        } else if schema.is_container() {
            Ok(ClassKind::Container)
        } else {
            Ok(ClassKind::ObjectProperty)
        }
    }

    /// Whether `type_name`'s schema declares `child_name` as a list
    /// property, i.e. same-name siblings of that name must be represented
    /// as a `ListProperty` rather than individually-named children. A
    /// named child can never carry the `multiple` option bit itself (same-
    /// name siblings are rejected at parse time); it is a list property
    /// exactly when its required type is a container
    /// (`db.py::isMultiple` = `IList.providedBy(schema[name])`, which
    /// `cnd.py` only ever produces for a container-typed required type).
    pub fn is_multiple(&self, type_name: &str, child_name: &str) -> bool {
        let Some(schema) = self.get_schema(type_name) else {
            debug!(target: "coppice", "is_multiple: unknown type {type_name}");
            return false;
        };
        schema
            .children
            .get(&QName::new(child_name))
            .map(|decl| decl.list_property)
            .unwrap_or(false)
    }
}
