use std::cell::RefCell;
use std::rc::{Rc, Weak};

use coppice_base::{not_found, value_error, Result};
use coppice_types::{Id, OrderedMap, QName, Value};
use tracing::debug;

use crate::header::{
    ActiveData, ChildrenData, DataState, DocChildren, LoadedChildren, NodeExtra, NodeHeader, ObjectRef, PropertyValue,
    SessionApi,
};
use crate::CHILDREN_NAME;

/// Which runtime shape a node takes, dispatching on a tag instead of a
/// class hierarchy (Design Notes §9's "polymorphism over capability set").
/// `ListProperty` is only ever produced by the session, never by the
/// schema manager directly -- see `coppice_schema::SchemaManager::get_class`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    ObjectProperty,
    ListProperty,
    Container,
    Document,
    Workspace,
}

impl NodeKind {
    fn has_ordered_children(self) -> bool {
        matches!(self, NodeKind::Container | NodeKind::ListProperty)
    }

    fn has_doc_children(self) -> bool {
        matches!(self, NodeKind::Document | NodeKind::Workspace)
    }
}

pub struct NodeObject {
    pub(crate) kind: NodeKind,
    pub(crate) header: NodeHeader,
}

impl NodeObject {
    /// Builds a ghost: known by id, name, and kind, but with no state
    /// loaded yet. `get`/unghostification populate it later via `setstate`.
    pub fn new_ghost(
        id: Id,
        name: String,
        parent: Option<ObjectRef>,
        kind: NodeKind,
        session: Weak<dyn SessionApi>,
    ) -> ObjectRef {
        ObjectRef::new(NodeObject {
            kind,
            header: NodeHeader {
                id: RefCell::new(id),
                name: RefCell::new(name),
                parent: RefCell::new(parent),
                dirty: RefCell::new(false),
                data: RefCell::new(DataState::Ghost),
                session,
            },
        })
    }

    /// Builds a node whose state is already known -- either because the
    /// session just finished unghostifying it, or because it was freshly
    /// created and its initial (empty) state is, by definition, already
    /// correct (spec.md §4.6.1's `create_child`/`new_value`). `orderable`
    /// mirrors the schema's `orderable` type option (spec.md §4.3) and only
    /// matters for `Container`/`ListProperty` kinds: it decides whether an
    /// explicit order list is tracked at all, so `reorder` can reject
    /// unorderable containers instead of silently accepting a no-op order.
    pub fn new_active(
        id: Id,
        name: String,
        parent: Option<ObjectRef>,
        kind: NodeKind,
        primary_type: QName,
        orderable: bool,
        session: Weak<dyn SessionApi>,
    ) -> ObjectRef {
        let extra = if kind.has_ordered_children() {
            NodeExtra::Children(ChildrenData {
                children: OrderedMap::new(),
                order: orderable.then(Vec::new),
            })
        } else if kind.has_doc_children() {
            NodeExtra::DocChildren(DocChildren::NoChildren)
        } else {
            NodeExtra::None
        };
        ObjectRef::new(NodeObject {
            kind,
            header: NodeHeader {
                id: RefCell::new(id),
                name: RefCell::new(name),
                parent: RefCell::new(parent),
                dirty: RefCell::new(false),
                data: RefCell::new(DataState::Active(ActiveData {
                    primary_type,
                    properties: OrderedMap::new(),
                    extra,
                })),
                session,
            },
        })
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn id(&self) -> Id {
        self.header.id.borrow().clone()
    }

    /// Rewrites this object's id in place, used by the session's savepoint
    /// to turn a temporary id into the permanent one the server assigned
    /// (spec.md §4.6.3 step 5). `pub` for the session's benefit only --
    /// application code never has a reason to call this.
    pub fn set_id(&self, id: Id) {
        *self.header.id.borrow_mut() = id;
    }

    pub fn name(&self) -> String {
        self.header.name.borrow().clone()
    }

    pub fn parent(&self) -> Option<ObjectRef> {
        self.header.parent.borrow().clone()
    }

    pub fn is_ghost(&self) -> bool {
        matches!(*self.header.data.borrow(), DataState::Ghost)
    }

    /// Reverts to ghost state, discarding loaded properties/children. The
    /// object's identity (id/name/parent) is untouched, so the next access
    /// transparently reloads it (spec.md §7's "ghostification is the only
    /// automatic recovery").
    pub fn ghostify(&self) {
        *self.header.data.borrow_mut() = DataState::Ghost;
    }

    pub fn is_dirty(&self) -> bool {
        *self.header.dirty.borrow()
    }

    /// `pub` so the session can mark an object dirty for the direct-mutation
    /// guard (spec.md §4.6.3/§7) and after a scalar `set_property`.
    pub fn mark_dirty(&self) {
        *self.header.dirty.borrow_mut() = true;
    }

    /// `pub` so the session can clear the dirty bit once a savepoint has
    /// flushed an object's changes.
    pub fn clear_dirty(&self) {
        *self.header.dirty.borrow_mut() = false;
    }

    /// Populates a ghost's state from a session-assembled description
    /// (spec.md §4.6.2). `pub`: the session is the only caller outside this
    /// crate, driving unghostification after a `get_node_states` round trip
    /// or an indirectly-seeded list-property fabrication.
    pub fn load_state(&self, primary_type: QName, properties: Vec<(QName, PropertyValue)>, children: LoadedChildren) {
        let extra = match children {
            LoadedChildren::None => NodeExtra::None,
            LoadedChildren::Ordered { entries, orderable } => {
                let mut children = OrderedMap::new();
                let mut order = Vec::new();
                for (name, child) in entries {
                    order.push(name.clone());
                    children.insert(name, child);
                }
                NodeExtra::Children(ChildrenData {
                    children,
                    order: orderable.then_some(order),
                })
            }
            LoadedChildren::DocNone => NodeExtra::DocChildren(DocChildren::NoChildren),
            LoadedChildren::DocMaterialized(holder) => NodeExtra::DocChildren(DocChildren::Materialized(holder)),
        };
        let mut properties_map = OrderedMap::new();
        for (name, value) in properties {
            properties_map.insert(name, value);
        }
        *self.header.data.borrow_mut() = DataState::Active(ActiveData {
            primary_type,
            properties: properties_map,
            extra,
        });
    }

    fn session(&self) -> Result<Rc<dyn SessionApi>> {
        self.header
            .session
            .upgrade()
            .ok_or_else(|| value_error("session dropped while object still referenced"))
    }

    fn ensure_loaded(&self, self_ref: &ObjectRef) -> Result<()> {
        if self.is_ghost() {
            self.session()?.ensure_loaded(self_ref)?;
        }
        Ok(())
    }

    fn with_active<R>(&self, f: impl FnOnce(&ActiveData) -> Result<R>) -> Result<R> {
        match &*self.header.data.borrow() {
            DataState::Active(data) => f(data),
            DataState::Ghost => Err(value_error("object still a ghost: caller must ensure_loaded first")),
        }
    }

    pub fn primary_type(&self, self_ref: &ObjectRef) -> Result<QName> {
        self.ensure_loaded(self_ref)?;
        self.with_active(|data| Ok(data.primary_type.clone()))
    }

    /// Reads a scalar property value. Returns `Ok(None)` for an absent
    /// property, and errors if the named property is complex (use
    /// `get_complex` instead).
    pub fn get_property(&self, self_ref: &ObjectRef, name: &str) -> Result<Option<Value>> {
        self.ensure_loaded(self_ref)?;
        self.with_active(|data| match data.properties.get(&QName::new(name)) {
            None => Ok(None),
            Some(PropertyValue::Scalar(v)) => Ok(Some(v.clone())),
            Some(PropertyValue::Complex(_)) => Err(value_error(format!("{name} is a complex property, not a scalar"))),
        })
    }

    pub fn get_complex(&self, self_ref: &ObjectRef, name: &str) -> Result<Option<ObjectRef>> {
        self.ensure_loaded(self_ref)?;
        self.with_active(|data| match data.properties.get(&QName::new(name)) {
            None => Ok(None),
            Some(PropertyValue::Complex(obj)) => Ok(Some(obj.clone())),
            Some(PropertyValue::Scalar(_)) => Err(value_error(format!("{name} is a scalar property, not complex"))),
        })
    }

    pub fn is_checked_out(&self, self_ref: &ObjectRef) -> Result<bool> {
        match self.get_property(self_ref, crate::constants::IS_CHECKED_OUT)? {
            Some(Value::Boolean(b)) => Ok(b),
            Some(_) => Err(value_error("jcr:isCheckedOut is not boolean")),
            None => Ok(true),
        }
    }

    fn children_data<R>(&self, f: impl FnOnce(&ChildrenData) -> Result<R>) -> Result<R> {
        self.with_active(|data| match &data.extra {
            NodeExtra::Children(c) => f(c),
            _ => Err(value_error("object has no ordered children")),
        })
    }

    pub fn child(&self, self_ref: &ObjectRef, name: &str) -> Result<Option<ObjectRef>> {
        self.ensure_loaded(self_ref)?;
        if self.kind.has_doc_children() {
            return match self.doc_children()? {
                DocChildren::NoChildren => Ok(None),
                DocChildren::Materialized(holder) => holder.child(name),
            };
        }
        self.children_data(|c| Ok(c.children.get(name).cloned()))
    }

    pub fn children(&self, self_ref: &ObjectRef) -> Result<Vec<ObjectRef>> {
        self.ensure_loaded(self_ref)?;
        if self.kind.has_doc_children() {
            return match self.doc_children()? {
                DocChildren::NoChildren => Ok(Vec::new()),
                DocChildren::Materialized(holder) => holder.children(),
            };
        }
        self.children_data(|c| match &c.order {
            Some(order) => Ok(order.iter().filter_map(|n| c.children.get(n).cloned()).collect()),
            None => Ok(c.children.values().cloned().collect()),
        })
    }

    fn doc_children(&self) -> Result<DocChildren> {
        self.with_active(|data| match &data.extra {
            NodeExtra::DocChildren(dc) => Ok(dc.clone()),
            _ => Err(value_error("object has no document-style children")),
        })
    }

    pub(crate) fn child_names_in_order(&self) -> Result<Vec<String>> {
        self.children_data(|c| match &c.order {
            Some(order) => Ok(order.clone()),
            None => Ok(c.children.keys().cloned().collect()),
        })
    }

    pub(crate) fn insert_child(&self, name: String, child: ObjectRef) -> Result<()> {
        self.with_active_mut(|data| match &mut data.extra {
            NodeExtra::Children(c) => {
                if c.children.contains_key(&name) {
                    return Err(value_error(format!("duplicate child name: {name}")));
                }
                if let Some(order) = &mut c.order {
                    order.push(name.clone());
                }
                c.children.insert(name, child);
                Ok(())
            }
            _ => Err(value_error("object cannot hold ordered children")),
        })
    }

    pub(crate) fn remove_child_entry(&self, name: &str) -> Result<()> {
        self.with_active_mut(|data| match &mut data.extra {
            NodeExtra::Children(c) => {
                if c.children.remove(name).is_none() {
                    return Err(value_error(format!("no such child: {name}")));
                }
                if let Some(order) = &mut c.order {
                    order.retain(|n| n != name);
                }
                Ok(())
            }
            _ => Err(value_error("object cannot hold ordered children")),
        })
    }

    pub(crate) fn reorder_entries(&self, new_order: Vec<String>) -> Result<()> {
        self.with_active_mut(|data| match &mut data.extra {
            NodeExtra::Children(c) => {
                let Some(order) = &mut c.order else {
                    return Err(value_error("container is not orderable"));
                };
                let mut a: Vec<&str> = order.iter().map(String::as_str).collect();
                a.sort_unstable();
                let mut b: Vec<&str> = new_order.iter().map(String::as_str).collect();
                b.sort_unstable();
                if a != b {
                    return Err(value_error("reorder does not preserve the same set of names"));
                }
                *order = new_order;
                Ok(())
            }
            _ => Err(value_error("object cannot be reordered")),
        })
    }

    pub(crate) fn materialize_doc_children(&self, holder: ObjectRef) -> Result<()> {
        self.with_active_mut(|data| match &mut data.extra {
            NodeExtra::DocChildren(slot @ DocChildren::NoChildren) => {
                *slot = DocChildren::Materialized(holder);
                Ok(())
            }
            NodeExtra::DocChildren(DocChildren::Materialized(_)) => Err(value_error("children already materialized")),
            _ => Err(value_error("object has no document-style children")),
        })
    }

    /// `pub`: the session implements `set_property`'s actual bookkeeping by
    /// calling this directly, after deciding (via `property_entry`) whether
    /// the name previously held a scalar or a complex value.
    pub fn set_property_entry(&self, name: QName, value: Option<PropertyValue>) -> Result<()> {
        self.with_active_mut(|data| {
            match value {
                Some(v) => {
                    data.properties.insert(name, v);
                }
                None => {
                    data.properties.remove(&name);
                }
            }
            Ok(())
        })
    }

    /// `pub`: lets the session inspect whether `name` is currently absent,
    /// scalar, or complex before deciding how to apply a `set_property`.
    pub fn property_entry(&self, name: &QName) -> Result<Option<PropertyValue>> {
        self.with_active(|data| Ok(data.properties.get(name).cloned()))
    }

    /// `pub`: the session gathers these at savepoint time to build an
    /// `add`/`modify` command's property list (spec.md §4.6.3).
    pub fn all_simple_properties(&self) -> Result<Vec<(QName, Value)>> {
        self.with_active(|data| {
            Ok(data
                .properties
                .iter()
                .filter_map(|(k, v)| match v {
                    PropertyValue::Scalar(val) => Some((k.clone(), val.clone())),
                    PropertyValue::Complex(_) => None,
                })
                .collect())
        })
    }

    fn with_active_mut<R>(&self, f: impl FnOnce(&mut ActiveData) -> Result<R>) -> Result<R> {
        match &mut *self.header.data.borrow_mut() {
            DataState::Active(data) => f(data),
            DataState::Ghost => Err(value_error("object still a ghost: caller must ensure_loaded first")),
        }
    }
}

// ---- Public mutating API, implemented on `ObjectRef` so every method has
// a cheap owned handle on `self` to pass across the `SessionApi` boundary
// (spec.md §4.7: "every persistent object routes mutations through its
// owning session").
impl ObjectRef {
    pub fn set_property(&self, name: &str, value: Option<Value>) -> Result<()> {
        let session = self.session()?;
        session.set_property(self, &QName::new(name), value)
    }

    pub fn get_property(&self, name: &str) -> Result<Option<Value>> {
        NodeObject::get_property(self, self, name)
    }

    pub fn get_complex(&self, name: &str) -> Result<Option<ObjectRef>> {
        NodeObject::get_complex(self, self, name)
    }

    pub fn primary_type(&self) -> Result<QName> {
        NodeObject::primary_type(self, self)
    }

    pub fn child(&self, name: &str) -> Result<Option<ObjectRef>> {
        NodeObject::child(self, self, name)
    }

    pub fn children(&self) -> Result<Vec<ObjectRef>> {
        NodeObject::children(self, self)
    }

    /// `add_child(name, type)`: rejects duplicates, delegates construction
    /// to the session, inserts into the ordered child map. Materializes a
    /// `Document`'s `NoChildren` sentinel into a real `ecm:children`
    /// container on first use, then delegates to that container instead.
    pub fn add_child(&self, name: &str, type_name: &QName) -> Result<ObjectRef> {
        self.ensure_loaded(self)?;
        if self.kind.has_doc_children() {
            let holder = match self.doc_children()? {
                DocChildren::Materialized(holder) => holder,
                DocChildren::NoChildren => {
                    let session = self.session()?;
                    let holder = session.create_child(self, CHILDREN_NAME, &QName::new(coppice_schema::CHILDREN_CONTAINER_TYPE))?;
                    debug!(target: "coppice", parent = %self.id(), "materializing ecm:children container");
                    self.materialize_doc_children(holder.clone())?;
                    holder
                }
            };
            return holder.add_child(name, type_name);
        }
        if self.children_data(|c| Ok(c.children.contains_key(name)))? {
            return Err(value_error(format!("duplicate child name: {name}")));
        }
        let session = self.session()?;
        let child = session.create_child(self, name, type_name)?;
        self.insert_child(name.to_owned(), child.clone())?;
        Ok(child)
    }

    pub fn remove_child(&self, name: &str) -> Result<()> {
        self.ensure_loaded(self)?;
        let child = self
            .child(name)?
            .ok_or_else(|| not_found(format!("no such child: {name}")))?;
        let session = self.session()?;
        session.delete_node(&child)?;
        if self.kind.has_doc_children() {
            if let DocChildren::Materialized(holder) = self.doc_children()? {
                return holder.remove_child_entry(name);
            }
            return Ok(());
        }
        self.remove_child_entry(name)
    }

    pub fn reorder(&self, new_order: Vec<String>) -> Result<()> {
        self.ensure_loaded(self)?;
        if self.kind.has_doc_children() {
            return match self.doc_children()? {
                DocChildren::Materialized(holder) => holder.reorder(new_order),
                DocChildren::NoChildren => {
                    if new_order.is_empty() {
                        Ok(())
                    } else {
                        Err(value_error("cannot reorder: document has no children yet"))
                    }
                }
            };
        }
        let old_order = self.child_names_in_order()?;
        if old_order == new_order {
            return Ok(());
        }
        let session = self.session()?;
        session.reorder_children(self, old_order, new_order.clone())?;
        self.reorder_entries(new_order)
    }

    /// `ListProperty::add_value`: create one item using the value schema,
    /// auto-generating a name if none was provided.
    pub fn add_value(&self, name: Option<&str>) -> Result<ObjectRef> {
        if self.kind != NodeKind::ListProperty {
            return Err(value_error("add_value is only valid on a list property"));
        }
        self.ensure_loaded(self)?;
        let session = self.session()?;
        let child = session.new_value(self, name)?;
        let assigned = child.name();
        self.insert_child(assigned, child.clone())?;
        Ok(child)
    }

    pub fn checkin(&self) -> Result<()> {
        self.session()?.checkin(self)
    }

    pub fn checkout(&self) -> Result<()> {
        self.session()?.checkout(self)
    }

    pub fn is_checked_out(&self) -> Result<bool> {
        NodeObject::is_checked_out(self, self)
    }

    /// Mutates crate-internal state directly, bypassing `set_property`, to
    /// exercise the "illegal direct mutation" guard spec.md §7 describes;
    /// not meant for production call sites.
    pub fn debug_direct_mutate(&self) -> Result<()> {
        let session = self.session()?;
        session.register_direct(self);
        Ok(())
    }
}
