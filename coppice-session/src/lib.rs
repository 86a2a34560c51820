//! The client session: identity-map object cache, lazy loading, and the
//! write-buffering/two-phase-commit machinery that turns a batch of
//! `ObjectRef` mutations into mutation-block round trips (spec.md §4.6).
//! Mirrors `db.py`'s `Connection` the way `coppice-controller` mirrors
//! `controller.py` -- one verb-shaped method per operation, state held in
//! `RefCell`s because a session is single-threaded but its objects need
//! interior mutability to route back through it.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use coppice_base::{not_found, protocol_error, value_error, Result};
use coppice_cache::ObjectCache;
use coppice_controller::Controller;
use coppice_model::security::{
    decode_local_roles, decode_security, encode_local_roles, encode_security, LocalRoleEntry, PermissionEntry,
};
use coppice_model::{LoadedChildren, NodeKind, NodeObject, ObjectRef, PropertyValue, SessionApi, LOCAL_ROLES_PROPERTY, SECURITY_PROPERTY};
use coppice_schema::{ClassKind, SchemaManager, CHILDREN_CONTAINER_TYPE};
use coppice_types::{Id, QName, Value};
use coppice_wire::{ChildRef, MutationCommand, NodeState, PropertyState, Transport};

/// A marker name stashed in `registered` instead of a real property name
/// when `register_direct` fires (spec.md §7's "illegal direct mutation"
/// guard). No real `QName` the wire could ever produce collides with it, so
/// its presence in a savepoint's changed-name set can only mean one thing.
const DIRECT_MUTATION_MARKER: &str = "\0coppice:direct-mutation";

/// One client session against one repository workspace. Wraps a
/// [`Controller`] and adds everything it doesn't know about: the object
/// cache, the add/modify/remove write buffer, and temporary-id bookkeeping.
pub struct Session<T> {
    controller: RefCell<Controller<T>>,
    schemas: Rc<SchemaManager>,
    cache: RefCell<ObjectCache<ObjectRef>>,
    /// The node type of every id the session has ever minted or resolved,
    /// needed at `ensure_loaded` time since a wire `NodeState` carries its
    /// children's types but never the node's own (`get_node_type` is a
    /// separate verb, spec.md §4.1).
    types: RefCell<HashMap<Id, QName>>,
    added: RefCell<HashMap<Id, ObjectRef>>,
    added_order: RefCell<Vec<Id>>,
    registered: RefCell<HashMap<Id, HashSet<QName>>>,
    created: RefCell<Vec<Id>>,
    modified: RefCell<Vec<Id>>,
    commands: RefCell<Vec<MutationCommand>>,
    pending_states: RefCell<HashMap<Id, NodeState>>,
    next_tmp_id: Cell<u64>,
    root_id: Id,
    self_weak: RefCell<Weak<dyn SessionApi>>,
}

impl<T: Transport> Session<T> {
    /// Logs into `workspace` and returns a session with its root object
    /// already known (as a ghost -- nothing is fetched until something asks
    /// for the root's properties or children).
    pub fn open(mut controller: Controller<T>, workspace: &str, schemas: Rc<SchemaManager>, cache_capacity: usize) -> Result<Rc<Session<T>>> {
        let root_id = controller.login(workspace)?;
        let root_type = controller.get_node_type(&root_id)?;

        let session = Rc::new(Session {
            controller: RefCell::new(controller),
            schemas,
            cache: RefCell::new(ObjectCache::new(cache_capacity)),
            types: RefCell::new(HashMap::new()),
            added: RefCell::new(HashMap::new()),
            added_order: RefCell::new(Vec::new()),
            registered: RefCell::new(HashMap::new()),
            created: RefCell::new(Vec::new()),
            modified: RefCell::new(Vec::new()),
            commands: RefCell::new(Vec::new()),
            pending_states: RefCell::new(HashMap::new()),
            next_tmp_id: Cell::new(0),
            root_id: root_id.clone(),
            self_weak: RefCell::new(Weak::new()),
        });
        let dyn_session: Rc<dyn SessionApi> = session.clone();
        *session.self_weak.borrow_mut() = Rc::downgrade(&dyn_session);

        session.types.borrow_mut().insert(root_id.clone(), root_type);
        let root = NodeObject::new_ghost(root_id.clone(), String::new(), None, NodeKind::Workspace, session.weak());
        session.cache.borrow_mut().set(root_id, root);

        Ok(session)
    }

    fn weak(&self) -> Weak<dyn SessionApi> {
        self.self_weak.borrow().clone()
    }

    /// The workspace root, per spec.md §4.6: always `NodeKind::Workspace`,
    /// an override the schema manager never produces on its own.
    pub fn root(&self) -> Result<ObjectRef> {
        self.get(self.root_id.clone(), None)
    }

    /// Resolves `id` to an `ObjectRef`, reusing the cached one if the
    /// session has already seen it. `kind_hint` carries the kind and node
    /// type already known from context (a `ChildRef` on the wire); `None`
    /// forces an extra `get_node_type` round trip, used only for an id
    /// reached some other way (e.g. `search_property`).
    pub fn get(&self, id: Id, kind_hint: Option<(NodeKind, QName)>) -> Result<ObjectRef> {
        if let Some(existing) = self.cache.borrow_mut().get(&id) {
            return Ok(existing);
        }
        let (kind, type_name) = match kind_hint {
            Some(kt) => kt,
            None => {
                let type_name = self.controller.borrow_mut().get_node_type(&id)?;
                let kind = self.class_kind_for(&type_name)?;
                (kind, type_name)
            }
        };
        self.types.borrow_mut().insert(id.clone(), type_name);
        let name = self
            .controller
            .borrow_mut()
            .get_path(&id)?
            .as_deref()
            .and_then(|p| p.rsplit('/').next())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| id.to_string());
        let ghost = NodeObject::new_ghost(id.clone(), name, None, kind, self.weak());
        self.cache.borrow_mut().set(id, ghost.clone());
        Ok(ghost)
    }

    fn class_kind_for(&self, type_name: &QName) -> Result<NodeKind> {
        match self.schemas.get_class(type_name.as_str())? {
            ClassKind::Document => Ok(NodeKind::Document),
            ClassKind::Container => Ok(NodeKind::Container),
            ClassKind::ObjectProperty => Ok(NodeKind::ObjectProperty),
            other @ (ClassKind::Workspace | ClassKind::ListProperty) => {
                Err(protocol_error(format!("schema manager unexpectedly classified {type_name} as {other:?}")))
            }
        }
    }

    fn mint_temp_id(&self) -> Id {
        let n = self.next_tmp_id.get();
        self.next_tmp_id.set(n + 1);
        Id::temp(n)
    }

    fn orderable_for(&self, type_name: &QName) -> bool {
        self.schemas.get_schema(type_name.as_str()).map(|s| s.options.orderable).unwrap_or(false)
    }

    // ---- loading ----------------------------------------------------

    fn apply_state(&self, object: &ObjectRef, state: NodeState) -> Result<()> {
        let id = object.id();
        let primary_type = self
            .types
            .borrow()
            .get(&id)
            .cloned()
            .ok_or_else(|| protocol_error(format!("no known node type for {id}")))?;
        let kind = object.kind();

        let mut simple_properties = Vec::new();
        for (name, prop) in state.properties.into_iter() {
            match prop {
                // Reserved for lazy binary fetch (spec.md §4.6.2); not acted
                // on at load time.
                PropertyState::Deferred => continue,
                PropertyState::Single(v) => simple_properties.push((name, PropertyValue::Scalar(v))),
                PropertyState::Multiple(values) => simple_properties.push((name, PropertyValue::Scalar(Value::Multiple(values)))),
            }
        }

        let loaded_children = match kind {
            NodeKind::Document | NodeKind::Workspace => {
                if state.children.is_empty() {
                    LoadedChildren::DocNone
                } else {
                    let holder = self.fabricate_container(object, "children", NodeKind::Container, QName::new(CHILDREN_CONTAINER_TYPE), state.children)?;
                    LoadedChildren::DocMaterialized(holder)
                }
            }
            NodeKind::Container => {
                let orderable = self.orderable_for(&primary_type);
                let entries = self.grouped_children(object, &primary_type, state.children)?;
                LoadedChildren::Ordered { entries, orderable }
            }
            NodeKind::ListProperty => {
                let entries = self.flat_ordered_children(state.children)?;
                LoadedChildren::Ordered { entries, orderable: true }
            }
            NodeKind::ObjectProperty => {
                let complex = self.grouped_children(object, &primary_type, state.children)?;
                for (name, obj) in complex {
                    simple_properties.push((QName::new(name), PropertyValue::Complex(obj)));
                }
                LoadedChildren::None
            }
        };

        object.load_state(primary_type, simple_properties, loaded_children);
        Ok(())
    }

    /// Groups same-name siblings: a lone child of a name the schema doesn't
    /// declare `multiple` becomes a plain child entry; more than one child
    /// under a name, or a schema that says the name is always multiple,
    /// becomes a fabricated `ListProperty` holding all of them (spec.md
    /// §4.6.2's on-the-fly list-property fabrication).
    fn grouped_children(&self, owner: &ObjectRef, owner_type: &QName, children: Vec<ChildRef>) -> Result<Vec<(String, ObjectRef)>> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<ChildRef>> = HashMap::new();
        for child in children {
            if !groups.contains_key(&child.name) {
                order.push(child.name.clone());
            }
            groups.entry(child.name.clone()).or_default().push(child);
        }

        let mut entries = Vec::new();
        for name in order {
            let mut refs = groups.remove(&name).expect("group present for every recorded name");
            if refs.len() > 1 || self.schemas.is_multiple(owner_type.as_str(), &name) {
                let item_type = refs[0].primary_type.clone();
                let list_obj = self.fabricate_container(owner, &format!("list:{name}"), NodeKind::ListProperty, item_type, refs)?;
                entries.push((name, list_obj));
            } else {
                let child_ref = refs.remove(0);
                let kind = self.class_kind_for(&child_ref.primary_type)?;
                let child = self.get(child_ref.id, Some((kind, child_ref.primary_type)))?;
                entries.push((name, child));
            }
        }
        Ok(entries)
    }

    /// Children of a fabricated list property are already individually
    /// identified; they're listed in wire order, keyed by id since several
    /// may share the property's own name.
    fn flat_ordered_children(&self, children: Vec<ChildRef>) -> Result<Vec<(String, ObjectRef)>> {
        let mut entries = Vec::new();
        for child in children {
            let kind = self.class_kind_for(&child.primary_type)?;
            let key = child.id.to_string();
            let obj = self.get(child.id.clone(), Some((kind, child.primary_type.clone())))?;
            entries.push((key, obj));
        }
        Ok(entries)
    }

    /// Builds (or refreshes) a synthetic holder node -- a `Document`'s
    /// `ecm:children` container, or a fabricated `ListProperty` -- pre-
    /// seeding its state in `pending_states` so the first `ensure_loaded`
    /// on it costs no extra round trip (spec.md §4.6.2's "indirect,
    /// round-trip-free" loading).
    fn fabricate_container(&self, owner: &ObjectRef, suffix: &str, kind: NodeKind, primary_type: QName, children: Vec<ChildRef>) -> Result<ObjectRef> {
        let synthetic_id = Id::permanent(format!("{}::{suffix}", owner.id()));
        self.types.borrow_mut().insert(synthetic_id.clone(), primary_type.clone());

        let mut state = NodeState::new(synthetic_id.clone(), suffix.to_owned());
        state.children = children;
        self.pending_states.borrow_mut().insert(synthetic_id.clone(), state);

        if let Some(existing) = self.cache.borrow_mut().get(&synthetic_id) {
            existing.ghostify();
            return Ok(existing);
        }
        let ghost = NodeObject::new_ghost(synthetic_id.clone(), suffix.to_owned(), Some(owner.clone()), kind, self.weak());
        self.cache.borrow_mut().set(synthetic_id, ghost.clone());
        Ok(ghost)
    }

    // ---- writing: add/modify/remove buffer, savepoint, 2PC -----------

    fn register_added(&self, id: Id, object: ObjectRef) {
        self.cache.borrow_mut().set(id.clone(), object.clone());
        self.added.borrow_mut().insert(id.clone(), object);
        self.added_order.borrow_mut().push(id);
    }

    fn mark_registered(&self, id: &Id, name: QName) {
        if id.is_temp() {
            return;
        }
        self.registered.borrow_mut().entry(id.clone()).or_default().insert(name);
    }

    /// Flushes the write buffer: every added object becomes an `Add`
    /// command (carrying its simple properties), every name registered as
    /// changed on an existing object becomes part of a `Modify`, and any
    /// queued `Remove`/`Reorder` commands tag along -- one `send_commands`
    /// round trip, then temp-id remapping (spec.md §4.6.3's seven steps).
    pub fn savepoint(&self) -> Result<()> {
        for (id, names) in self.registered.borrow().iter() {
            if names.contains(&QName::new(DIRECT_MUTATION_MARKER)) {
                return Err(value_error(format!("illegal direct mutation on {id}: unknown property changed outside the session API")));
            }
        }

        let mut commands = Vec::new();

        let added_order = self.added_order.borrow().clone();
        {
            let added = self.added.borrow();
            for id in &added_order {
                let obj = added.get(id).ok_or_else(|| value_error(format!("missing added object {id}")))?;
                let parent = obj.parent().ok_or_else(|| value_error(format!("added object {id} has no parent")))?;
                let properties = obj
                    .all_simple_properties()?
                    .into_iter()
                    .map(|(name, value)| (name, value_to_property_state(value)))
                    .collect();
                commands.push(MutationCommand::Add {
                    parent: parent.id(),
                    primary_type: obj.primary_type()?,
                    token: id.to_string(),
                    name: obj.name(),
                    properties,
                });
            }
        }

        {
            let registered = self.registered.borrow();
            for (id, names) in registered.iter() {
                let obj = self.cache.borrow_mut().get(id).ok_or_else(|| not_found(format!("no such cached object: {id}")))?;
                let mut properties = Vec::new();
                for name in names {
                    let state = match obj.property_entry(name)? {
                        Some(PropertyValue::Scalar(v)) => value_to_property_state(v),
                        Some(PropertyValue::Complex(_)) => continue,
                        None => PropertyState::Deferred,
                    };
                    properties.push((name.clone(), state));
                }
                commands.push(MutationCommand::Modify { id: id.clone(), properties });
            }
        }

        commands.extend(self.commands.borrow_mut().drain(..));

        if commands.is_empty() {
            return Ok(());
        }

        let assignments = self.controller.borrow_mut().send_commands(&commands)?;
        let by_token: HashMap<String, Id> = assignments.into_iter().map(|a| (a.token, a.id)).collect();

        {
            let mut added = self.added.borrow_mut();
            for id in &added_order {
                let Some(obj) = added.remove(id) else { continue };
                let token = id.to_string();
                let permanent = by_token
                    .get(&token)
                    .cloned()
                    .ok_or_else(|| protocol_error(format!("no id assignment returned for token {token}")))?;
                obj.set_id(permanent.clone());
                obj.clear_dirty();
                {
                    let mut cache = self.cache.borrow_mut();
                    cache.remove(id);
                    cache.set(permanent.clone(), obj);
                }
                if let Some(ty) = self.types.borrow_mut().remove(id) {
                    self.types.borrow_mut().insert(permanent.clone(), ty);
                }
                self.created.borrow_mut().push(permanent);
            }
        }
        self.added_order.borrow_mut().clear();

        {
            let registered = self.registered.borrow();
            let mut cache = self.cache.borrow_mut();
            for id in registered.keys() {
                if let Some(obj) = cache.get(id) {
                    obj.clear_dirty();
                }
            }
        }
        let modified_ids: Vec<Id> = self.registered.borrow_mut().drain().map(|(id, _)| id).collect();
        self.modified.borrow_mut().extend(modified_ids);

        Ok(())
    }

    /// Flushes pending changes and asks the repository to prepare them
    /// (spec.md §4.6.3): `commit` only gets as far as the optimistic-
    /// concurrency check; `tpc_vote` is the point of no return.
    pub fn commit(&self) -> Result<()> {
        self.savepoint()?;
        self.controller.borrow_mut().prepare()
    }

    pub fn tpc_vote(&self) -> Result<()> {
        self.controller.borrow_mut().commit()
    }

    pub fn tpc_finish(&self) {
        self.created.borrow_mut().clear();
        self.modified.borrow_mut().clear();
    }

    /// Rolls back: tells the repository, then invalidates every object this
    /// transaction touched and disowns everything it added, so nothing in
    /// the identity map still reflects unconfirmed writes.
    pub fn abort(&self) -> Result<()> {
        self.controller.borrow_mut().abort()?;
        {
            let mut cache = self.cache.borrow_mut();
            for id in self.modified.borrow().iter() {
                cache.invalidate(id);
            }
            for id in self.registered.borrow().keys() {
                cache.invalidate(id);
            }
            for id in self.added_order.borrow().iter() {
                cache.remove(id);
            }
        }
        self.added.borrow_mut().clear();
        self.added_order.borrow_mut().clear();
        self.registered.borrow_mut().clear();
        self.commands.borrow_mut().clear();
        self.modified.borrow_mut().clear();
        Ok(())
    }

    pub fn tpc_abort(&self) -> Result<()> {
        self.abort()
    }

    // ---- security / local roles (SPEC_FULL.md §5.6) -------------------

    /// Decodes `ecm:security` on demand; an object with no such property
    /// simply has no permission entries.
    pub fn security_of(&self, object: &ObjectRef) -> Result<Vec<PermissionEntry>> {
        match object.get_property(SECURITY_PROPERTY)? {
            Some(Value::String(s)) => decode_security(&s),
            Some(_) => Err(value_error(format!("{SECURITY_PROPERTY} is not a string"))),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_security(&self, object: &ObjectRef, entries: &[PermissionEntry]) -> Result<()> {
        object.set_property(SECURITY_PROPERTY, encode_security(entries).map(Value::String))
    }

    pub fn local_roles_of(&self, object: &ObjectRef) -> Result<Vec<LocalRoleEntry>> {
        match object.get_property(LOCAL_ROLES_PROPERTY)? {
            Some(Value::String(s)) => decode_local_roles(&s),
            Some(_) => Err(value_error(format!("{LOCAL_ROLES_PROPERTY} is not a string"))),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_local_roles(&self, object: &ObjectRef, entries: &[LocalRoleEntry]) -> Result<()> {
        object.set_property(LOCAL_ROLES_PROPERTY, encode_local_roles(entries).map(Value::String))
    }
}

fn value_to_property_state(value: Value) -> PropertyState {
    match value {
        Value::Multiple(values) => PropertyState::Multiple(values),
        other => PropertyState::Single(other),
    }
}

/// Computes the minimal sequence of `(name, before)` insert-before pairs
/// that transforms `old` into `new` over the same set of names (spec.md
/// §4.6.1): scan left to right, and at the first mismatch, move the name
/// `new` wants there to just before whatever currently sits there.
fn compute_insert_before(old: &[String], new: &[String]) -> Result<Vec<(String, String)>> {
    let mut a: Vec<&str> = old.iter().map(String::as_str).collect();
    a.sort_unstable();
    let mut b: Vec<&str> = new.iter().map(String::as_str).collect();
    b.sort_unstable();
    if a != b {
        return Err(value_error("reorder does not preserve the same set of names"));
    }

    let mut cur = old.to_vec();
    let mut moves = Vec::new();
    loop {
        let Some(i) = cur.iter().zip(new.iter()).position(|(have, want)| have != want) else {
            break;
        };
        let name = new[i].clone();
        let before = cur[i].clone();
        moves.push((name.clone(), before.clone()));
        let from = cur.iter().position(|n| n == &name).expect("name is a member of cur");
        cur.remove(from);
        let to = cur.iter().position(|n| n == &before).expect("before is a member of cur");
        cur.insert(to, name);
    }
    Ok(moves)
}

impl<T: Transport> SessionApi for Session<T> {
    fn ensure_loaded(&self, object: &ObjectRef) -> Result<()> {
        let id = object.id();
        let state = match self.pending_states.borrow_mut().remove(&id) {
            Some(state) => state,
            None => {
                let mut states = self.controller.borrow_mut().get_node_states(&[id.clone()])?;
                if states.len() != 1 {
                    return Err(not_found(format!("server returned no state for {id}")));
                }
                states.remove(0)
            }
        };
        self.apply_state(object, state)
    }

    fn set_property(&self, object: &ObjectRef, name: &QName, value: Option<Value>) -> Result<()> {
        let id = object.id();
        let previous = object.property_entry(name)?;
        match (value, previous) {
            (None, Some(PropertyValue::Complex(child))) => {
                self.commands.borrow_mut().push(MutationCommand::Remove { id: child.id() });
                object.set_property_entry(name.clone(), None)?;
            }
            (None, _) => {
                object.set_property_entry(name.clone(), None)?;
            }
            (Some(_), Some(PropertyValue::Complex(_))) => {
                return Err(value_error(format!("{name} is a complex property; use create_child/add_value to change it")));
            }
            (Some(v), None) => {
                let primary_type = object.primary_type()?;
                let is_complex_field = self
                    .schemas
                    .get_schema(primary_type.as_str())
                    .map(|s| s.children.contains_key(name))
                    .unwrap_or(false);
                if is_complex_field {
                    return Err(value_error(format!("{name} is a complex property; use create_child/add_value to set it")));
                }
                object.set_property_entry(name.clone(), Some(PropertyValue::Scalar(v)))?;
            }
            (Some(v), Some(PropertyValue::Scalar(_))) => {
                object.set_property_entry(name.clone(), Some(PropertyValue::Scalar(v)))?;
            }
        }
        object.mark_dirty();
        self.mark_registered(&id, name.clone());
        Ok(())
    }

    fn new_value(&self, list_property: &ObjectRef, name: Option<&str>) -> Result<ObjectRef> {
        if list_property.kind() != NodeKind::ListProperty {
            return Err(value_error("new_value is only valid on a list property"));
        }
        let item_type = list_property.primary_type()?;
        let id = self.mint_temp_id();
        let assigned = name.map(str::to_owned).unwrap_or_else(|| id.to_string());
        let orderable = self.orderable_for(&item_type);
        let kind = self.class_kind_for(&item_type)?;
        self.types.borrow_mut().insert(id.clone(), item_type.clone());
        let child = NodeObject::new_active(id.clone(), assigned, Some(list_property.clone()), kind, item_type, orderable, self.weak());
        self.register_added(id, child.clone());
        Ok(child)
    }

    fn create_child(&self, container: &ObjectRef, name: &str, type_name: &QName) -> Result<ObjectRef> {
        let id = self.mint_temp_id();
        let kind = self.class_kind_for(type_name)?;
        let orderable = self.orderable_for(type_name);
        self.types.borrow_mut().insert(id.clone(), type_name.clone());
        let child = NodeObject::new_active(id.clone(), name.to_owned(), Some(container.clone()), kind, type_name.clone(), orderable, self.weak());
        self.register_added(id, child.clone());
        Ok(child)
    }

    fn delete_node(&self, object: &ObjectRef) -> Result<()> {
        let id = object.id();
        if id.is_temp() {
            self.added.borrow_mut().remove(&id);
            self.added_order.borrow_mut().retain(|i| i != &id);
            self.cache.borrow_mut().remove(&id);
            return Ok(());
        }
        self.commands.borrow_mut().push(MutationCommand::Remove { id });
        self.savepoint()
    }

    fn reorder_children(&self, object: &ObjectRef, old_order: Vec<String>, new_order: Vec<String>) -> Result<()> {
        if old_order == new_order {
            return Ok(());
        }
        let moves = compute_insert_before(&old_order, &new_order)?;
        self.commands.borrow_mut().push(MutationCommand::Reorder { parent: object.id(), moves });
        self.savepoint()
    }

    fn checkin(&self, object: &ObjectRef) -> Result<()> {
        self.savepoint()?;
        let id = object.id();
        self.controller.borrow_mut().checkpoint(&id)?;
        self.cache.borrow_mut().invalidate(&id);
        Ok(())
    }

    fn checkout(&self, object: &ObjectRef) -> Result<()> {
        self.savepoint()?;
        let id = object.id();
        self.controller.borrow_mut().restore(&id, "")?;
        self.cache.borrow_mut().invalidate(&id);
        Ok(())
    }

    fn register_direct(&self, object: &ObjectRef) {
        let id = object.id();
        tracing::warn!(target: "coppice", id = %id, "illegal direct mutation outside the session API");
        object.mark_dirty();
        if !id.is_temp() {
            self.registered.borrow_mut().entry(id).or_default().insert(QName::new(DIRECT_MUTATION_MARKER));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use coppice_cnd::Compiler;
    use std::io::{Cursor, Read, Write};
    use test_log::test;

    struct ScriptedTransport {
        to_read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedTransport {
        fn new(script: &str) -> ScriptedTransport {
            ScriptedTransport {
                to_read: Cursor::new(script.as_bytes().to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.to_read.read(buf)
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn schemas_with(cnd: &str) -> Rc<SchemaManager> {
        let mut compiler = Compiler::new();
        compiler.add_data(cnd).unwrap();
        let mut manager = SchemaManager::new();
        manager.add_schemas(compiler.schemas().cloned());
        Rc::new(manager)
    }

    fn open_session(script: &str, cnd: &str) -> Rc<Session<ScriptedTransport>> {
        let schemas = schemas_with(cnd);
        let controller = Controller::new(ScriptedTransport::new(script));
        Session::open(controller, "default", schemas, 10).unwrap()
    }

    #[test]
    fn test_root_is_identity_mapped() {
        let session = open_session("^root-0\nTecmnt:document\n", "[ecmnt:document]\n");
        let a = session.root().unwrap();
        let b = session.root().unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.kind(), NodeKind::Workspace);
    }

    #[test]
    fn test_create_child_and_savepoint_assigns_permanent_id() {
        let session = open_session("^root-0\nTecmnt:document\nT0 new-0\n.\n", "[ecmnt:document]\n");
        let root = session.root().unwrap();
        let child = session.create_child(&root, "foo", &QName::new("ecmnt:document")).unwrap();
        assert!(child.id().is_temp());

        session.set_property(&child, &QName::new("ecm:title"), Some(Value::from("hi"))).unwrap();
        session.savepoint().unwrap();

        assert_eq!(child.id(), Id::permanent("new-0"));
        assert!(!child.is_dirty());
    }

    #[test]
    fn test_direct_mutation_forces_savepoint_failure() {
        let session = open_session("^root-0\nTecmnt:document\n", "[ecmnt:document]\n");
        let root = session.root().unwrap();
        root.debug_direct_mutate().unwrap();
        let err = session.savepoint().unwrap_err();
        assert_eq!(err.kind(), coppice_base::ErrorKind::Value);
    }

    #[test]
    fn test_abort_clears_write_buffer() {
        let session = open_session("^root-0\nTecmnt:document\n.\n", "[ecmnt:document]\n");
        let root = session.root().unwrap();
        let child = session.create_child(&root, "foo", &QName::new("ecmnt:document")).unwrap();
        let temp_id = child.id();
        session.abort().unwrap();
        assert!(session.added.borrow().is_empty());
        assert!(session.added_order.borrow().is_empty());
        assert!(session.cache.borrow_mut().get(&temp_id).is_none());
    }

    #[test]
    fn test_insert_before_minimal_reorder() {
        let old: Vec<String> = ["a", "b", "c", "d"].into_iter().map(String::from).collect();
        let new: Vec<String> = ["c", "d", "a", "b"].into_iter().map(String::from).collect();
        let moves = compute_insert_before(&old, &new).unwrap();
        assert_eq!(
            moves,
            vec![("c".to_owned(), "a".to_owned()), ("d".to_owned(), "a".to_owned())]
        );
    }

    #[test]
    fn test_insert_before_rejects_mismatched_sets() {
        let old: Vec<String> = ["a", "b"].into_iter().map(String::from).collect();
        let new: Vec<String> = ["a", "c"].into_iter().map(String::from).collect();
        assert!(compute_insert_before(&old, &new).is_err());
    }

    #[test]
    fn test_security_roundtrips_through_set_property() {
        let session = open_session("^root-0\nTecmnt:document\n", "[ecmnt:document]\n- ecm:security\n");
        let root = session.root().unwrap();
        root.set_property("ecm:title", Some(Value::from("x"))).unwrap();
        let entries = vec![PermissionEntry {
            permission: "Read".to_owned(),
            roles: vec!["Member".to_owned()],
            additive: false,
        }];
        session.set_security(&root, &entries).unwrap();
        assert_eq!(session.security_of(&root).unwrap(), entries);
    }
}
