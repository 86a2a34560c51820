//! Server-side stand-in for the repository: an in-memory tree that speaks
//! the same wire protocol `coppice-controller` speaks against, so the rest
//! of the stack can be exercised end to end without an embedded Jackrabbit
//! (explicitly out of scope -- spec.md §1). [`Repository`] is the small
//! trait `serve_one` drives; [`ReplayStore`] is the one implementation of
//! it this crate ships.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use coppice_base::{not_found, protocol_error, Result};
use coppice_types::{Id, OrderedMap, QName, Value};
use coppice_wire::{
    decode_mutation_block, encode_node_state, encode_token_assignments, ChildRef, LineReader,
    MutationCommand, NodeState, PropertyState, TokenAssignment, Transport,
};

/// What `serve_one` needs from a repository: every verb spec.md §4.1
/// assigns a command letter to, minus the framing itself (that's
/// `serve_one`'s job).
pub trait Repository {
    fn login(&self, workspace: &str) -> Result<Id>;
    fn node_type_defs(&self) -> Result<String>;
    fn node_type(&self, id: &Id) -> Result<QName>;
    fn node_states(&self, ids: &[Id]) -> Result<Vec<NodeState>>;
    fn apply_commands(&self, commands: Vec<MutationCommand>) -> Result<Vec<TokenAssignment>>;
    fn prepare(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn abort(&self) -> Result<()>;
    fn checkpoint(&self, id: &Id) -> Result<()>;
    fn restore(&self, id: &Id, version: &str) -> Result<Vec<String>>;
    fn path_of(&self, id: &Id) -> Result<Option<String>>;
    fn search_property(&self, name: &str, value: &str) -> Result<Vec<(Id, String)>>;
}

#[derive(Clone)]
struct StoredNode {
    id: Id,
    primary_type: QName,
    name: String,
    parent: Option<Id>,
    children: OrderedMap<String, Id>,
    properties: OrderedMap<QName, PropertyState>,
    checked_out: bool,
    versions: Vec<(String, OrderedMap<QName, PropertyState>, OrderedMap<String, Id>)>,
}

/// One step of undo bookkeeping for a not-yet-committed batch of mutations,
/// replayed in reverse on `abort` (or on a mid-batch failure, so a rejected
/// `apply_commands` call never leaves a partial write behind).
enum UndoOp {
    RemoveAdded(Id),
    RestoreProperties(Id, OrderedMap<QName, PropertyState>),
    Reinsert(Box<StoredNode>),
    RestoreOrder(Id, OrderedMap<String, Id>),
}

struct Inner {
    next_seq: u64,
    nodes: HashMap<Id, StoredNode>,
    root: Id,
    cnd_source: String,
    undo: Vec<UndoOp>,
}

/// An in-memory tree of nodes, good for one workspace, that answers the
/// same wire verbs a real repository would. Not a query planner: property
/// search is the single-property linear scan spec.md §4.1 describes.
pub struct ReplayStore {
    inner: Mutex<Inner>,
}

impl ReplayStore {
    /// Builds a store with one root node, whose children accumulate
    /// however `apply_commands` is told to grow the tree. `cnd_source` is
    /// handed back verbatim by `node_type_defs` (the `D` verb).
    pub fn new(cnd_source: impl Into<String>, root_id: &str, root_type: QName) -> ReplayStore {
        let root = Id::permanent(root_id);
        let mut nodes = HashMap::new();
        nodes.insert(
            root.clone(),
            StoredNode {
                id: root.clone(),
                primary_type: root_type,
                name: String::new(),
                parent: None,
                children: OrderedMap::new(),
                properties: OrderedMap::new(),
                checked_out: true,
                versions: Vec::new(),
            },
        );
        ReplayStore {
            inner: Mutex::new(Inner {
                next_seq: 0,
                nodes,
                root,
                cnd_source: cnd_source.into(),
                undo: Vec::new(),
            }),
        }
    }

    fn path_of_locked(inner: &Inner, id: &Id) -> Option<String> {
        let mut segments = Vec::new();
        let mut cur = id.clone();
        loop {
            let node = inner.nodes.get(&cur)?;
            if cur == inner.root {
                break;
            }
            segments.push(node.name.clone());
            cur = node.parent.clone()?;
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    fn apply_one(inner: &mut Inner, command: MutationCommand, assignments: &mut Vec<TokenAssignment>, undo: &mut Vec<UndoOp>) -> Result<()> {
        match command {
            MutationCommand::Add {
                parent,
                primary_type,
                token,
                name,
                properties,
            } => {
                if !inner.nodes.contains_key(&parent) {
                    return Err(not_found(format!("add: no such parent {parent}")));
                }
                inner.next_seq += 1;
                let id = Id::permanent(format!("new-{}", inner.next_seq));
                let node = StoredNode {
                    id: id.clone(),
                    primary_type,
                    name: name.clone(),
                    parent: Some(parent.clone()),
                    children: OrderedMap::new(),
                    properties: properties.into_iter().collect(),
                    checked_out: true,
                    versions: Vec::new(),
                };
                inner.nodes.insert(id.clone(), node);
                inner.nodes.get_mut(&parent).expect("validated above").children.insert(name, id.clone());
                undo.push(UndoOp::RemoveAdded(id.clone()));
                assignments.push(TokenAssignment { token, id });
                Ok(())
            }
            MutationCommand::Modify { id, properties } => {
                let node = inner.nodes.get_mut(&id).ok_or_else(|| not_found(format!("modify: no such node {id}")))?;
                let before = node.properties.clone();
                for (name, state) in properties {
                    match state {
                        // A `Deferred` line in a modify batch is how the
                        // client signals "property removed" -- see
                        // `coppice-session`'s `set_property`.
                        PropertyState::Deferred => {
                            node.properties.remove(&name);
                        }
                        other => {
                            node.properties.insert(name, other);
                        }
                    }
                }
                undo.push(UndoOp::RestoreProperties(id, before));
                Ok(())
            }
            MutationCommand::Remove { id } => {
                let node = inner.nodes.remove(&id).ok_or_else(|| not_found(format!("remove: no such node {id}")))?;
                if let Some(parent_id) = &node.parent {
                    if let Some(parent) = inner.nodes.get_mut(parent_id) {
                        parent.children.remove(&node.name);
                    }
                }
                undo.push(UndoOp::Reinsert(Box::new(node)));
                Ok(())
            }
            MutationCommand::Reorder { parent, moves } => {
                let node = inner.nodes.get_mut(&parent).ok_or_else(|| not_found(format!("reorder: no such node {parent}")))?;
                let before_order = node.children.clone();
                for (name, before) in &moves {
                    if !node.children.move_before(name, before) {
                        return Err(protocol_error(format!("reorder: {name} or {before} not a child of {parent}")));
                    }
                }
                undo.push(UndoOp::RestoreOrder(parent, before_order));
                Ok(())
            }
        }
    }

    fn replay_undo(inner: &mut Inner, ops: Vec<UndoOp>) {
        for op in ops.into_iter().rev() {
            match op {
                UndoOp::RemoveAdded(id) => {
                    if let Some(node) = inner.nodes.remove(&id) {
                        if let Some(parent_id) = &node.parent {
                            if let Some(parent) = inner.nodes.get_mut(parent_id) {
                                parent.children.remove(&node.name);
                            }
                        }
                    }
                }
                UndoOp::RestoreProperties(id, properties) => {
                    if let Some(node) = inner.nodes.get_mut(&id) {
                        node.properties = properties;
                    }
                }
                UndoOp::Reinsert(node) => {
                    if let Some(parent_id) = &node.parent {
                        if let Some(parent) = inner.nodes.get_mut(parent_id) {
                            parent.children.insert(node.name.clone(), node.id.clone());
                        }
                    }
                    inner.nodes.insert(node.id.clone(), *node);
                }
                UndoOp::RestoreOrder(id, order) => {
                    if let Some(node) = inner.nodes.get_mut(&id) {
                        node.children = order;
                    }
                }
            }
        }
    }
}

impl Repository for ReplayStore {
    fn login(&self, _workspace: &str) -> Result<Id> {
        let inner = self.inner.lock().expect("replay store mutex poisoned");
        Ok(inner.root.clone())
    }

    fn node_type_defs(&self) -> Result<String> {
        let inner = self.inner.lock().expect("replay store mutex poisoned");
        Ok(inner.cnd_source.clone())
    }

    fn node_type(&self, id: &Id) -> Result<QName> {
        let inner = self.inner.lock().expect("replay store mutex poisoned");
        let node = inner.nodes.get(id).ok_or_else(|| not_found(format!("no such node: {id}")))?;
        Ok(node.primary_type.clone())
    }

    fn node_states(&self, ids: &[Id]) -> Result<Vec<NodeState>> {
        let inner = self.inner.lock().expect("replay store mutex poisoned");
        let mut out = Vec::new();
        for id in ids {
            let node = inner.nodes.get(id).ok_or_else(|| not_found(format!("no such node: {id}")))?;
            let mut state = NodeState::new(node.id.clone(), node.name.clone());
            state.parent = node.parent.clone();
            for (name, child_id) in node.children.iter() {
                let child = inner.nodes.get(child_id).ok_or_else(|| not_found(format!("dangling child: {child_id}")))?;
                state.children.push(ChildRef {
                    id: child_id.clone(),
                    primary_type: child.primary_type.clone(),
                    name: name.clone(),
                });
            }
            for (name, prop) in node.properties.iter() {
                state.properties.insert(name.clone(), prop.clone());
            }
            out.push(state);
        }
        Ok(out)
    }

    fn apply_commands(&self, commands: Vec<MutationCommand>) -> Result<Vec<TokenAssignment>> {
        let mut inner = self.inner.lock().expect("replay store mutex poisoned");
        let mut assignments = Vec::new();
        let mut local_undo = Vec::new();
        for command in commands {
            if let Err(e) = Self::apply_one(&mut inner, command, &mut assignments, &mut local_undo) {
                Self::replay_undo(&mut inner, local_undo);
                return Err(e);
            }
        }
        inner.undo.extend(local_undo);
        Ok(assignments)
    }

    fn prepare(&self) -> Result<()> {
        // No real optimistic-concurrency check is modeled; every pending
        // batch this in-memory store has already accepted is by
        // construction preparable.
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("replay store mutex poisoned");
        inner.undo.clear();
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("replay store mutex poisoned");
        let ops = std::mem::take(&mut inner.undo);
        Self::replay_undo(&mut inner, ops);
        Ok(())
    }

    fn checkpoint(&self, id: &Id) -> Result<()> {
        let mut inner = self.inner.lock().expect("replay store mutex poisoned");
        let node = inner.nodes.get_mut(id).ok_or_else(|| not_found(format!("no such node: {id}")))?;
        let tag = format!("v{}", node.versions.len() + 1);
        let snapshot = (tag, node.properties.clone(), node.children.clone());
        node.versions.push(snapshot);
        node.checked_out = false;
        Ok(())
    }

    fn restore(&self, id: &Id, version: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().expect("replay store mutex poisoned");
        let node = inner.nodes.get_mut(id).ok_or_else(|| not_found(format!("no such node: {id}")))?;
        if version.is_empty() {
            node.checked_out = true;
            return Ok(node.versions.iter().map(|(tag, ..)| tag.clone()).collect());
        }
        let snapshot = node.versions.iter().find(|(tag, ..)| tag == version).cloned();
        let (_, properties, children) = snapshot.ok_or_else(|| not_found(format!("no such version: {version}")))?;
        node.properties = properties;
        node.children = children;
        node.checked_out = true;
        Ok(node.versions.iter().map(|(tag, ..)| tag.clone()).collect())
    }

    fn path_of(&self, id: &Id) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("replay store mutex poisoned");
        Ok(Self::path_of_locked(&inner, id))
    }

    fn search_property(&self, name: &str, value: &str) -> Result<Vec<(Id, String)>> {
        let inner = self.inner.lock().expect("replay store mutex poisoned");
        let target = QName::new(name);
        let mut out = Vec::new();
        for node in inner.nodes.values() {
            let matches = match node.properties.get(&target) {
                Some(PropertyState::Single(Value::String(s))) => s == value,
                _ => false,
            };
            if matches {
                if let Some(path) = Self::path_of_locked(&inner, &node.id) {
                    out.push((node.id.clone(), path));
                }
            }
        }
        Ok(out)
    }
}

fn write_line<T: Transport>(reader: &mut LineReader<T>, line: &str) -> Result<()> {
    let w = reader.get_mut();
    w.write_all(line.as_bytes())?;
    w.write_all(b"\n")?;
    w.flush()?;
    Ok(())
}

fn write_raw<T: Transport>(reader: &mut LineReader<T>, block: &[u8]) -> Result<()> {
    let w = reader.get_mut();
    w.write_all(block)?;
    w.flush()?;
    Ok(())
}

fn ack<T: Transport>(reader: &mut LineReader<T>, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => write_line(reader, "."),
        Err(e) => write_line(reader, &format!("!{e}")),
    }
}

/// Serves one connection to completion: writes the one-line welcome banner
/// `TcpController::connect` expects, then answers wire commands against
/// `store` in a loop until the peer closes the socket. Unrecognized
/// framing and genuine I/O errors both end the loop by returning `Err`;
/// a clean disconnect returns `Ok(())`.
pub fn serve_one<T: Transport, R: Repository>(transport: T, store: &R) -> Result<()> {
    let mut reader = LineReader::new(transport);
    write_line(&mut reader, "coppice-replay")?;
    loop {
        let line = match reader.read_line() {
            Ok(line) => line,
            Err(_) => return Ok(()),
        };
        if line.is_empty() {
            continue;
        }
        let (tag, rest) = line.split_at(1);
        match tag {
            "L" => {
                let root = store.login(rest)?;
                write_line(&mut reader, &format!("^{root}"))?;
            }
            "D" => {
                let defs = store.node_type_defs()?;
                let mut out = String::new();
                for l in defs.lines() {
                    out.push_str(l);
                    out.push('\n');
                }
                out.push_str(".\n");
                write_raw(&mut reader, out.as_bytes())?;
            }
            "T" => {
                let id = Id::parse(rest)?;
                let ty = store.node_type(&id)?;
                write_line(&mut reader, &format!("T{ty}"))?;
            }
            "S" => {
                let ids = rest
                    .split(' ')
                    .filter(|s| !s.is_empty())
                    .map(Id::parse)
                    .collect::<Result<Vec<_>>>()?;
                let states = store.node_states(&ids)?;
                let mut out = Vec::new();
                for state in &states {
                    encode_node_state(state, &mut out)?;
                }
                out.extend_from_slice(b".\n");
                write_raw(&mut reader, &out)?;
            }
            "M" => {
                let commands = decode_mutation_block(&mut reader)?;
                match store.apply_commands(commands) {
                    Ok(assignments) => {
                        let mut out = Vec::new();
                        encode_token_assignments(&assignments, &mut out);
                        out.extend_from_slice(b".\n");
                        write_raw(&mut reader, &out)?;
                    }
                    Err(e) => write_line(&mut reader, &format!("!{e}"))?,
                }
            }
            "p" => ack(&mut reader, store.prepare())?,
            "c" => ack(&mut reader, store.commit())?,
            "r" => ack(&mut reader, store.abort())?,
            "i" => {
                let id = Id::parse(rest)?;
                ack(&mut reader, store.checkpoint(&id))?;
            }
            "t" => {
                let (id_str, version) = rest.split_once(' ').unwrap_or((rest, ""));
                let id = Id::parse(id_str)?;
                match store.restore(&id, version) {
                    Ok(versions) => write_line(&mut reader, &format!(".{}", versions.join(",")))?,
                    Err(e) => write_line(&mut reader, &format!("!{e}"))?,
                }
            }
            "/" => {
                let id = Id::parse(rest)?;
                match store.path_of(&id)? {
                    Some(path) => write_line(&mut reader, &path)?,
                    None => write_line(&mut reader, "!no such node")?,
                }
            }
            "s" => {
                let (name, value) = rest.split_once(' ').ok_or_else(|| protocol_error(format!("malformed search command: {line}")))?;
                let hits = store.search_property(name, value)?;
                let mut out = String::new();
                for (id, path) in hits {
                    out.push_str(&format!("{id} {path}\n"));
                }
                out.push_str(".\n");
                write_raw(&mut reader, out.as_bytes())?;
            }
            _ => write_line(&mut reader, &format!("!unrecognized command: {line}"))?,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn store() -> ReplayStore {
        ReplayStore::new("[ecmnt:document]\n", "root-0", QName::new("ecmnt:document"))
    }

    #[test]
    fn test_login_returns_root() {
        let store = store();
        assert_eq!(store.login("default").unwrap(), Id::permanent("root-0"));
    }

    #[test]
    fn test_add_then_node_states_reflects_child() {
        let store = store();
        let assignments = store
            .apply_commands(vec![MutationCommand::Add {
                parent: Id::permanent("root-0"),
                primary_type: QName::new("ecmnt:document"),
                token: "tok1".to_owned(),
                name: "child".to_owned(),
                properties: vec![(QName::new("ecm:title"), PropertyState::Single(Value::from("hi")))],
            }])
            .unwrap();
        assert_eq!(assignments.len(), 1);
        let new_id = assignments[0].id.clone();

        let states = store.node_states(std::slice::from_ref(&Id::permanent("root-0"))).unwrap();
        assert_eq!(states[0].children.len(), 1);
        assert_eq!(states[0].children[0].id, new_id);
        assert_eq!(store.path_of(&new_id).unwrap(), Some("/child".to_owned()));
    }

    #[test]
    fn test_abort_undoes_uncommitted_add() {
        let store = store();
        let assignments = store
            .apply_commands(vec![MutationCommand::Add {
                parent: Id::permanent("root-0"),
                primary_type: QName::new("ecmnt:document"),
                token: "tok1".to_owned(),
                name: "child".to_owned(),
                properties: Vec::new(),
            }])
            .unwrap();
        let new_id = assignments[0].id.clone();
        store.abort().unwrap();
        assert!(store.node_type(&new_id).is_err());
        let states = store.node_states(&[Id::permanent("root-0")]).unwrap();
        assert!(states[0].children.is_empty());
    }

    #[test]
    fn test_modify_remove_property_via_deferred() {
        let store = store();
        let root = Id::permanent("root-0");
        store
            .apply_commands(vec![MutationCommand::Modify {
                id: root.clone(),
                properties: vec![(QName::new("ecm:title"), PropertyState::Single(Value::from("x")))],
            }])
            .unwrap();
        store.commit().unwrap();
        store
            .apply_commands(vec![MutationCommand::Modify {
                id: root.clone(),
                properties: vec![(QName::new("ecm:title"), PropertyState::Deferred)],
            }])
            .unwrap();
        let states = store.node_states(&[root]).unwrap();
        assert!(states[0].properties.get(&QName::new("ecm:title")).is_none());
    }

    #[test]
    fn test_reorder_moves_child_before_sibling() {
        let store = store();
        let root = Id::permanent("root-0");
        store
            .apply_commands(vec![
                MutationCommand::Add {
                    parent: root.clone(),
                    primary_type: QName::new("ecmnt:document"),
                    token: "a".to_owned(),
                    name: "a".to_owned(),
                    properties: Vec::new(),
                },
                MutationCommand::Add {
                    parent: root.clone(),
                    primary_type: QName::new("ecmnt:document"),
                    token: "b".to_owned(),
                    name: "b".to_owned(),
                    properties: Vec::new(),
                },
            ])
            .unwrap();
        store.commit().unwrap();
        store
            .apply_commands(vec![MutationCommand::Reorder {
                parent: root.clone(),
                moves: vec![("b".to_owned(), "a".to_owned())],
            }])
            .unwrap();
        let states = store.node_states(&[root]).unwrap();
        let names: Vec<&str> = states[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_checkpoint_and_restore_roundtrip() {
        let store = store();
        let root = Id::permanent("root-0");
        store
            .apply_commands(vec![MutationCommand::Modify {
                id: root.clone(),
                properties: vec![(QName::new("ecm:title"), PropertyState::Single(Value::from("v1")))],
            }])
            .unwrap();
        store.commit().unwrap();
        store.checkpoint(&root).unwrap();
        store
            .apply_commands(vec![MutationCommand::Modify {
                id: root.clone(),
                properties: vec![(QName::new("ecm:title"), PropertyState::Single(Value::from("v2")))],
            }])
            .unwrap();
        store.commit().unwrap();
        let versions = store.restore(&root, "v1").unwrap();
        assert_eq!(versions, vec!["v1".to_owned()]);
        let states = store.node_states(&[root]).unwrap();
        assert_eq!(
            states[0].properties.get(&QName::new("ecm:title")),
            Some(&PropertyState::Single(Value::from("v1")))
        );
    }

    #[test]
    fn test_search_property_finds_matching_node() {
        let store = store();
        let root = Id::permanent("root-0");
        store
            .apply_commands(vec![MutationCommand::Add {
                parent: root,
                primary_type: QName::new("ecmnt:document"),
                token: "tok1".to_owned(),
                name: "found".to_owned(),
                properties: vec![(QName::new("ecm:title"), PropertyState::Single(Value::from("target")))],
            }])
            .unwrap();
        let hits = store.search_property("ecm:title", "target").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "/found");
    }
}
