use coppice_base::{protocol_error, Result};
use coppice_types::{Id, OrderedMap, QName, Value};

use crate::transport::LineReader;
use crate::value::{decode_value, encode_value};

/// A single property's value, as it appears in a state block: a single
/// value (`P<name>`), a multi-valued property (`M<name>` ... `M`), or a
/// deferred property the server chose not to inline (`D<name>`).
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyState {
    Single(Value),
    Multiple(Vec<Value>),
    Deferred,
}

/// One child reference inside a state block: `N<id> <type> <name>`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildRef {
    pub id: Id,
    pub primary_type: QName,
    pub name: String,
}

/// The decoded body of a `U<id> <name>` entry in an `S` response.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeState {
    pub id: Id,
    pub name: String,
    pub parent: Option<Id>,
    pub children: Vec<ChildRef>,
    pub properties: OrderedMap<QName, PropertyState>,
}

impl NodeState {
    pub fn new(id: Id, name: String) -> NodeState {
        NodeState {
            id,
            name,
            parent: None,
            children: Vec::new(),
            properties: OrderedMap::new(),
        }
    }
}

/// Reads a whole `S` response: zero or more `U<id> <name>` node entries
/// (each with an optional `^<parent-id>`, `N` children and `P`/`M`/`D`
/// properties), ended by a bare `.` sentinel line.
pub fn decode_node_states<T: std::io::Read>(reader: &mut LineReader<T>) -> Result<Vec<NodeState>> {
    let mut out = Vec::new();
    loop {
        let line = reader.read_line()?;
        if line == "." {
            return Ok(out);
        }
        let Some(rest) = line.strip_prefix('U') else {
            return Err(protocol_error(format!("expected 'U' node header, got: {line}")));
        };
        let (id_str, name) = rest
            .split_once(' ')
            .ok_or_else(|| protocol_error(format!("malformed node header: {line}")))?;
        let mut state = NodeState::new(Id::parse(id_str)?, name.to_owned());
        decode_node_body(reader, &mut state)?;
        out.push(state);
    }
}

/// Reads the body of one node entry, stopping (without consuming) at the
/// next `U` header or the final `.` sentinel.
fn decode_node_body<T: std::io::Read>(
    reader: &mut LineReader<T>,
    state: &mut NodeState,
) -> Result<()> {
    loop {
        let line = reader.read_line()?;
        if line == "." || line.starts_with('U') {
            reader.unread_line(line);
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix('^') {
            state.parent = Some(Id::parse(rest)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix('N') {
            let mut parts = rest.splitn(3, ' ');
            let id = parts
                .next()
                .ok_or_else(|| protocol_error(format!("malformed child line: {line}")))?;
            let ty = parts
                .next()
                .ok_or_else(|| protocol_error(format!("malformed child line: {line}")))?;
            let name = parts
                .next()
                .ok_or_else(|| protocol_error(format!("malformed child line: {line}")))?;
            state.children.push(ChildRef {
                id: Id::parse(id)?,
                primary_type: QName::new(ty),
                name: name.to_owned(),
            });
            continue;
        }
        if let Some(name) = line.strip_prefix('P') {
            let value = decode_value(reader)?;
            state
                .properties
                .insert(QName::new(name), PropertyState::Single(value));
            continue;
        }
        if let Some(name) = line.strip_prefix('M') {
            if name.is_empty() {
                return Err(protocol_error("unexpected bare 'M' terminator"));
            }
            let mut values = Vec::new();
            loop {
                let peek = reader.read_line()?;
                if peek == "M" {
                    break;
                }
                reader.unread_line(peek);
                values.push(decode_value(reader)?);
            }
            state
                .properties
                .insert(QName::new(name), PropertyState::Multiple(values));
            continue;
        }
        if let Some(name) = line.strip_prefix('D') {
            state
                .properties
                .insert(QName::new(name), PropertyState::Deferred);
            continue;
        }
        return Err(protocol_error(format!("unrecognized state-block line: {line}")));
    }
}

/// Encodes one node's state block (header, parent, children, properties),
/// without the surrounding `.` response terminator -- callers assemble a
/// full `S` response by concatenating these and appending `.\n`.
pub fn encode_node_state(state: &NodeState, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(format!("U{} {}\n", state.id, state.name).as_bytes());
    if let Some(parent) = &state.parent {
        out.extend_from_slice(format!("^{parent}\n").as_bytes());
    }
    for child in &state.children {
        out.extend_from_slice(format!("N{} {} {}\n", child.id, child.primary_type, child.name).as_bytes());
    }
    for (name, prop) in state.properties.iter() {
        match prop {
            PropertyState::Single(value) => {
                out.extend_from_slice(format!("P{name}\n").as_bytes());
                encode_value(value, out)?;
            }
            PropertyState::Multiple(values) => {
                out.extend_from_slice(format!("M{name}\n").as_bytes());
                for value in values {
                    encode_value(value, out)?;
                }
                out.extend_from_slice(b"M\n");
            }
            PropertyState::Deferred => {
                out.extend_from_slice(format!("D{name}\n").as_bytes());
            }
        }
    }
    Ok(())
}
