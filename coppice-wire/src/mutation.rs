use coppice_base::{protocol_error, Result};
use coppice_types::{Id, QName, Value};

use crate::state::PropertyState;
use crate::transport::LineReader;
use crate::value::{decode_value, encode_value};

/// One command inside a batched mutation block (`M` ... `.`). Commands must
/// be emitted in dependency order: every `parent` of an `Add` either
/// already exists on the server or is the `token` of an earlier `Add` in
/// the same block.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationCommand {
    Add {
        parent: Id,
        primary_type: QName,
        token: String,
        name: String,
        properties: Vec<(QName, PropertyState)>,
    },
    Modify {
        id: Id,
        properties: Vec<(QName, PropertyState)>,
    },
    Remove {
        id: Id,
    },
    Reorder {
        parent: Id,
        /// `(name, before)` pairs: move `name` immediately before `before`.
        moves: Vec<(String, String)>,
    },
}

/// The per-command server acknowledgements threaded through a mutation
/// block's response: an `Add` gets back the permanent id assigned to its
/// caller-supplied token.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenAssignment {
    pub token: String,
    pub id: Id,
}

fn encode_properties(properties: &[(QName, PropertyState)], out: &mut Vec<u8>) -> Result<()> {
    for (name, prop) in properties {
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

/// Encodes a full mutation block, including the opening `M` and the closing
/// `.` sentinel.
pub fn encode_mutation_block(commands: &[MutationCommand], out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(b"M\n");
    for command in commands {
        match command {
            MutationCommand::Add {
                parent,
                primary_type,
                token,
                name,
                properties,
            } => {
                out.extend_from_slice(format!("+{parent} {primary_type} {token} {name}\n").as_bytes());
                encode_properties(properties, out)?;
                out.extend_from_slice(b",\n");
            }
            MutationCommand::Modify { id, properties } => {
                out.extend_from_slice(format!("/{id}\n").as_bytes());
                encode_properties(properties, out)?;
                out.extend_from_slice(b",\n");
            }
            MutationCommand::Remove { id } => {
                out.extend_from_slice(format!("-{id}\n").as_bytes());
            }
            MutationCommand::Reorder { parent, moves } => {
                out.extend_from_slice(format!("%{parent}\n").as_bytes());
                for (name, before) in moves {
                    out.extend_from_slice(format!("{name}/{before}\n").as_bytes());
                }
                out.extend_from_slice(b"%\n");
            }
        }
    }
    out.extend_from_slice(b".\n");
    Ok(())
}

/// Reads a fully-buffered property list (`P`/`M`/`D` lines) up through the
/// trailing `,` command terminator used by add/modify entries.
fn decode_properties<T: std::io::Read>(
    reader: &mut LineReader<T>,
) -> Result<Vec<(QName, PropertyState)>> {
    let mut properties = Vec::new();
    loop {
        let line = reader.read_line()?;
        if line == "," {
            return Ok(properties);
        }
        if let Some(name) = line.strip_prefix('P') {
            let value = decode_value(reader)?;
            properties.push((QName::new(name), PropertyState::Single(value)));
            continue;
        }
        if let Some(name) = line.strip_prefix('M') {
            if name.is_empty() {
                return Err(protocol_error("unexpected bare 'M' in mutation properties"));
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
            properties.push((QName::new(name), PropertyState::Multiple(values)));
            continue;
        }
        if let Some(name) = line.strip_prefix('D') {
            properties.push((QName::new(name), PropertyState::Deferred));
            continue;
        }
        return Err(protocol_error(format!(
            "unrecognized mutation property line: {line}"
        )));
    }
}

/// Reads a full mutation block starting after the opening `M` line has
/// already been consumed by the caller, through the closing `.` sentinel.
pub fn decode_mutation_block<T: std::io::Read>(
    reader: &mut LineReader<T>,
) -> Result<Vec<MutationCommand>> {
    let mut commands = Vec::new();
    loop {
        let line = reader.read_line()?;
        if line == "." {
            return Ok(commands);
        }
        if let Some(rest) = line.strip_prefix('+') {
            let mut parts = rest.splitn(4, ' ');
            let parent = parts
                .next()
                .ok_or_else(|| protocol_error(format!("malformed add header: {line}")))?;
            let primary_type = parts
                .next()
                .ok_or_else(|| protocol_error(format!("malformed add header: {line}")))?;
            let token = parts
                .next()
                .ok_or_else(|| protocol_error(format!("malformed add header: {line}")))?;
            let name = parts
                .next()
                .ok_or_else(|| protocol_error(format!("malformed add header: {line}")))?;
            let properties = decode_properties(reader)?;
            commands.push(MutationCommand::Add {
                parent: Id::parse(parent)?,
                primary_type: QName::new(primary_type),
                token: token.to_owned(),
                name: name.to_owned(),
                properties,
            });
            continue;
        }
        if let Some(id) = line.strip_prefix('/') {
            let properties = decode_properties(reader)?;
            commands.push(MutationCommand::Modify {
                id: Id::parse(id)?,
                properties,
            });
            continue;
        }
        if let Some(id) = line.strip_prefix('-') {
            commands.push(MutationCommand::Remove { id: Id::parse(id)? });
            continue;
        }
        if let Some(parent) = line.strip_prefix('%') {
            let parent = Id::parse(parent)?;
            let mut moves = Vec::new();
            loop {
                let mv = reader.read_line()?;
                if mv == "%" {
                    break;
                }
                let (name, before) = mv
                    .split_once('/')
                    .ok_or_else(|| protocol_error(format!("malformed reorder line: {mv}")))?;
                moves.push((name.to_owned(), before.to_owned()));
            }
            commands.push(MutationCommand::Reorder { parent, moves });
            continue;
        }
        return Err(protocol_error(format!(
            "unrecognized mutation-block command: {line}"
        )));
    }
}

pub fn encode_token_assignments(assignments: &[TokenAssignment], out: &mut Vec<u8>) {
    for a in assignments {
        out.extend_from_slice(format!("{} {}\n", a.token, a.id).as_bytes());
    }
}

pub fn decode_token_assignments<T: std::io::Read>(
    reader: &mut LineReader<T>,
) -> Result<Vec<TokenAssignment>> {
    let mut out = Vec::new();
    loop {
        let line = reader.read_line()?;
        if line == "." {
            return Ok(out);
        }
        let (token, id) = line
            .split_once(' ')
            .ok_or_else(|| protocol_error(format!("malformed token assignment: {line}")))?;
        out.push(TokenAssignment {
            token: token.to_owned(),
            id: Id::parse(id)?,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip_add_set_modify() {
        let commands = vec![
            MutationCommand::Add {
                parent: Id::permanent("root"),
                primary_type: QName::new("ecmnt:document"),
                token: "tok1".to_owned(),
                name: "new-doc".to_owned(),
                properties: vec![(
                    QName::new("ecm:title"),
                    PropertyState::Single(Value::from("New Doc")),
                )],
            },
            MutationCommand::Modify {
                id: Id::permanent("root"),
                properties: vec![(
                    QName::new("ecm:title"),
                    PropertyState::Single(Value::from("Root")),
                )],
            },
            MutationCommand::Remove {
                id: Id::permanent("old"),
            },
            MutationCommand::Reorder {
                parent: Id::permanent("root"),
                moves: vec![("b".to_owned(), "a".to_owned())],
            },
        ];
        let mut out = Vec::new();
        encode_mutation_block(&commands, &mut out).unwrap();

        let mut reader = LineReader::new(Cursor::new(out));
        assert_eq!(reader.read_line().unwrap(), "M");
        let decoded = decode_mutation_block(&mut reader).unwrap();
        assert_eq!(decoded, commands);
    }

    #[test]
    fn test_token_assignments_roundtrip() {
        let assignments = vec![TokenAssignment {
            token: "tok1".to_owned(),
            id: Id::permanent("perm-42"),
        }];
        let mut out = Vec::new();
        encode_token_assignments(&assignments, &mut out);
        out.extend_from_slice(b".\n");
        let mut reader = LineReader::new(Cursor::new(out));
        assert_eq!(decode_token_assignments(&mut reader).unwrap(), assignments);
    }
}
