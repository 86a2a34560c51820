//! A synchronous client for the line-based wire protocol: one socket, one
//! server-side session, blocking request/response. Every public method maps
//! to exactly one round trip, mirroring `controller.py`'s one-method-per-verb
//! shape.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};

use coppice_base::{conflict_error, not_implemented, protocol_error, Result};
use coppice_types::{Id, QName};
use coppice_wire::{
    decode_node_states, decode_token_assignments, encode_mutation_block, LineReader,
    MutationCommand, NodeState, TokenAssignment, Transport,
};

/// Owns one transport and the unread-byte buffer `LineReader` keeps across
/// it. Not `Sync`: a controller is a single in-flight conversation, and the
/// type carries that invariant rather than leaving it to a doc comment.
pub struct Controller<T> {
    reader: LineReader<T>,
}

impl<T: Transport> Controller<T> {
    /// Wraps an already-connected transport. Does not perform the
    /// connect-and-read-welcome-line handshake -- that's `TcpController`'s
    /// job, since an arbitrary `Transport` (e.g. a test double) may not want
    /// a welcome line consumed for it.
    pub fn new(transport: T) -> Controller<T> {
        Controller {
            reader: LineReader::new(transport),
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let w = self.reader.get_mut();
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }

    fn write_block(&mut self, block: &[u8]) -> Result<()> {
        let w = self.reader.get_mut();
        w.write_all(block)?;
        w.flush()?;
        Ok(())
    }

    fn expect_ack(&mut self) -> Result<()> {
        let line = self.reader.read_line()?;
        if line == "." {
            Ok(())
        } else if let Some(msg) = line.strip_prefix('!') {
            Err(conflict_error(msg.to_owned()))
        } else {
            Err(protocol_error(format!("unexpected reply: {line}")))
        }
    }

    /// `L<workspace>`; reply `^<root-id>`.
    pub fn login(&mut self, workspace: &str) -> Result<Id> {
        self.write_line(&format!("L{workspace}"))?;
        let line = self.reader.read_line()?;
        let root = line
            .strip_prefix('^')
            .ok_or_else(|| protocol_error(format!("expected login reply, got: {line}")))?;
        Id::parse(root)
    }

    /// `D`; reply is the CND source, multiline, terminated by `.`.
    pub fn get_node_type_defs(&mut self) -> Result<String> {
        self.write_line("D")?;
        let mut lines = Vec::new();
        loop {
            let line = self.reader.read_line()?;
            if line == "." {
                return Ok(lines.join("\n"));
            }
            lines.push(line);
        }
    }

    /// `T<id>`; reply `T<type>`.
    pub fn get_node_type(&mut self, id: &Id) -> Result<QName> {
        self.write_line(&format!("T{id}"))?;
        let line = self.reader.read_line()?;
        let ty = line
            .strip_prefix('T')
            .ok_or_else(|| protocol_error(format!("expected node type reply, got: {line}")))?;
        Ok(QName::new(ty))
    }

    /// `S<id id …>`; reply is a framed state block terminated by `.`.
    pub fn get_node_states(&mut self, ids: &[Id]) -> Result<Vec<NodeState>> {
        let ids_str = ids
            .iter()
            .map(Id::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.write_line(&format!("S{ids_str}"))?;
        decode_node_states(&mut self.reader)
    }

    /// `M` … `.` batched mutation block; reply is `<token> <id>` lines
    /// terminated by `.`, or a single `!…` line if the whole block was
    /// rejected.
    pub fn send_commands(&mut self, commands: &[MutationCommand]) -> Result<Vec<TokenAssignment>> {
        let mut block = Vec::new();
        encode_mutation_block(commands, &mut block)?;
        self.write_block(&block)?;
        let first = self.reader.read_line()?;
        if let Some(msg) = first.strip_prefix('!') {
            return Err(protocol_error(format!("mutation rejected: {msg}")));
        }
        self.reader.unread_line(first);
        decode_token_assignments(&mut self.reader)
    }

    /// `p`; reply `.` or `!…`.
    pub fn prepare(&mut self) -> Result<()> {
        self.write_line("p")?;
        self.expect_ack()
    }

    /// `c`; reply `.` or `!…`.
    pub fn commit(&mut self) -> Result<()> {
        self.write_line("c")?;
        self.expect_ack()
    }

    /// `r`; reply `.` or `!…`.
    pub fn abort(&mut self) -> Result<()> {
        self.write_line("r")?;
        self.expect_ack()
    }

    /// `i<id>`; reply `.`.
    pub fn checkpoint(&mut self, id: &Id) -> Result<()> {
        self.write_line(&format!("i{id}"))?;
        let line = self.reader.read_line()?;
        if line == "." {
            Ok(())
        } else {
            Err(protocol_error(format!("checkpoint failed: {line}")))
        }
    }

    /// `t<id> <version>`; reply `.<list>`, comma-separated and possibly
    /// empty. Called with an empty `version` to perform a checkout (spec.md
    /// §4.1 assigns `restore` no separate wire verb for checkout).
    pub fn restore(&mut self, id: &Id, version: &str) -> Result<Vec<String>> {
        self.write_line(&format!("t{id} {version}"))?;
        let line = self.reader.read_line()?;
        let rest = line
            .strip_prefix('.')
            .ok_or_else(|| protocol_error(format!("restore failed: {line}")))?;
        if rest.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(rest.split(',').map(str::to_owned).collect())
        }
    }

    /// `/<id>`; reply is the node's path, or `!…` if it doesn't exist (or
    /// isn't reachable), reported here as `Ok(None)` rather than an error
    /// since a missing path is a legitimate answer, not a protocol failure.
    pub fn get_path(&mut self, id: &Id) -> Result<Option<String>> {
        self.write_line(&format!("/{id}"))?;
        let line = self.reader.read_line()?;
        if line.starts_with('!') {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// `s<name> <value>`; reply is `<id> <path>` lines terminated by `.`.
    pub fn search_property(&mut self, name: &str, value: &str) -> Result<Vec<(Id, String)>> {
        self.write_line(&format!("s{name} {value}"))?;
        let mut out = Vec::new();
        loop {
            let line = self.reader.read_line()?;
            if line == "." {
                return Ok(out);
            }
            if let Some(msg) = line.strip_prefix('!') {
                return Err(protocol_error(msg.to_owned()));
            }
            let (id, path) = line
                .split_once(' ')
                .ok_or_else(|| protocol_error(format!("malformed search reply: {line}")))?;
            out.push((Id::parse(id)?, path.to_owned()));
        }
    }

    /// Declared by the controller interface but never implemented on either
    /// end of the wire (no command letter is assigned to it in spec.md
    /// §4.1); kept as an explicit stub rather than silently absent.
    pub fn get_node_properties(&mut self, _id: &Id) -> Result<()> {
        Err(not_implemented("get_node_properties"))
    }

    /// Same story as `get_node_properties`: present in the interface
    /// contract, has no wire counterpart.
    pub fn get_pending_events(&mut self) -> Result<()> {
        Err(not_implemented("get_pending_events"))
    }
}

/// Blocking controller over a real TCP socket.
pub type TcpController = Controller<TcpStream>;

impl TcpController {
    /// Connects, then reads and discards the server's one-line welcome
    /// banner, the same handshake `controller.py::connect` performs before
    /// any request is sent.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpController> {
        let stream = TcpStream::connect(addr)?;
        let mut reader = LineReader::new(stream);
        reader.read_line()?;
        Ok(Controller { reader })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Cursor, Read};

    /// A full-duplex in-memory transport: reads come from a canned script,
    /// writes land in a buffer the test can inspect afterward. Stands in for
    /// a real socket the way `controller.py`'s tests use a fake socket pair.
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

    fn written(controller: &mut Controller<ScriptedTransport>) -> String {
        String::from_utf8(controller.reader.get_mut().written.clone()).unwrap()
    }

    #[test]
    fn test_login() {
        let mut c = Controller::new(ScriptedTransport::new("^root-id\n"));
        let id = c.login("default").unwrap();
        assert_eq!(id, Id::permanent("root-id"));
        assert_eq!(written(&mut c), "Ldefault\n");
    }

    #[test]
    fn test_get_node_type_defs() {
        let mut c = Controller::new(ScriptedTransport::new("[nt:base]\n - jcr:foo\n.\n"));
        let defs = c.get_node_type_defs().unwrap();
        assert_eq!(defs, "[nt:base]\n - jcr:foo");
        assert_eq!(written(&mut c), "D\n");
    }

    #[test]
    fn test_get_node_type() {
        let mut c = Controller::new(ScriptedTransport::new("Tecmnt:note\n"));
        let ty = c.get_node_type(&Id::permanent("abc")).unwrap();
        assert_eq!(ty.as_str(), "ecmnt:note");
        assert_eq!(written(&mut c), "Tabc\n");
    }

    #[test]
    fn test_prepare_commit_abort() {
        let mut c = Controller::new(ScriptedTransport::new(".\n.\n.\n"));
        c.prepare().unwrap();
        c.commit().unwrap();
        c.abort().unwrap();
        assert_eq!(written(&mut c), "p\nc\nr\n");
    }

    #[test]
    fn test_prepare_conflict() {
        let mut c = Controller::new(ScriptedTransport::new("!stale object\n"));
        let err = c.prepare().unwrap_err();
        assert_eq!(err.kind(), coppice_base::ErrorKind::Conflict);
    }

    #[test]
    fn test_checkpoint() {
        let mut c = Controller::new(ScriptedTransport::new(".\n"));
        c.checkpoint(&Id::permanent("doc1")).unwrap();
        assert_eq!(written(&mut c), "idoc1\n");
    }

    #[test]
    fn test_restore_with_versions() {
        let mut c = Controller::new(ScriptedTransport::new(".v1,v2\n"));
        let versions = c.restore(&Id::permanent("doc1"), "v2").unwrap();
        assert_eq!(versions, vec!["v1".to_owned(), "v2".to_owned()]);
        assert_eq!(written(&mut c), "tdoc1 v2\n");
    }

    #[test]
    fn test_restore_as_checkout() {
        let mut c = Controller::new(ScriptedTransport::new(".\n"));
        let versions = c.restore(&Id::permanent("doc1"), "").unwrap();
        assert!(versions.is_empty());
        assert_eq!(written(&mut c), "tdoc1 \n");
    }

    #[test]
    fn test_get_path_found_and_missing() {
        let mut c = Controller::new(ScriptedTransport::new("/a/b/c\n!no such node\n"));
        assert_eq!(
            c.get_path(&Id::permanent("x")).unwrap(),
            Some("/a/b/c".to_owned())
        );
        assert_eq!(c.get_path(&Id::permanent("y")).unwrap(), None);
    }

    #[test]
    fn test_search_property() {
        let mut c = Controller::new(ScriptedTransport::new("id1 /a/b\nid2 /a/c\n.\n"));
        let hits = c.search_property("ecm:title", "Hello").unwrap();
        assert_eq!(
            hits,
            vec![
                (Id::permanent("id1"), "/a/b".to_owned()),
                (Id::permanent("id2"), "/a/c".to_owned()),
            ]
        );
        assert_eq!(written(&mut c), "secm:title Hello\n");
    }

    #[test]
    fn test_search_property_error_line() {
        let mut c = Controller::new(ScriptedTransport::new("!bad property\n"));
        assert!(c.search_property("ecm:bogus", "x").is_err());
    }

    #[test]
    fn test_unimplemented_stubs() {
        let mut c = Controller::new(ScriptedTransport::new(""));
        assert_eq!(
            c.get_node_properties(&Id::permanent("x"))
                .unwrap_err()
                .kind(),
            coppice_base::ErrorKind::NotImplemented
        );
        assert_eq!(
            c.get_pending_events().unwrap_err().kind(),
            coppice_base::ErrorKind::NotImplemented
        );
    }

    #[test]
    fn test_send_commands_roundtrip() {
        use coppice_wire::MutationCommand;
        let mut c = Controller::new(ScriptedTransport::new("tok1 perm-1\n.\n"));
        let commands = vec![MutationCommand::Remove {
            id: Id::permanent("old"),
        }];
        let assignments = c.send_commands(&commands).unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].token, "tok1");
        assert_eq!(assignments[0].id, Id::permanent("perm-1"));
    }

    #[test]
    fn test_send_commands_rejected() {
        let mut c = Controller::new(ScriptedTransport::new("!conflict on /a\n"));
        let commands = vec![MutationCommand::Remove {
            id: Id::permanent("old"),
        }];
        assert!(c.send_commands(&commands).is_err());
    }
}
