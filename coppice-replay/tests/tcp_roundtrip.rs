//! Drives a real `TcpController` against `serve_one` over an actual
//! `TcpListener` socket, the integration-level complement to the in-process
//! unit tests in `src/lib.rs`.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use coppice_controller::TcpController;
use coppice_replay::{serve_one, ReplayStore};
use coppice_types::{Id, QName};
use coppice_wire::MutationCommand;
use test_log::test;

fn spawn_server() -> (std::net::SocketAddr, Arc<ReplayStore>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Arc::new(ReplayStore::new("[ecmnt:document]\n", "root-0", QName::new("ecmnt:document")));
    let server_store = store.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = stream.unwrap();
            let store = server_store.clone();
            thread::spawn(move || {
                let _ = serve_one(stream, store.as_ref());
            });
        }
    });
    (addr, store)
}

#[test]
fn test_login_and_get_node_type_over_tcp() {
    let (addr, _store) = spawn_server();
    let mut controller = TcpController::connect(addr).unwrap();
    let root = controller.login("default").unwrap();
    assert_eq!(root, Id::permanent("root-0"));
    let ty = controller.get_node_type(&root).unwrap();
    assert_eq!(ty, QName::new("ecmnt:document"));
}

#[test]
fn test_add_commit_then_read_back_over_tcp() {
    let (addr, _store) = spawn_server();
    let mut controller = TcpController::connect(addr).unwrap();
    let root = controller.login("default").unwrap();

    let commands = vec![MutationCommand::Add {
        parent: root.clone(),
        primary_type: QName::new("ecmnt:document"),
        token: "tok1".to_owned(),
        name: "child".to_owned(),
        properties: Vec::new(),
    }];
    let assignments = controller.send_commands(&commands).unwrap();
    assert_eq!(assignments.len(), 1);
    controller.prepare().unwrap();
    controller.commit().unwrap();

    let states = controller.get_node_states(&[root]).unwrap();
    assert_eq!(states[0].children.len(), 1);
    assert_eq!(states[0].children[0].id, assignments[0].id);
}

#[test]
fn test_abort_rolls_back_pending_add_over_tcp() {
    let (addr, _store) = spawn_server();
    let mut controller = TcpController::connect(addr).unwrap();
    let root = controller.login("default").unwrap();

    let commands = vec![MutationCommand::Add {
        parent: root.clone(),
        primary_type: QName::new("ecmnt:document"),
        token: "tok1".to_owned(),
        name: "child".to_owned(),
        properties: Vec::new(),
    }];
    controller.send_commands(&commands).unwrap();
    controller.abort().unwrap();

    let states = controller.get_node_states(&[root]).unwrap();
    assert!(states[0].children.is_empty());
}

#[test]
fn test_checkpoint_and_restore_over_tcp() {
    let (addr, _store) = spawn_server();
    let mut controller = TcpController::connect(addr).unwrap();
    let root = controller.login("default").unwrap();
    controller.checkpoint(&root).unwrap();
    let versions = controller.restore(&root, "").unwrap();
    assert_eq!(versions, vec!["v1".to_owned()]);
}
