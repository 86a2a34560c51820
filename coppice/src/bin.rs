//! A minimal CLI exercising the client stack end to end: connect, fetch the
//! workspace root, create a child document, set a property, and commit.
//!
//! ```text
//! coppice <endpoint> <workspace>
//! ```

use std::env;
use std::process::ExitCode;

use coppice::{Config, Database};
use coppice_types::Value;
use tracing::info;

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| "127.0.0.1:7337".to_owned());
    let workspace = args.next().unwrap_or_else(|| "main".to_owned());

    match run(&endpoint, &workspace) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("coppice: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(endpoint: &str, workspace: &str) -> coppice_base::Result<()> {
    let db = Database::new(Config::new(endpoint, workspace));
    let session = db.open()?;
    info!(target: "coppice", %endpoint, %workspace, "session opened");

    let root = session.root()?;
    let note = root.add_child("greeting", &coppice_types::QName::new("ecmnt:note"))?;
    note.set_property("title", Some(Value::from("hello from coppice")))?;
    session.commit()?;

    println!("created {} under {}", note.id(), root.id());
    db.release(session);
    Ok(())
}
