//! Session pooling and one-time schema bootstrap, mirroring `db.py`'s
//! `Database` -- the top of the client stack that turns an endpoint and a
//! workspace name into ready-to-use [`Session`]s without every caller
//! re-fetching and re-compiling the node type definitions.

use std::rc::Rc;
use std::sync::{Mutex, OnceLock};

use coppice_base::Result;
use coppice_cnd::Compiler;
use coppice_controller::TcpController;
use coppice_schema::{ClassKind, SchemaManager};
use coppice_session::Session;

/// Everything a `Database` needs to know before it can open a session:
/// where the repository is, which workspace to log into, and how big to
/// make each session's object cache and the database's own session pool.
#[derive(Clone, Debug)]
pub struct Config {
    pub endpoint: String,
    pub workspace: String,
    pub cache_capacity: usize,
    pub pool_size: usize,
}

impl Config {
    pub fn new(endpoint: impl Into<String>, workspace: impl Into<String>) -> Config {
        Config {
            endpoint: endpoint.into(),
            workspace: workspace.into(),
            cache_capacity: 1000,
            pool_size: 4,
        }
    }
}

/// Schema manager for the workspace, loaded and compiled exactly once
/// (behind `OnceLock`, the safe-value-carrying equivalent of `db.py`'s
/// lock-protected one-time `loadSchemas`), plus a small pool of idle
/// sessions so repeated `open`/`release` cycles don't pay for a fresh login
/// every time.
pub struct Database {
    config: Config,
    schemas: OnceLock<Rc<SchemaManager>>,
    pool: Mutex<Vec<Rc<Session<TcpController>>>>,
}

impl Database {
    pub fn new(config: Config) -> Database {
        Database {
            config,
            schemas: OnceLock::new(),
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Returns a pooled, already-logged-in session if one is idle,
    /// otherwise connects and logs in fresh. Either way the schema manager
    /// behind it has been bootstrapped at most once for the life of this
    /// `Database`.
    pub fn open(&self) -> Result<Rc<Session<TcpController>>> {
        let schemas = self.ensure_schemas()?;
        {
            let mut pool = self.pool.lock().expect("session pool mutex poisoned");
            if let Some(session) = pool.pop() {
                return Ok(session);
            }
        }
        let controller = TcpController::connect(&self.config.endpoint)?;
        Session::open(controller, &self.config.workspace, schemas, self.config.cache_capacity)
    }

    /// Returns a session to the pool for reuse, up to `pool_size`; beyond
    /// that the session (and its connection) is simply dropped.
    pub fn release(&self, session: Rc<Session<TcpController>>) {
        let mut pool = self.pool.lock().expect("session pool mutex poisoned");
        if pool.len() < self.config.pool_size {
            pool.push(session);
        }
    }

    /// `db.py`'s `getClass` helper: what runtime kind a node of this type
    /// should be loaded as, bootstrapping the schema manager first if this
    /// is the first call against a fresh `Database`.
    pub fn get_class(&self, type_name: &str) -> Result<ClassKind> {
        self.ensure_schemas()?.get_class(type_name)
    }

    /// `db.py`'s `isMultiple` helper.
    pub fn is_multiple(&self, type_name: &str, child_name: &str) -> Result<bool> {
        Ok(self.ensure_schemas()?.is_multiple(type_name, child_name))
    }

    fn ensure_schemas(&self) -> Result<Rc<SchemaManager>> {
        if let Some(schemas) = self.schemas.get() {
            return Ok(schemas.clone());
        }
        let mut controller = TcpController::connect(&self.config.endpoint)?;
        let cnd = controller.get_node_type_defs()?;
        let mut compiler = Compiler::new();
        compiler.add_data(&cnd)?;
        let mut manager = SchemaManager::new();
        manager.add_schemas(compiler.schemas().cloned());
        let schemas = Rc::new(manager);
        // A `Database` is single-threaded (it hands out `Rc`-based
        // sessions), so this can't actually race -- `set` only fails if
        // `ensure_schemas` is somehow reentered, in which case the existing
        // value wins.
        let _ = self.schemas.set(schemas.clone());
        Ok(self.schemas.get().cloned().unwrap_or(schemas))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new("127.0.0.1:9999", "default");
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.pool_size, 4);
    }
}
