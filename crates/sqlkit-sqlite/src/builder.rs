//! Connection builder.
//!
//! Collects configuration, functions, collations and callbacks up front and
//! applies them all when the connection opens. Duplicate registrations are
//! rejected as they are added, before anything is opened.

use crate::connection::{Connection, OpenFlags, SqliteConfig};
use crate::function::{AggregateFunction, Collation, FunctionRegistry, ScalarFunction};
use crate::hooks::{Authorization, Authorizer, AuthorizerRequest, CommitHook, ProgressHandler};
use sqlkit_core::Result;
use std::rc::Rc;

/// Builder for [`Connection`].
#[must_use]
pub struct ConnectionBuilder {
    config: SqliteConfig,
    registry: FunctionRegistry,
    scalars: Vec<ScalarFunction>,
    aggregates: Vec<AggregateFunction>,
    collations: Vec<Collation>,
    commit_hook: Option<CommitHook>,
    authorizer: Option<Authorizer>,
    progress_handler: Option<(i32, ProgressHandler)>,
}

impl ConnectionBuilder {
    /// Start from a file path.
    pub fn new(path: impl Into<String>) -> Self {
        Self::from_config(SqliteConfig::file(path))
    }

    /// Start from an in-memory database.
    pub fn memory() -> Self {
        Self::from_config(SqliteConfig::memory())
    }

    pub fn from_config(config: SqliteConfig) -> Self {
        Self {
            config,
            registry: FunctionRegistry::new(),
            scalars: Vec::new(),
            aggregates: Vec::new(),
            collations: Vec::new(),
            commit_hook: None,
            authorizer: None,
            progress_handler: None,
        }
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.config.flags = flags;
        self
    }

    pub fn vfs(mut self, vfs: impl Into<String>) -> Self {
        self.config.vfs = Some(vfs.into());
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.config.busy_timeout_ms = ms;
        self
    }

    pub fn extended_result_codes(mut self, enabled: bool) -> Self {
        self.config.extended_result_codes = enabled;
        self
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn with_scalar_function(mut self, function: ScalarFunction) -> Result<Self> {
        self.registry.add_scalar(function.name(), function.arity())?;
        self.scalars.push(function);
        Ok(self)
    }

    pub fn with_aggregate_function(mut self, function: AggregateFunction) -> Result<Self> {
        self.registry
            .add_aggregate(function.name(), function.arity())?;
        self.aggregates.push(function);
        Ok(self)
    }

    pub fn with_collation(mut self, collation: Collation) -> Result<Self> {
        self.registry.add_collation(collation.name())?;
        self.collations.push(collation);
        Ok(self)
    }

    pub fn with_commit_hook<F: Fn() -> bool + 'static>(mut self, hook: F) -> Self {
        self.commit_hook = Some(Rc::new(hook));
        self
    }

    pub fn with_authorizer<F>(mut self, authorizer: F) -> Self
    where
        F: Fn(&AuthorizerRequest<'_>) -> Authorization + 'static,
    {
        self.authorizer = Some(Rc::new(authorizer));
        self
    }

    pub fn with_progress_handler<F: Fn() -> bool + 'static>(mut self, n_ops: i32, handler: F) -> Self {
        self.progress_handler = Some((n_ops, Rc::new(handler)));
        self
    }

    /// Open the connection and apply everything collected so far.
    ///
    /// If any registration fails the half-built connection is closed and
    /// the error returned.
    pub fn build(self) -> Result<Connection> {
        let conn = Connection::open(&self.config)?;

        for function in self.scalars {
            conn.register_scalar_function(function)?;
        }
        for function in self.aggregates {
            conn.register_aggregate_function(function)?;
        }
        for collation in self.collations {
            conn.register_collation(collation)?;
        }
        if let Some(hook) = self.commit_hook {
            conn.install_commit_hook(Some(hook))?;
        }
        if let Some(authorizer) = self.authorizer {
            conn.install_authorizer(Some(authorizer))?;
        }
        if let Some((n_ops, handler)) = self.progress_handler {
            conn.install_progress_handler(n_ops, Some(handler))?;
        }

        tracing::debug!(path = %self.config.path, "built connection");
        Ok(conn)
    }
}

impl std::fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("config", &self.config)
            .field("scalars", &self.scalars)
            .field("aggregates", &self.aggregates)
            .field("collations", &self.collations)
            .finish_non_exhaustive()
    }
}
