//! SQLite connection lifecycle.
//!
//! A `Connection` owns the native handle and tracks every object that
//! borrows it: statements, blobs and backups register themselves in the
//! connection's live set when created and are finalized, in creation order,
//! before the handle is closed. Using any of them afterwards reports
//! `Error::Disposed` instead of touching freed memory.
//!
//! Connections are single-threaded (`!Send`). The only cross-thread entry
//! point is [`InterruptHandle`].

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::result_large_err)]

use crate::error::{check, from_code, from_code_only};
use crate::ffi;
use crate::function::FunctionRegistry;
use crate::hooks::HookHub;
use crate::statement::Statement;
use sqlkit_core::{
    ContractError, EngineError, Error, ObjectKind, OpenError, Result, Row, StatusResult,
    TableColumnMetadata, Value,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::{c_char, c_int};
use std::ptr;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Name of the VFS module to use, or `None` for the default.
    pub vfs: Option<String>,
    /// Busy timeout in milliseconds. Zero leaves no busy handler installed.
    pub busy_timeout_ms: u32,
    /// Report extended result codes from the handle.
    pub extended_result_codes: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode (connections not shared between threads).
    pub no_mutex: bool,
    /// Open in serialized mode.
    pub full_mutex: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
    /// Disable shared cache mode.
    pub private_cache: bool,
    /// Treat the path as an in-memory database name.
    pub memory: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    pub(crate) fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }
        if self.private_cache {
            flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
        }
        if self.memory {
            flags |= ffi::SQLITE_OPEN_MEMORY;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            vfs: None,
            busy_timeout_ms: 5000,
            extended_result_codes: true,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Use a named VFS.
    pub fn vfs(mut self, vfs: impl Into<String>) -> Self {
        self.vfs = Some(vfs.into());
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Enable or disable extended result codes.
    pub fn extended_result_codes(mut self, enabled: bool) -> Self {
        self.extended_result_codes = enabled;
        self
    }
}

/// An object whose native handle depends on a live connection.
pub(crate) trait LiveHandle {
    fn kind(&self) -> ObjectKind;
    /// Release the native handle. Idempotent.
    fn dispose(&self);
}

/// Raw handle shared with [`InterruptHandle`]; null once closed.
struct InterruptTarget(*mut ffi::sqlite3);

// SAFETY: the pointer is only dereferenced by sqlite3_interrupt, which the
// engine documents as safe to call from any thread, and only while the
// mutex guarantees the handle has not been closed.
unsafe impl Send for InterruptTarget {}

/// A `Send + Sync` handle that cancels whatever the connection is running.
///
/// Becomes a no-op once the connection is closed.
#[derive(Clone)]
pub struct InterruptHandle {
    target: Arc<Mutex<InterruptTarget>>,
}

impl InterruptHandle {
    /// Make the in-flight step fail with `Error::Cancelled`.
    pub fn interrupt(&self) {
        let target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if !target.0.is_null() {
            // SAFETY: non-null means the connection is still open, and close
            // takes this same lock before releasing the handle
            unsafe { ffi::sqlite3_interrupt(target.0) };
        }
    }

    /// Whether the connection this handle points at is still open.
    pub fn is_connected(&self) -> bool {
        let target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        !target.0.is_null()
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Shared connection state. Dependents hold a `Weak` to it.
pub(crate) struct InnerConnection {
    db: Cell<*mut ffi::sqlite3>,
    path: String,
    next_id: Cell<u64>,
    dependents: RefCell<BTreeMap<u64, Rc<dyn LiveHandle>>>,
    registry: RefCell<FunctionRegistry>,
    hooks: Box<HookHub>,
    interrupt: Arc<Mutex<InterruptTarget>>,
    savepoints: Cell<u64>,
    closing: Cell<bool>,
}

impl InnerConnection {
    /// The live handle, or `Disposed(Connection)` after close.
    pub(crate) fn db(&self) -> Result<*mut ffi::sqlite3> {
        let db = self.db.get();
        if db.is_null() {
            Err(Error::disposed(ObjectKind::Connection))
        } else {
            Ok(db)
        }
    }

    /// Add a dependent to the live set, returning its key.
    pub(crate) fn register(&self, handle: Rc<dyn LiveHandle>) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.dependents.borrow_mut().insert(id, handle);
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        if let Ok(mut dependents) = self.dependents.try_borrow_mut() {
            dependents.remove(&id);
        }
    }

    pub(crate) fn live_count(&self, kind: ObjectKind) -> usize {
        self.dependents
            .borrow()
            .values()
            .filter(|handle| handle.kind() == kind)
            .count()
    }

    pub(crate) fn hooks(&self) -> &HookHub {
        &self.hooks
    }

    pub(crate) fn registry(&self) -> &RefCell<FunctionRegistry> {
        &self.registry
    }

    pub(crate) fn next_savepoint(&self) -> u64 {
        let n = self.savepoints.get() + 1;
        self.savepoints.set(n);
        n
    }

    fn close(&self) -> Result<()> {
        let db = self.db.get();
        // A closing observer that closes again must not re-enter.
        if db.is_null() || self.closing.replace(true) {
            return Ok(());
        }

        self.hooks.fire_closing();

        let dependents = std::mem::take(&mut *self.dependents.borrow_mut());
        let count = dependents.len();
        for handle in dependents.into_values() {
            handle.dispose();
        }

        // SAFETY: db is live; nothing registered on it may fire after this
        unsafe { self.hooks.uninstall(db) };
        self.hooks.clear();

        let mut target = self
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // SAFETY: every statement, blob and backup has been finalized above
        let rc = unsafe { ffi::sqlite3_close(db) };
        if rc != ffi::SQLITE_OK {
            drop(target);
            let error = from_code(db, rc, None);
            tracing::warn!(
                path = %self.path,
                code = rc,
                error = %error,
                "close failed; handle kept open"
            );
            self.closing.set(false);
            return Err(error);
        }
        target.0 = ptr::null_mut();
        drop(target);

        self.db.set(ptr::null_mut());
        self.closing.set(false);
        tracing::debug!(path = %self.path, finalized = count, "closed connection");
        Ok(())
    }
}

impl Drop for InnerConnection {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(path = %self.path, error = %error, "error closing connection on drop");
        }
    }
}

/// Checkpoint modes for `wal_checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Passive,
    Full,
    Restart,
    Truncate,
}

impl CheckpointMode {
    fn to_raw(self) -> c_int {
        match self {
            CheckpointMode::Passive => ffi::SQLITE_CHECKPOINT_PASSIVE,
            CheckpointMode::Full => ffi::SQLITE_CHECKPOINT_FULL,
            CheckpointMode::Restart => ffi::SQLITE_CHECKPOINT_RESTART,
            CheckpointMode::Truncate => ffi::SQLITE_CHECKPOINT_TRUNCATE,
        }
    }
}

/// Per-connection counters for `Connection::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStatus {
    LookasideUsed,
    CacheUsed,
    SchemaUsed,
    StatementUsed,
    LookasideHit,
    LookasideMissSize,
    LookasideMissFull,
    CacheHit,
    CacheMiss,
    CacheWrite,
    DeferredForeignKeys,
    CacheUsedShared,
    CacheSpill,
}

impl DatabaseStatus {
    fn to_raw(self) -> c_int {
        match self {
            DatabaseStatus::LookasideUsed => ffi::SQLITE_DBSTATUS_LOOKASIDE_USED,
            DatabaseStatus::CacheUsed => ffi::SQLITE_DBSTATUS_CACHE_USED,
            DatabaseStatus::SchemaUsed => ffi::SQLITE_DBSTATUS_SCHEMA_USED,
            DatabaseStatus::StatementUsed => ffi::SQLITE_DBSTATUS_STMT_USED,
            DatabaseStatus::LookasideHit => ffi::SQLITE_DBSTATUS_LOOKASIDE_HIT,
            DatabaseStatus::LookasideMissSize => ffi::SQLITE_DBSTATUS_LOOKASIDE_MISS_SIZE,
            DatabaseStatus::LookasideMissFull => ffi::SQLITE_DBSTATUS_LOOKASIDE_MISS_FULL,
            DatabaseStatus::CacheHit => ffi::SQLITE_DBSTATUS_CACHE_HIT,
            DatabaseStatus::CacheMiss => ffi::SQLITE_DBSTATUS_CACHE_MISS,
            DatabaseStatus::CacheWrite => ffi::SQLITE_DBSTATUS_CACHE_WRITE,
            DatabaseStatus::DeferredForeignKeys => ffi::SQLITE_DBSTATUS_DEFERRED_FKS,
            DatabaseStatus::CacheUsedShared => ffi::SQLITE_DBSTATUS_CACHE_USED_SHARED,
            DatabaseStatus::CacheSpill => ffi::SQLITE_DBSTATUS_CACHE_SPILL,
        }
    }
}

/// Process-wide counters for [`status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteStatus {
    MemoryUsed,
    PageCacheUsed,
    PageCacheOverflow,
    MallocSize,
    ParserStack,
    PageCacheSize,
    MallocCount,
}

impl SqliteStatus {
    fn to_raw(self) -> c_int {
        match self {
            SqliteStatus::MemoryUsed => ffi::SQLITE_STATUS_MEMORY_USED,
            SqliteStatus::PageCacheUsed => ffi::SQLITE_STATUS_PAGECACHE_USED,
            SqliteStatus::PageCacheOverflow => ffi::SQLITE_STATUS_PAGECACHE_OVERFLOW,
            SqliteStatus::MallocSize => ffi::SQLITE_STATUS_MALLOC_SIZE,
            SqliteStatus::ParserStack => ffi::SQLITE_STATUS_PARSER_STACK,
            SqliteStatus::PageCacheSize => ffi::SQLITE_STATUS_PAGECACHE_SIZE,
            SqliteStatus::MallocCount => ffi::SQLITE_STATUS_MALLOC_COUNT,
        }
    }
}

/// Read a process-wide engine counter.
pub fn status(op: SqliteStatus, reset: bool) -> Result<StatusResult> {
    let mut current: i64 = 0;
    let mut high_water: i64 = 0;
    // SAFETY: both out-pointers are valid for the call
    let rc = unsafe {
        ffi::sqlite3_status64(op.to_raw(), &mut current, &mut high_water, c_int::from(reset))
    };
    if rc != ffi::SQLITE_OK {
        return Err(from_code_only(rc));
    }
    Ok(StatusResult {
        current,
        high_water,
    })
}

/// A connection to a SQLite database.
pub struct Connection {
    pub(crate) inner: Rc<InnerConnection>,
}

impl Connection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let open_error = |error: EngineError| {
            Error::Open(OpenError {
                path: config.path.clone(),
                error,
            })
        };
        let nul_error = |what: &str| {
            open_error(EngineError::new(
                ffi::SQLITE_MISUSE,
                format!("{} contains an interior NUL byte", what),
            ))
        };

        let c_path = ffi::to_cstring(&config.path).map_err(|_| nul_error("path"))?;
        let c_vfs = config
            .vfs
            .as_deref()
            .map(ffi::to_cstring)
            .transpose()
            .map_err(|_| nul_error("vfs name"))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut db,
                flags,
                c_vfs.as_ref().map_or(ptr::null(), |v| v.as_ptr()),
            )
        };

        if rc != ffi::SQLITE_OK {
            let error = if db.is_null() {
                EngineError::new(rc, ffi::error_string(rc))
            } else {
                // SAFETY: db is valid even on failure and must still be closed
                unsafe {
                    let extended = ffi::sqlite3_extended_errcode(db);
                    let message = ffi::string_from_ptr(ffi::sqlite3_errmsg(db))
                        .unwrap_or_else(|| ffi::error_string(rc));
                    ffi::sqlite3_close(db);
                    EngineError::new(extended, message)
                }
            };
            tracing::debug!(path = %config.path, code = rc, "open failed");
            return Err(open_error(error));
        }

        // SAFETY: db is valid
        unsafe {
            ffi::sqlite3_extended_result_codes(db, c_int::from(config.extended_result_codes));
            if config.busy_timeout_ms > 0 {
                let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        let hooks = Box::new(HookHub::new());
        // SAFETY: db is live; the hub is boxed and owned by the connection,
        // which uninstalls it before closing the handle
        unsafe { hooks.install(db) };

        tracing::debug!(path = %config.path, flags, "opened connection");

        Ok(Self {
            inner: Rc::new(InnerConnection {
                db: Cell::new(db),
                path: config.path.clone(),
                next_id: Cell::new(1),
                dependents: RefCell::new(BTreeMap::new()),
                registry: RefCell::new(FunctionRegistry::new()),
                hooks,
                interrupt: Arc::new(Mutex::new(InterruptTarget(db))),
                savepoints: Cell::new(0),
                closing: Cell::new(false),
            }),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Open with explicit flags and an optional VFS.
    pub fn open_with_flags(path: impl Into<String>, flags: OpenFlags, vfs: Option<&str>) -> Result<Self> {
        let mut config = SqliteConfig::file(path).flags(flags);
        config.vfs = vfs.map(str::to_string);
        Self::open(&config)
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.db().is_err()
    }

    /// Compile the first statement in `sql`.
    ///
    /// Returns the statement (or `None` if `sql` holds only whitespace and
    /// comments) together with the text after it.
    pub fn prepare_partial<'s>(&self, sql: &'s str) -> Result<(Option<Statement>, &'s str)> {
        let db = self.inner.db()?;
        let c_sql = ffi::to_cstring(sql)?;
        let len = c_int::try_from(c_sql.as_bytes_with_nul().len()).map_err(|_| {
            Error::Contract(ContractError::InvalidArgument(
                "SQL text is too long".to_string(),
            ))
        })?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();

        // SAFETY: all pointers are valid for the call; tail points into c_sql
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), len, &mut raw, &mut tail) };
        if rc != ffi::SQLITE_OK {
            return Err(from_code(db, rc, Some(sql)));
        }

        let consumed = if tail.is_null() {
            sql.len()
        } else {
            (tail as usize)
                .saturating_sub(c_sql.as_ptr() as usize)
                .min(sql.len())
        };
        let rest = sql.get(consumed..).unwrap_or("");

        if raw.is_null() {
            return Ok((None, rest));
        }
        Ok((Some(Statement::from_raw(&self.inner, raw)), rest))
    }

    /// Compile exactly one statement.
    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        let (stmt, rest) = self.prepare_partial(sql)?;
        let Some(stmt) = stmt else {
            return Err(Error::Contract(ContractError::InvalidArgument(
                "no SQL statement to prepare".to_string(),
            )));
        };
        if !is_blank_sql(rest) {
            return Err(Error::Contract(ContractError::TrailingSql(
                rest.trim().to_string(),
            )));
        }
        Ok(stmt)
    }

    /// Compile every statement in `sql`, in order.
    ///
    /// All statements are compiled up front, so a later statement may not
    /// refer to a table an earlier one creates. Use `execute_batch` for that.
    pub fn prepare_all(&self, sql: &str) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        let mut rest = sql;
        while let (Some(stmt), tail) = self.prepare_partial(rest)? {
            statements.push(stmt);
            rest = tail;
        }
        Ok(statements)
    }

    /// Execute SQL directly without preparing (for DDL, etc.)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let db = self.inner.db()?;
        let c_sql = ffi::to_cstring(sql)?;
        let mut errmsg: *mut c_char = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

        if !errmsg.is_null() {
            // SAFETY: errmsg was allocated by sqlite3_malloc
            unsafe { ffi::sqlite3_free(errmsg.cast()) };
        }
        if rc != ffi::SQLITE_OK {
            return Err(from_code(db, rc, Some(sql)));
        }
        Ok(())
    }

    /// Prepare, bind and run a single statement, returning rows changed.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let mut stmt = self.prepare(sql)?;
        stmt.execute(params)
    }

    /// Prepare and run a query, returning every row.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.prepare(sql)?;
        let rows = stmt.query(params)?.collect::<Result<Vec<_>>>();
        rows
    }

    /// The first row of a query, if any.
    pub fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut stmt = self.prepare(sql)?;
        let row = stmt.query(params)?.next().transpose();
        row
    }

    /// The first column of the first row, or NULL if there are no rows.
    pub fn query_scalar(&self, sql: &str, params: &[Value]) -> Result<Value> {
        Ok(self
            .query_row(sql, params)?
            .and_then(|row| row.into_values().into_iter().next())
            .unwrap_or(Value::Null))
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> Result<u64> {
        let db = self.inner.db()?;
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_changes64(db) };
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Rows changed since the connection opened.
    pub fn total_changes(&self) -> Result<u64> {
        let db = self.inner.db()?;
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_total_changes64(db) };
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Get the last insert rowid.
    pub fn last_inserted_rowid(&self) -> Result<i64> {
        let db = self.inner.db()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    /// True outside an explicit transaction.
    pub fn is_auto_commit(&self) -> Result<bool> {
        let db = self.inner.db()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_get_autocommit(db) } != 0)
    }

    /// Whether the attached database `db_name` is read-only.
    pub fn is_read_only(&self, db_name: &str) -> Result<bool> {
        let db = self.inner.db()?;
        let name = ffi::to_cstring(db_name)?;
        // SAFETY: db and name are valid
        match unsafe { ffi::sqlite3_db_readonly(db, name.as_ptr()) } {
            -1 => Err(Error::Contract(ContractError::InvalidArgument(format!(
                "no attached database named '{}'",
                db_name
            )))),
            n => Ok(n != 0),
        }
    }

    /// File backing the attached database `db_name`. `None` for in-memory
    /// and temporary databases or unknown names.
    pub fn filename(&self, db_name: &str) -> Result<Option<String>> {
        let db = self.inner.db()?;
        let name = ffi::to_cstring(db_name)?;
        // SAFETY: db and name are valid; the result is owned by the engine
        let file = unsafe { ffi::string_from_ptr(ffi::sqlite3_db_filename(db, name.as_ptr())) };
        Ok(file.filter(|f| !f.is_empty()))
    }

    /// Number of statements prepared on this connection and not yet closed.
    pub fn statement_count(&self) -> usize {
        self.inner.live_count(ObjectKind::Statement)
    }

    /// Cancel whatever this connection is running.
    pub fn interrupt(&self) -> Result<()> {
        let db = self.inner.db()?;
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_interrupt(db) };
        Ok(())
    }

    /// A handle that can interrupt this connection from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            target: Arc::clone(&self.inner.interrupt),
        }
    }

    /// Run a WAL checkpoint on `db_name`, returning the number of frames in
    /// the log and the number checkpointed.
    pub fn wal_checkpoint(&self, db_name: &str, mode: CheckpointMode) -> Result<(i32, i32)> {
        let db = self.inner.db()?;
        let name = ffi::to_cstring(db_name)?;
        let mut log_frames: c_int = 0;
        let mut checkpointed: c_int = 0;
        // SAFETY: all pointers are valid for the call
        let rc = unsafe {
            ffi::sqlite3_wal_checkpoint_v2(
                db,
                name.as_ptr(),
                mode.to_raw(),
                &mut log_frames,
                &mut checkpointed,
            )
        };
        check(db, rc)?;
        Ok((log_frames, checkpointed))
    }

    /// Read a per-connection counter.
    pub fn status(&self, op: DatabaseStatus, reset: bool) -> Result<StatusResult> {
        let db = self.inner.db()?;
        let mut current: c_int = 0;
        let mut high_water: c_int = 0;
        // SAFETY: all pointers are valid for the call
        let rc = unsafe {
            ffi::sqlite3_db_status(
                db,
                op.to_raw(),
                &mut current,
                &mut high_water,
                c_int::from(reset),
            )
        };
        check(db, rc)?;
        Ok(StatusResult {
            current: i64::from(current),
            high_water: i64::from(high_water),
        })
    }

    /// Declared metadata for `table.column` in `db_name` (or every attached
    /// database when `None`).
    pub fn table_column_metadata(
        &self,
        db_name: Option<&str>,
        table: &str,
        column: &str,
    ) -> Result<TableColumnMetadata> {
        let db = self.inner.db()?;
        let c_db = db_name.map(ffi::to_cstring).transpose()?;
        let c_table = ffi::to_cstring(table)?;
        let c_column = ffi::to_cstring(column)?;

        let mut data_type: *const c_char = ptr::null();
        let mut coll_seq: *const c_char = ptr::null();
        let mut not_null: c_int = 0;
        let mut primary_key: c_int = 0;
        let mut auto_inc: c_int = 0;

        // SAFETY: all pointers are valid; the returned strings are owned by
        // the engine and copied before the next call
        unsafe {
            let rc = ffi::sqlite3_table_column_metadata(
                db,
                c_db.as_ref().map_or(ptr::null(), |d| d.as_ptr()),
                c_table.as_ptr(),
                c_column.as_ptr(),
                &mut data_type,
                &mut coll_seq,
                &mut not_null,
                &mut primary_key,
                &mut auto_inc,
            );
            check(db, rc)?;
            Ok(TableColumnMetadata {
                declared_type: ffi::string_from_ptr(data_type),
                collation_sequence: ffi::string_from_ptr(coll_seq),
                has_not_null_constraint: not_null != 0,
                is_primary_key: primary_key != 0,
                is_auto_increment: auto_inc != 0,
            })
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Fires `on_closing` observers, finalizes every open statement, blob
    /// and backup, then releases the native handle.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// True if `sql` holds nothing but whitespace, semicolons and comments.
fn is_blank_sql(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |i| &after[i + 1..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            // An unterminated block comment runs to the end of input.
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
        } else {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = Connection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert!(!conn.is_closed());
        assert_eq!(conn.filename("main").unwrap(), None);
    }

    #[test]
    fn test_execute_batch() {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO test (name) VALUES ('a'), ('b');",
        )
        .unwrap();
        assert_eq!(conn.total_changes().unwrap(), 2);

        let err = conn.execute_batch("SELEC 1").unwrap_err();
        assert!(err.engine().unwrap().message.contains("syntax error"));
        assert_eq!(err.sql(), Some("SELEC 1"));
    }

    #[test]
    fn test_query_helpers() {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO test (name) VALUES ('Alice'), ('Bob');",
        )
        .unwrap();

        let rows = conn
            .query("SELECT id, name FROM test ORDER BY id", &[])
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_named::<String>("name").unwrap(), "Bob");

        let row = conn
            .query_row("SELECT name FROM test WHERE id = ?", &[Value::Integer(1)])
            .unwrap()
            .unwrap();
        assert_eq!(row.get(0), Some(&Value::Text("Alice".to_string())));

        assert!(
            conn.query_row("SELECT name FROM test WHERE id = 99", &[])
                .unwrap()
                .is_none()
        );
        assert_eq!(
            conn.query_scalar("SELECT name FROM test WHERE id = 99", &[])
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_execute_and_counters() {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY, v INTEGER)")
            .unwrap();
        for i in 0..3 {
            conn.execute("INSERT INTO test (v) VALUES (?)", &[Value::Integer(i)])
                .unwrap();
        }
        assert_eq!(conn.last_inserted_rowid().unwrap(), 3);
        assert_eq!(conn.execute("UPDATE test SET v = v + 1", &[]).unwrap(), 3);
        assert_eq!(conn.changes().unwrap(), 3);
        assert_eq!(conn.total_changes().unwrap(), 6);
    }

    #[test]
    fn test_prepare_partial_returns_tail() {
        let conn = Connection::open_memory().unwrap();
        let (stmt, rest) = conn.prepare_partial("SELECT 1; SELECT 2").unwrap();
        assert_eq!(stmt.unwrap().sql(), "SELECT 1;");
        assert_eq!(rest, " SELECT 2");

        let (stmt, rest) = conn.prepare_partial("  -- nothing here\n").unwrap();
        assert!(stmt.is_none());
        assert_eq!(rest, "");
    }

    #[test]
    fn test_prepare_rejects_trailing_and_empty() {
        let conn = Connection::open_memory().unwrap();
        assert!(conn.prepare("SELECT 1;  -- trailing comment\n").is_ok());

        let err = conn.prepare("SELECT 1; SELECT 2").unwrap_err();
        assert!(matches!(
            err,
            Error::Contract(ContractError::TrailingSql(ref rest)) if rest == "SELECT 2"
        ));

        let err = conn.prepare("   ").unwrap_err();
        assert!(matches!(err, Error::Contract(ContractError::InvalidArgument(_))));
    }

    #[test]
    fn test_prepare_all() {
        let conn = Connection::open_memory().unwrap();
        let stmts = conn.prepare_all("SELECT 1; SELECT 2; /* done */").unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(conn.statement_count(), 2);
        drop(stmts);
        assert_eq!(conn.statement_count(), 0);
    }

    #[test]
    fn test_prepare_error_carries_sql() {
        let conn = Connection::open_memory().unwrap();
        let err = conn.prepare("SELECT * FROM missing").unwrap_err();
        assert_eq!(err.sql(), Some("SELECT * FROM missing"));
        assert!(err.engine().unwrap().message.contains("no such table"));
    }

    #[test]
    fn test_nul_in_sql_is_contract_error() {
        let conn = Connection::open_memory().unwrap();
        let err = conn.prepare("SELECT 1\0").unwrap_err();
        assert!(matches!(err, Error::Contract(ContractError::NulByte(_))));
    }

    #[test]
    fn test_autocommit_tracks_transactions() {
        let conn = Connection::open_memory().unwrap();
        assert!(conn.is_auto_commit().unwrap());
        conn.execute_batch("BEGIN").unwrap();
        assert!(!conn.is_auto_commit().unwrap());
        conn.execute_batch("COMMIT").unwrap();
        assert!(conn.is_auto_commit().unwrap());
        conn.execute_batch("BEGIN").unwrap();
        conn.execute_batch("ROLLBACK").unwrap();
        assert!(conn.is_auto_commit().unwrap());
    }

    #[test]
    fn test_close_is_idempotent_and_disposes() {
        let conn = Connection::open_memory().unwrap();
        let mut stmt = conn.prepare("SELECT 1").unwrap();
        assert_eq!(conn.statement_count(), 1);

        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());

        assert!(conn.prepare("SELECT 1").unwrap_err().is_disposed());
        assert!(conn.changes().unwrap_err().is_disposed());
        let err = stmt.step().unwrap_err();
        assert!(matches!(
            err,
            Error::Disposed(sqlkit_core::DisposedError {
                object: ObjectKind::Statement
            })
        ));
    }

    #[test]
    fn test_closing_observers_fire_before_finalize() {
        let conn = Connection::open_memory().unwrap();
        let _stmt = conn.prepare("SELECT 1").unwrap();
        let seen = Rc::new(Cell::new(usize::MAX));
        let inner = Rc::downgrade(&conn.inner);
        let sink = Rc::clone(&seen);
        conn.on_closing(move || {
            if let Some(inner) = inner.upgrade() {
                sink.set(inner.live_count(ObjectKind::Statement));
            }
        })
        .unwrap();
        conn.close().unwrap();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_close_from_closing_observer_fires_once() {
        let conn = Connection::open_memory().unwrap();
        let fired = Rc::new(Cell::new(0));
        let inner = Rc::downgrade(&conn.inner);
        let sink = Rc::clone(&fired);
        conn.on_closing(move || {
            sink.set(sink.get() + 1);
            if let Some(inner) = inner.upgrade() {
                inner.close().unwrap();
            }
        })
        .unwrap();
        conn.close().unwrap();
        assert_eq!(fired.get(), 1);
        assert!(conn.is_closed());
        conn.close().unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_interrupt_handle_after_close_is_noop() {
        let conn = Connection::open_memory().unwrap();
        let handle = conn.interrupt_handle();
        assert!(handle.is_connected());
        conn.close().unwrap();
        assert!(!handle.is_connected());
        handle.interrupt();
    }

    #[test]
    fn test_is_read_only_and_unknown_database() {
        let conn = Connection::open_memory().unwrap();
        assert!(!conn.is_read_only("main").unwrap());
        assert!(conn.is_read_only("nope").unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_open_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.db");
        let path = path.to_str().unwrap().to_string();

        let conn = Connection::open_file(path.clone()).unwrap();
        conn.execute_batch("CREATE TABLE test (id INTEGER)").unwrap();
        let file = conn.filename("main").unwrap().unwrap();
        assert!(file.ends_with("flags.db"));
        conn.close().unwrap();

        let conn = Connection::open_with_flags(path.clone(), OpenFlags::read_only(), None).unwrap();
        assert!(conn.is_read_only("main").unwrap());
        let err = conn.execute_batch("INSERT INTO test VALUES (1)").unwrap_err();
        assert_eq!(err.primary_code(), Some(sqlkit_core::ResultCode::ReadOnly));
    }

    #[test]
    fn test_open_missing_file_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let err = Connection::open_with_flags(
            path.to_str().unwrap(),
            OpenFlags::read_write(),
            None,
        )
        .unwrap_err();
        match err {
            Error::Open(open) => {
                assert!(open.path.ends_with("missing.db"));
                assert_eq!(open.error.code, sqlkit_core::ResultCode::CantOpen);
            }
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[test]
    fn test_open_unknown_vfs() {
        let config = SqliteConfig::memory().vfs("no-such-vfs");
        assert!(matches!(Connection::open(&config), Err(Error::Open(_))));
    }

    #[test]
    fn test_config_defaults() {
        let config = SqliteConfig::file("x.db").busy_timeout(0).extended_result_codes(false);
        assert_eq!(config.path, "x.db");
        assert_eq!(config.busy_timeout_ms, 0);
        assert!(!config.extended_result_codes);
        assert_eq!(config.flags, OpenFlags::create_read_write());
        assert_eq!(
            OpenFlags::default().to_sqlite_flags(),
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE
        );
    }

    #[test]
    fn test_table_column_metadata() {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL COLLATE NOCASE)",
        )
        .unwrap();

        let id = conn.table_column_metadata(None, "t", "id").unwrap();
        assert!(id.is_primary_key);
        assert!(id.is_auto_increment);
        assert_eq!(id.declared_type.as_deref(), Some("INTEGER"));

        let name = conn.table_column_metadata(Some("main"), "t", "name").unwrap();
        assert!(name.has_not_null_constraint);
        assert_eq!(name.collation_sequence.as_deref(), Some("NOCASE"));

        assert!(conn.table_column_metadata(None, "t", "missing").is_err());
    }

    #[test]
    fn test_status_counters() {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x)").unwrap();
        let schema = conn.status(DatabaseStatus::SchemaUsed, false).unwrap();
        assert!(schema.current > 0);

        let memory = status(SqliteStatus::MemoryUsed, false).unwrap();
        assert!(memory.high_water >= memory.current);
    }

    #[test]
    fn test_blank_sql_detection() {
        assert!(is_blank_sql(""));
        assert!(is_blank_sql(" ;; \n"));
        assert!(is_blank_sql("-- only a comment"));
        assert!(is_blank_sql("/* block */ ; -- line\n  "));
        assert!(!is_blank_sql("/* block */ SELECT 1"));
        assert!(!is_blank_sql("- 1"));
    }
}
