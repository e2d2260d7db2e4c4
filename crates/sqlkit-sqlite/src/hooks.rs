//! Connection hooks and observers.
//!
//! The rollback, update and trace hooks are installed once when a connection
//! opens and fan out to any number of observers. Commit, progress and
//! authorizer callbacks are single-slot: setting one replaces the previous.
//!
//! Every callback runs under `catch_unwind`. A panic is logged and resolved
//! with a fixed fallback: commit turns into a rollback, the progress handler
//! interrupts, the authorizer denies, observers are skipped.

#![allow(clippy::cast_possible_truncation)]

use crate::connection::Connection;
use crate::ffi;
use crate::function::panic_message;
use sqlkit_core::Result;
use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::rc::Rc;
use std::time::Duration;

/// Handle returned when subscribing an observer, for `remove_observer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// The kind of row change reported to update observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCode {
    Insert,
    Update,
    Delete,
    Other(i32),
}

impl ActionCode {
    fn from_raw(code: c_int) -> Self {
        match code {
            ffi::SQLITE_INSERT => ActionCode::Insert,
            ffi::SQLITE_UPDATE => ActionCode::Update,
            ffi::SQLITE_DELETE => ActionCode::Delete,
            other => ActionCode::Other(other),
        }
    }
}

/// A row was inserted, updated or deleted in a rowid table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateEvent<'a> {
    pub action: ActionCode,
    pub database: &'a str,
    pub table: &'a str,
    pub rowid: i64,
}

/// A statement started running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent<'a> {
    pub sql: &'a str,
}

/// A statement finished, with its wall-clock run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileEvent<'a> {
    pub sql: &'a str,
    pub duration: Duration,
}

/// Verdict returned by an authorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Allow the action.
    Allow,
    /// Fail the whole statement with an authorization error.
    Deny,
    /// Allow the statement but treat the column as NULL / skip the action.
    Ignore,
}

impl Authorization {
    fn to_raw(self) -> c_int {
        match self {
            Authorization::Allow => ffi::SQLITE_OK,
            Authorization::Deny => ffi::SQLITE_DENY,
            Authorization::Ignore => ffi::SQLITE_IGNORE,
        }
    }
}

/// The action being authorized while a statement is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizerAction {
    CreateIndex,
    CreateTable,
    CreateTrigger,
    CreateView,
    Delete,
    DropIndex,
    DropTable,
    DropTrigger,
    DropView,
    Insert,
    Pragma,
    Read,
    Select,
    Transaction,
    Update,
    Attach,
    Detach,
    AlterTable,
    Function,
    Savepoint,
    Other(i32),
}

impl AuthorizerAction {
    fn from_raw(code: c_int) -> Self {
        match code {
            ffi::SQLITE_CREATE_INDEX | ffi::SQLITE_CREATE_TEMP_INDEX => Self::CreateIndex,
            ffi::SQLITE_CREATE_TABLE | ffi::SQLITE_CREATE_TEMP_TABLE => Self::CreateTable,
            ffi::SQLITE_CREATE_TRIGGER | ffi::SQLITE_CREATE_TEMP_TRIGGER => Self::CreateTrigger,
            ffi::SQLITE_CREATE_VIEW | ffi::SQLITE_CREATE_TEMP_VIEW => Self::CreateView,
            ffi::SQLITE_DELETE => Self::Delete,
            ffi::SQLITE_DROP_INDEX | ffi::SQLITE_DROP_TEMP_INDEX => Self::DropIndex,
            ffi::SQLITE_DROP_TABLE | ffi::SQLITE_DROP_TEMP_TABLE => Self::DropTable,
            ffi::SQLITE_DROP_TRIGGER | ffi::SQLITE_DROP_TEMP_TRIGGER => Self::DropTrigger,
            ffi::SQLITE_DROP_VIEW | ffi::SQLITE_DROP_TEMP_VIEW => Self::DropView,
            ffi::SQLITE_INSERT => Self::Insert,
            ffi::SQLITE_PRAGMA => Self::Pragma,
            ffi::SQLITE_READ => Self::Read,
            ffi::SQLITE_SELECT => Self::Select,
            ffi::SQLITE_TRANSACTION => Self::Transaction,
            ffi::SQLITE_UPDATE => Self::Update,
            ffi::SQLITE_ATTACH => Self::Attach,
            ffi::SQLITE_DETACH => Self::Detach,
            ffi::SQLITE_ALTER_TABLE => Self::AlterTable,
            ffi::SQLITE_FUNCTION => Self::Function,
            ffi::SQLITE_SAVEPOINT => Self::Savepoint,
            other => Self::Other(other),
        }
    }
}

/// One authorizer invocation. The meaning of `arg1`/`arg2` depends on the
/// action (table and column for `Read`, pragma name and value for `Pragma`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizerRequest<'a> {
    pub action: AuthorizerAction,
    pub arg1: Option<&'a str>,
    pub arg2: Option<&'a str>,
    pub database: Option<&'a str>,
    /// Innermost trigger or view responsible for the access.
    pub accessor: Option<&'a str>,
}

pub(crate) type CommitHook = Rc<dyn Fn() -> bool>;
pub(crate) type ProgressHandler = Rc<dyn Fn() -> bool>;
pub(crate) type Authorizer = Rc<dyn Fn(&AuthorizerRequest<'_>) -> Authorization>;

struct ObserverList<F: ?Sized> {
    entries: RefCell<Vec<(ObserverId, Rc<F>)>>,
}

impl<F: ?Sized> ObserverList<F> {
    fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    fn add(&self, id: ObserverId, observer: Rc<F>) {
        self.entries.borrow_mut().push((id, observer));
    }

    fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Copy of the current list, so observers may (un)subscribe while
    /// being notified.
    fn snapshot(&self) -> Vec<Rc<F>> {
        self.entries
            .try_borrow()
            .map(|e| e.iter().map(|(_, f)| Rc::clone(f)).collect())
            .unwrap_or_default()
    }

    fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

/// Per-connection hook state. Its address is handed to the engine as the
/// user-data pointer of every hook, so it lives in a `Box` that outlives the
/// registration.
pub(crate) struct HookHub {
    next_id: Cell<u64>,
    rollback: ObserverList<dyn Fn()>,
    update: ObserverList<dyn Fn(&UpdateEvent<'_>)>,
    trace: ObserverList<dyn Fn(&TraceEvent<'_>)>,
    profile: ObserverList<dyn Fn(&ProfileEvent<'_>)>,
    closing: ObserverList<dyn Fn()>,
    commit: RefCell<Option<CommitHook>>,
    progress: RefCell<Option<ProgressHandler>>,
    authorizer: RefCell<Option<Authorizer>>,
}

impl HookHub {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            rollback: ObserverList::new(),
            update: ObserverList::new(),
            trace: ObserverList::new(),
            profile: ObserverList::new(),
            closing: ObserverList::new(),
            commit: RefCell::new(None),
            progress: RefCell::new(None),
            authorizer: RefCell::new(None),
        }
    }

    fn next_id(&self) -> ObserverId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        ObserverId(id)
    }

    fn as_user_data(&self) -> *mut c_void {
        ptr::from_ref(self).cast_mut().cast()
    }

    /// Install the always-on fan-out hooks.
    ///
    /// # Safety
    /// `db` must be a live handle and `self` must stay at its address until
    /// `uninstall` runs on the same handle.
    pub(crate) unsafe fn install(&self, db: *mut ffi::sqlite3) {
        let data = self.as_user_data();
        // SAFETY: per the caller's contract
        unsafe {
            ffi::sqlite3_rollback_hook(db, Some(rollback_trampoline), data);
            ffi::sqlite3_update_hook(db, Some(update_trampoline), data);
            ffi::sqlite3_trace_v2(
                db,
                (ffi::SQLITE_TRACE_STMT | ffi::SQLITE_TRACE_PROFILE) as c_uint,
                Some(trace_trampoline),
                data,
            );
        }
    }

    /// Remove every hook that points at `self`.
    ///
    /// # Safety
    /// `db` must be a live handle.
    pub(crate) unsafe fn uninstall(&self, db: *mut ffi::sqlite3) {
        // SAFETY: per the caller's contract
        unsafe {
            ffi::sqlite3_rollback_hook(db, None, ptr::null_mut());
            ffi::sqlite3_update_hook(db, None, ptr::null_mut());
            ffi::sqlite3_trace_v2(db, 0, None, ptr::null_mut());
            ffi::sqlite3_commit_hook(db, None, ptr::null_mut());
            ffi::sqlite3_progress_handler(db, 0, None, ptr::null_mut());
            ffi::sqlite3_set_authorizer(db, None, ptr::null_mut());
        }
    }

    pub(crate) fn fire_closing(&self) {
        for observer in self.closing.snapshot() {
            guarded("closing", || observer());
        }
    }

    /// Drop every observer and callback.
    pub(crate) fn clear(&self) {
        self.rollback.clear();
        self.update.clear();
        self.trace.clear();
        self.profile.clear();
        self.closing.clear();
        self.commit.borrow_mut().take();
        self.progress.borrow_mut().take();
        self.authorizer.borrow_mut().take();
    }

    fn remove(&self, id: ObserverId) -> bool {
        self.rollback.remove(id)
            || self.update.remove(id)
            || self.trace.remove(id)
            || self.profile.remove(id)
            || self.closing.remove(id)
    }

    /// # Safety
    /// `db` must be the live handle this hub is installed on.
    pub(crate) unsafe fn set_commit_hook(&self, db: *mut ffi::sqlite3, hook: Option<CommitHook>) {
        let installed = hook.is_some();
        // The old callback is dropped only after the engine stops pointing at it.
        let previous = self.commit.replace(hook);
        // SAFETY: per the caller's contract
        unsafe {
            if installed {
                ffi::sqlite3_commit_hook(db, Some(commit_trampoline), self.as_user_data());
            } else {
                ffi::sqlite3_commit_hook(db, None, ptr::null_mut());
            }
        }
        drop(previous);
    }

    /// # Safety
    /// `db` must be the live handle this hub is installed on.
    pub(crate) unsafe fn set_progress_handler(
        &self,
        db: *mut ffi::sqlite3,
        n_ops: c_int,
        handler: Option<ProgressHandler>,
    ) {
        let installed = handler.is_some();
        let previous = self.progress.replace(handler);
        // SAFETY: per the caller's contract
        unsafe {
            if installed {
                ffi::sqlite3_progress_handler(
                    db,
                    n_ops,
                    Some(progress_trampoline),
                    self.as_user_data(),
                );
            } else {
                ffi::sqlite3_progress_handler(db, 0, None, ptr::null_mut());
            }
        }
        drop(previous);
    }

    /// # Safety
    /// `db` must be the live handle this hub is installed on.
    pub(crate) unsafe fn set_authorizer(
        &self,
        db: *mut ffi::sqlite3,
        authorizer: Option<Authorizer>,
    ) -> c_int {
        let installed = authorizer.is_some();
        let previous = self.authorizer.replace(authorizer);
        // SAFETY: per the caller's contract
        let rc = unsafe {
            if installed {
                ffi::sqlite3_set_authorizer(db, Some(authorizer_trampoline), self.as_user_data())
            } else {
                ffi::sqlite3_set_authorizer(db, None, ptr::null_mut())
            }
        };
        drop(previous);
        rc
    }
}

fn guarded(hook: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            hook,
            panic = %panic_message(payload.as_ref()),
            "observer panicked; skipping it"
        );
    }
}

/// # Safety
/// `data` must be the `HookHub` registered with `install`.
unsafe fn hub<'a>(data: *mut c_void) -> &'a HookHub {
    // SAFETY: per the caller's contract
    unsafe { &*data.cast::<HookHub>() }
}

/// # Safety
/// `ptr` must be null or a NUL-terminated string valid for `'a`.
unsafe fn opt_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: per the caller's contract
        unsafe { std::ffi::CStr::from_ptr(ptr) }.to_str().ok()
    }
}

unsafe extern "C" fn rollback_trampoline(data: *mut c_void) {
    // SAFETY: the engine hands back the pointer given at install time
    let hub = unsafe { hub(data) };
    for observer in hub.rollback.snapshot() {
        tracing::trace!("rollback hook");
        guarded("rollback", || observer());
    }
}

unsafe extern "C" fn update_trampoline(
    data: *mut c_void,
    action: c_int,
    database: *const c_char,
    table: *const c_char,
    rowid: ffi::sqlite3_int64,
) {
    // SAFETY: the engine hands back the pointer given at install time
    let hub = unsafe { hub(data) };
    let observers = hub.update.snapshot();
    if observers.is_empty() {
        return;
    }
    // SAFETY: the names are valid for the duration of the callback
    let event = unsafe {
        UpdateEvent {
            action: ActionCode::from_raw(action),
            database: opt_str(database).unwrap_or_default(),
            table: opt_str(table).unwrap_or_default(),
            rowid,
        }
    };
    tracing::trace!(table = event.table, rowid, "update hook");
    for observer in observers {
        guarded("update", || observer(&event));
    }
}

unsafe extern "C" fn trace_trampoline(
    event: c_uint,
    data: *mut c_void,
    p: *mut c_void,
    x: *mut c_void,
) -> c_int {
    // SAFETY: the engine hands back the pointer given at install time
    let hub = unsafe { hub(data) };

    if event == ffi::SQLITE_TRACE_STMT as c_uint {
        let observers = hub.trace.snapshot();
        if observers.is_empty() {
            return 0;
        }
        // SAFETY: for STMT events X is the statement's SQL text
        let sql = unsafe { opt_str(x.cast_const().cast()) }.unwrap_or_default();
        let event = TraceEvent { sql };
        for observer in observers {
            guarded("trace", || observer(&event));
        }
    } else if event == ffi::SQLITE_TRACE_PROFILE as c_uint {
        let observers = hub.profile.snapshot();
        if observers.is_empty() {
            return 0;
        }
        // SAFETY: for PROFILE events P is the statement and X points at an
        // i64 nanosecond count
        let (sql, nanos) = unsafe {
            let nanos = if x.is_null() { 0 } else { *x.cast::<i64>() };
            (opt_str(ffi::sqlite3_sql(p.cast())).unwrap_or_default(), nanos)
        };
        let event = ProfileEvent {
            sql,
            duration: Duration::from_nanos(u64::try_from(nanos).unwrap_or(0)),
        };
        for observer in observers {
            guarded("profile", || observer(&event));
        }
    }
    0
}

unsafe extern "C" fn commit_trampoline(data: *mut c_void) -> c_int {
    // SAFETY: the engine hands back the pointer given at registration
    let hub = unsafe { hub(data) };
    let Some(hook) = hub.commit.try_borrow().ok().and_then(|h| h.clone()) else {
        return 0;
    };
    match catch_unwind(AssertUnwindSafe(|| hook())) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(payload) => {
            tracing::error!(
                panic = %panic_message(payload.as_ref()),
                "commit hook panicked; rolling back"
            );
            1
        }
    }
}

unsafe extern "C" fn progress_trampoline(data: *mut c_void) -> c_int {
    // SAFETY: the engine hands back the pointer given at registration
    let hub = unsafe { hub(data) };
    let Some(handler) = hub.progress.try_borrow().ok().and_then(|h| h.clone()) else {
        return 0;
    };
    match catch_unwind(AssertUnwindSafe(|| handler())) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(payload) => {
            tracing::error!(
                panic = %panic_message(payload.as_ref()),
                "progress handler panicked; interrupting"
            );
            1
        }
    }
}

unsafe extern "C" fn authorizer_trampoline(
    data: *mut c_void,
    action: c_int,
    arg1: *const c_char,
    arg2: *const c_char,
    database: *const c_char,
    accessor: *const c_char,
) -> c_int {
    // SAFETY: the engine hands back the pointer given at registration
    let hub = unsafe { hub(data) };
    let Some(authorizer) = hub.authorizer.try_borrow().ok().and_then(|a| a.clone()) else {
        return ffi::SQLITE_OK;
    };
    // SAFETY: the strings are valid for the duration of the callback
    let request = unsafe {
        AuthorizerRequest {
            action: AuthorizerAction::from_raw(action),
            arg1: opt_str(arg1),
            arg2: opt_str(arg2),
            database: opt_str(database),
            accessor: opt_str(accessor),
        }
    };
    match catch_unwind(AssertUnwindSafe(|| authorizer(&request))) {
        Ok(verdict) => verdict.to_raw(),
        Err(payload) => {
            tracing::error!(
                panic = %panic_message(payload.as_ref()),
                "authorizer panicked; denying"
            );
            ffi::SQLITE_DENY
        }
    }
}

impl Connection {
    fn observe(&self, add: impl FnOnce(&HookHub, ObserverId)) -> Result<ObserverId> {
        self.inner.db()?;
        let hooks = self.inner.hooks();
        let id = hooks.next_id();
        add(hooks, id);
        Ok(id)
    }

    /// Subscribe to transaction rollbacks.
    pub fn on_rollback<F: Fn() + 'static>(&self, observer: F) -> Result<ObserverId> {
        self.observe(|hub, id| hub.rollback.add(id, Rc::new(observer)))
    }

    /// Subscribe to row inserts, updates and deletes.
    pub fn on_update<F>(&self, observer: F) -> Result<ObserverId>
    where
        F: Fn(&UpdateEvent<'_>) + 'static,
    {
        self.observe(|hub, id| hub.update.add(id, Rc::new(observer)))
    }

    /// Subscribe to statement starts.
    pub fn on_trace<F>(&self, observer: F) -> Result<ObserverId>
    where
        F: Fn(&TraceEvent<'_>) + 'static,
    {
        self.observe(|hub, id| hub.trace.add(id, Rc::new(observer)))
    }

    /// Subscribe to statement completions with timing.
    pub fn on_profile<F>(&self, observer: F) -> Result<ObserverId>
    where
        F: Fn(&ProfileEvent<'_>) + 'static,
    {
        self.observe(|hub, id| hub.profile.add(id, Rc::new(observer)))
    }

    /// Subscribe to the connection closing. Fires before any dependent
    /// object is finalized.
    pub fn on_closing<F: Fn() + 'static>(&self, observer: F) -> Result<ObserverId> {
        self.observe(|hub, id| hub.closing.add(id, Rc::new(observer)))
    }

    /// Unsubscribe an observer. Returns false if it was not subscribed.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.hooks().remove(id)
    }

    /// Install the commit hook. Returning `true` turns the commit into a
    /// rollback.
    pub fn set_commit_hook<F: Fn() -> bool + 'static>(&self, hook: F) -> Result<()> {
        self.install_commit_hook(Some(Rc::new(hook)))
    }

    pub fn remove_commit_hook(&self) -> Result<()> {
        self.install_commit_hook(None)
    }

    pub(crate) fn install_commit_hook(&self, hook: Option<CommitHook>) -> Result<()> {
        let db = self.inner.db()?;
        // SAFETY: db is live and the hub is owned by this connection
        unsafe { self.inner.hooks().set_commit_hook(db, hook) };
        Ok(())
    }

    /// Install a progress handler invoked roughly every `n_ops` virtual
    /// machine instructions. Returning `true` interrupts the running
    /// statement.
    pub fn set_progress_handler<F>(&self, n_ops: i32, handler: F) -> Result<()>
    where
        F: Fn() -> bool + 'static,
    {
        self.install_progress_handler(n_ops, Some(Rc::new(handler)))
    }

    pub fn remove_progress_handler(&self) -> Result<()> {
        self.install_progress_handler(0, None)
    }

    pub(crate) fn install_progress_handler(
        &self,
        n_ops: i32,
        handler: Option<ProgressHandler>,
    ) -> Result<()> {
        let db = self.inner.db()?;
        // SAFETY: db is live and the hub is owned by this connection
        unsafe { self.inner.hooks().set_progress_handler(db, n_ops, handler) };
        Ok(())
    }

    /// Install an authorizer consulted while statements are compiled.
    pub fn set_authorizer<F>(&self, authorizer: F) -> Result<()>
    where
        F: Fn(&AuthorizerRequest<'_>) -> Authorization + 'static,
    {
        self.install_authorizer(Some(Rc::new(authorizer)))
    }

    pub fn remove_authorizer(&self) -> Result<()> {
        self.install_authorizer(None)
    }

    pub(crate) fn install_authorizer(&self, authorizer: Option<Authorizer>) -> Result<()> {
        let db = self.inner.db()?;
        // SAFETY: db is live and the hub is owned by this connection
        let rc = unsafe { self.inner.hooks().set_authorizer(db, authorizer) };
        crate::error::check(db, rc)
    }

    /// Let the engine retry for up to `ms` milliseconds when a table is
    /// locked. Zero disables the busy handler.
    pub fn set_busy_timeout(&self, ms: u32) -> Result<()> {
        let db = self.inner.db()?;
        let ms = c_int::try_from(ms).unwrap_or(c_int::MAX);
        // SAFETY: db is live
        let rc = unsafe { ffi::sqlite3_busy_timeout(db, ms) };
        crate::error::check(db, rc)
    }
}
