//! User-defined scalar functions, aggregates and collations.
//!
//! Functions are registered under a `(name, arity)` key; names compare
//! case-insensitively, as the engine does. Every native callback runs the
//! user code under `catch_unwind` and turns `Err` results and panics into
//! `sqlite3_result_error`, so neither can unwind across the C boundary.
//!
//! ```rust,ignore
//! use sqlkit_sqlite::{Connection, function::scalar1};
//! use sqlkit_core::Value;
//!
//! let conn = Connection::open_memory()?;
//! conn.register_scalar_function(scalar1("cube", |x| {
//!     let x = x.to_i64();
//!     Ok(Value::Integer(x * x * x))
//! }))?;
//! assert_eq!(conn.query_scalar("SELECT cube(5)", &[])?, Value::Integer(125));
//! ```

#![allow(clippy::cast_possible_truncation)]

use crate::connection::Connection;
use crate::ffi;
use crate::types;
use sqlkit_core::{ContractError, Error, Result, Value};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{c_int, c_void};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

/// Largest arity the engine accepts for a fixed-arity function.
pub const MAX_ARITY: i32 = 127;
/// Longest function or collation name the engine accepts, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// A scalar SQL function.
pub struct ScalarFunction {
    name: String,
    arity: i32,
    deterministic: bool,
    func: Box<dyn Fn(&[Value]) -> Result<Value>>,
}

impl ScalarFunction {
    /// A function taking exactly `arity` arguments, or any number if
    /// `arity` is -1.
    pub fn new<F>(name: impl Into<String>, arity: i32, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            arity,
            deterministic: false,
            func: Box::new(func),
        }
    }

    /// A function accepting any number of arguments.
    pub fn variadic<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self::new(name, -1, func)
    }

    /// Mark the function as always returning the same result for the same
    /// inputs, which lets the planner use it in indexes.
    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> i32 {
        self.arity
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    /// Invoke the function directly, checking the argument count.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        check_arity(&self.name, self.arity, args.len())?;
        (self.func)(args)
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("deterministic", &self.deterministic)
            .finish_non_exhaustive()
    }
}

/// Type-erased aggregate implementation.
///
/// Accumulators travel as `Box<dyn Any>` through the engine's per-group
/// context and are downcast back to the concrete type on every call.
pub trait ErasedAggregate {
    /// A fresh accumulator for a new group.
    fn seed(&self) -> Box<dyn Any>;
    /// Fold one row into the accumulator, returning the replacement.
    fn step(&self, acc: Box<dyn Any>, args: &[Value]) -> Result<Box<dyn Any>>;
    /// Produce the group's result.
    fn finalize(&self, acc: Box<dyn Any>) -> Result<Value>;
}

struct TypedAggregate<A, S, F> {
    name: String,
    seed: A,
    step: S,
    finalize: F,
}

impl<A, S, F> TypedAggregate<A, S, F> {
    fn foreign_accumulator(&self) -> Error {
        Error::invalid_state(format!(
            "aggregate '{}' received an accumulator of the wrong type",
            self.name
        ))
    }
}

impl<A, S, F> ErasedAggregate for TypedAggregate<A, S, F>
where
    A: Clone + 'static,
    S: Fn(A, &[Value]) -> Result<A>,
    F: Fn(A) -> Result<Value>,
{
    fn seed(&self) -> Box<dyn Any> {
        Box::new(self.seed.clone())
    }

    fn step(&self, acc: Box<dyn Any>, args: &[Value]) -> Result<Box<dyn Any>> {
        let acc = acc
            .downcast::<A>()
            .map_err(|_| self.foreign_accumulator())?;
        let next = (self.step)(*acc, args)?;
        Ok(Box::new(next))
    }

    fn finalize(&self, acc: Box<dyn Any>) -> Result<Value> {
        let acc = acc
            .downcast::<A>()
            .map_err(|_| self.foreign_accumulator())?;
        (self.finalize)(*acc)
    }
}

/// An aggregate SQL function.
pub struct AggregateFunction {
    name: String,
    arity: i32,
    deterministic: bool,
    imp: Box<dyn ErasedAggregate>,
}

impl AggregateFunction {
    /// Build an aggregate from a seed accumulator and step/finalize closures.
    ///
    /// Each group starts from a clone of `seed`. `step` consumes the current
    /// accumulator and returns its replacement.
    pub fn new<A, S, F>(name: impl Into<String>, arity: i32, seed: A, step: S, finalize: F) -> Self
    where
        A: Clone + 'static,
        S: Fn(A, &[Value]) -> Result<A> + 'static,
        F: Fn(A) -> Result<Value> + 'static,
    {
        let name = name.into();
        Self {
            imp: Box::new(TypedAggregate {
                name: name.clone(),
                seed,
                step,
                finalize,
            }),
            name,
            arity,
            deterministic: false,
        }
    }

    /// Wrap a hand-written `ErasedAggregate`.
    pub fn from_erased(
        name: impl Into<String>,
        arity: i32,
        imp: Box<dyn ErasedAggregate>,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            deterministic: false,
            imp,
        }
    }

    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> i32 {
        self.arity
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    /// Run the aggregate over in-memory rows, without an engine.
    pub fn evaluate<'a, I>(&self, rows: I) -> Result<Value>
    where
        I: IntoIterator<Item = &'a [Value]>,
    {
        let mut acc = self.imp.seed();
        for args in rows {
            check_arity(&self.name, self.arity, args.len())?;
            acc = self.imp.step(acc, args)?;
        }
        self.imp.finalize(acc)
    }
}

impl fmt::Debug for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("deterministic", &self.deterministic)
            .finish_non_exhaustive()
    }
}

/// A named text comparison usable in `COLLATE` clauses.
pub struct Collation {
    name: String,
    compare: Box<dyn Fn(&str, &str) -> Ordering>,
}

impl Collation {
    pub fn new<F>(name: impl Into<String>, compare: F) -> Self
    where
        F: Fn(&str, &str) -> Ordering + 'static,
    {
        Self {
            name: name.into(),
            compare: Box::new(compare),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        (self.compare)(a, b)
    }
}

impl fmt::Debug for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

macro_rules! value_ref {
    ($arg:ident) => {
        &Value
    };
}

macro_rules! fixed_arity {
    ($(#[$doc:meta])* $scalar:ident, $aggregate:ident, $arity:expr; $($arg:ident),*) => {
        $(#[$doc])*
        pub fn $scalar<F>(name: impl Into<String>, f: F) -> ScalarFunction
        where
            F: Fn($(value_ref!($arg)),*) -> Result<Value> + 'static,
        {
            let name = name.into();
            let label = name.clone();
            ScalarFunction::new(name, $arity, move |args: &[Value]| match args {
                [$($arg),*] => f($($arg),*),
                _ => Err(arity_mismatch(&label, $arity, args.len())),
            })
        }

        $(#[$doc])*
        pub fn $aggregate<A, S, F>(name: impl Into<String>, seed: A, step: S, finalize: F) -> AggregateFunction
        where
            A: Clone + 'static,
            S: Fn(A, $(value_ref!($arg)),*) -> Result<A> + 'static,
            F: Fn(A) -> Result<Value> + 'static,
        {
            let name = name.into();
            let label = name.clone();
            AggregateFunction::new(
                name,
                $arity,
                seed,
                move |acc: A, args: &[Value]| match args {
                    [$($arg),*] => step(acc, $($arg),*),
                    _ => Err(arity_mismatch(&label, $arity, args.len())),
                },
                finalize,
            )
        }
    };
}

fixed_arity!(
    /// Fixed-arity helper taking no arguments.
    scalar0, aggregate0, 0;
);
fixed_arity!(scalar1, aggregate1, 1; a);
fixed_arity!(scalar2, aggregate2, 2; a, b);
fixed_arity!(scalar3, aggregate3, 3; a, b, c);
fixed_arity!(scalar4, aggregate4, 4; a, b, c, d);
fixed_arity!(scalar5, aggregate5, 5; a, b, c, d, e);
fixed_arity!(scalar6, aggregate6, 6; a, b, c, d, e, g);
fixed_arity!(scalar7, aggregate7, 7; a, b, c, d, e, g, h);
fixed_arity!(scalar8, aggregate8, 8; a, b, c, d, e, g, h, i);

fn arity_mismatch(name: &str, expected: i32, actual: usize) -> Error {
    Error::Contract(ContractError::ArityMismatch {
        name: name.to_string(),
        expected: usize::try_from(expected).unwrap_or(0),
        actual,
    })
}

fn check_arity(name: &str, arity: i32, actual: usize) -> Result<()> {
    match usize::try_from(arity) {
        Ok(expected) if expected != actual => Err(arity_mismatch(name, arity, actual)),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Scalar,
    Aggregate,
}

impl FunctionKind {
    fn as_str(self) -> &'static str {
        match self {
            FunctionKind::Scalar => "scalar",
            FunctionKind::Aggregate => "aggregate",
        }
    }
}

/// Per-connection bookkeeping of what has been registered.
///
/// The engine silently replaces a function registered twice under the same
/// key; this registry turns that into a `DuplicateRegistration` error
/// instead, for scalars and aggregates alike. A name also belongs to one
/// kind: once `f` is a scalar at any arity it cannot become an aggregate.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<(String, i32), FunctionKind>,
    collations: BTreeSet<String>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_scalar(&self, name: &str, arity: i32) -> Result<()> {
        self.check_function(name, arity, FunctionKind::Scalar)
    }

    pub fn check_aggregate(&self, name: &str, arity: i32) -> Result<()> {
        self.check_function(name, arity, FunctionKind::Aggregate)
    }

    pub fn check_collation(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.collations.contains(&name.to_lowercase()) {
            return Err(Error::Contract(ContractError::DuplicateRegistration {
                name: name.to_string(),
                arity: None,
            }));
        }
        Ok(())
    }

    /// Check and record a scalar function.
    pub fn add_scalar(&mut self, name: &str, arity: i32) -> Result<()> {
        self.check_scalar(name, arity)?;
        self.functions
            .insert((name.to_lowercase(), arity), FunctionKind::Scalar);
        Ok(())
    }

    /// Check and record an aggregate function.
    pub fn add_aggregate(&mut self, name: &str, arity: i32) -> Result<()> {
        self.check_aggregate(name, arity)?;
        self.functions
            .insert((name.to_lowercase(), arity), FunctionKind::Aggregate);
        Ok(())
    }

    /// Check and record a collation.
    pub fn add_collation(&mut self, name: &str) -> Result<()> {
        self.check_collation(name)?;
        self.collations.insert(name.to_lowercase());
        Ok(())
    }

    pub fn contains_function(&self, name: &str, arity: i32) -> bool {
        self.functions.contains_key(&(name.to_lowercase(), arity))
    }

    pub fn contains_collation(&self, name: &str) -> bool {
        self.collations.contains(&name.to_lowercase())
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    fn check_function(&self, name: &str, arity: i32, kind: FunctionKind) -> Result<()> {
        validate_name(name)?;
        if !(-1..=MAX_ARITY).contains(&arity) {
            return Err(Error::Contract(ContractError::InvalidArgument(format!(
                "arity {} for function '{}' is outside -1..={}",
                arity, name, MAX_ARITY
            ))));
        }
        let key = name.to_lowercase();
        if self.functions.contains_key(&(key.clone(), arity)) {
            return Err(Error::Contract(ContractError::DuplicateRegistration {
                name: name.to_string(),
                arity: Some(arity),
            }));
        }
        let other = self
            .functions
            .range((key.clone(), i32::MIN)..=(key, i32::MAX))
            .map(|(_, registered)| *registered)
            .find(|registered| *registered != kind);
        if let Some(registered) = other {
            return Err(Error::Contract(ContractError::InvalidArgument(format!(
                "function '{}' is already registered as {} and cannot also be {}",
                name,
                registered.as_str(),
                kind.as_str()
            ))));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::Contract(ContractError::InvalidArgument(format!(
            "name must be 1..={} bytes, got {}",
            MAX_NAME_LEN,
            name.len()
        ))));
    }
    Ok(())
}

/// Render a panic payload for logs and error messages.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn text_rep(deterministic: bool) -> c_int {
    if deterministic {
        ffi::SQLITE_UTF8 | ffi::SQLITE_DETERMINISTIC
    } else {
        ffi::SQLITE_UTF8
    }
}

unsafe extern "C" fn destroy_boxed<T>(data: *mut c_void) {
    // SAFETY: `data` came from Box::into_raw::<T> at registration time and
    // the engine calls the destructor exactly once
    drop(unsafe { Box::from_raw(data.cast::<T>()) });
}

/// # Safety
/// `argv` must hold `argc` valid values.
unsafe fn collect_args(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> Vec<Value> {
    let count = usize::try_from(argc).unwrap_or(0);
    if argv.is_null() || count == 0 {
        return Vec::new();
    }
    // SAFETY: per the caller's contract
    let raw = unsafe { std::slice::from_raw_parts(argv, count) };
    raw.iter()
        // SAFETY: each entry is a protected value for this call
        .map(|&value| unsafe { types::read_value(value) })
        .collect()
}

/// Hand the outcome of a user callback back to the engine.
///
/// # Safety
/// `ctx` must be the context of the current invocation.
unsafe fn report(
    ctx: *mut ffi::sqlite3_context,
    name: &str,
    outcome: std::thread::Result<Result<Value>>,
) {
    // SAFETY: per the caller's contract
    unsafe {
        match outcome {
            Ok(Ok(value)) => types::set_result(ctx, &value),
            Ok(Err(error)) => {
                tracing::debug!(function = name, error = %error, "user function returned an error");
                let message = match error.engine() {
                    Some(engine) => engine.message.clone(),
                    None => error.to_string(),
                };
                types::set_error(ctx, &message, error.extended_code());
            }
            Err(payload) => {
                let message = format!(
                    "function '{}' panicked: {}",
                    name,
                    panic_message(payload.as_ref())
                );
                tracing::error!(function = name, "{}", message);
                types::set_error(ctx, &message, None);
            }
        }
    }
}

unsafe extern "C" fn scalar_trampoline(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    // SAFETY: user data is the ScalarFunction boxed at registration, alive
    // until the engine runs its destructor
    let function = unsafe { &*ffi::sqlite3_user_data(ctx).cast::<ScalarFunction>() };
    // SAFETY: argc/argv come straight from the engine
    let args = unsafe { collect_args(argc, argv) };
    let outcome = catch_unwind(AssertUnwindSafe(|| function.call(&args)));
    // SAFETY: ctx is the current invocation
    unsafe { report(ctx, &function.name, outcome) };
}

/// The per-group slot: one thin pointer to a boxed accumulator, null until
/// the first step.
type AccumulatorSlot = *mut Box<dyn Any>;

unsafe extern "C" fn aggregate_step_trampoline(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    // SAFETY: see scalar_trampoline
    let function = unsafe { &*ffi::sqlite3_user_data(ctx).cast::<AggregateFunction>() };
    // SAFETY: the engine zero-fills the context on first request and hands
    // back the same allocation for the rest of the group
    let slot = unsafe {
        ffi::sqlite3_aggregate_context(ctx, std::mem::size_of::<AccumulatorSlot>() as c_int)
    }
    .cast::<AccumulatorSlot>();
    if slot.is_null() {
        // SAFETY: ctx is the current invocation
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    }

    // SAFETY: argc/argv come straight from the engine
    let args = unsafe { collect_args(argc, argv) };

    // Take the accumulator out of the slot; the slot stays null until the
    // replacement is stored, so a failed step never leaves a dangling box.
    // SAFETY: slot points at our pointer-sized region
    let current = unsafe { slot.read_unaligned() };
    unsafe { slot.write_unaligned(ptr::null_mut()) };
    let acc = if current.is_null() {
        None
    } else {
        // SAFETY: produced by Box::into_raw below on an earlier step
        Some(*unsafe { Box::from_raw(current) })
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        check_arity(&function.name, function.arity, args.len())?;
        let acc = acc.unwrap_or_else(|| function.imp.seed());
        function.imp.step(acc, &args)
    }));

    match outcome {
        Ok(Ok(next)) => {
            // SAFETY: slot points at our pointer-sized region
            unsafe { slot.write_unaligned(Box::into_raw(Box::new(next))) };
        }
        other => {
            let outcome = other.map(|result| result.map(|_| Value::Null));
            // SAFETY: ctx is the current invocation
            unsafe { report(ctx, &function.name, outcome) };
        }
    }
}

unsafe extern "C" fn aggregate_final_trampoline(ctx: *mut ffi::sqlite3_context) {
    // SAFETY: see scalar_trampoline
    let function = unsafe { &*ffi::sqlite3_user_data(ctx).cast::<AggregateFunction>() };
    // Size 0: never allocates, returns null if no row reached this group.
    // SAFETY: ctx is the current invocation
    let slot = unsafe { ffi::sqlite3_aggregate_context(ctx, 0) }.cast::<AccumulatorSlot>();
    let acc = if slot.is_null() {
        None
    } else {
        // SAFETY: slot points at our pointer-sized region
        let current = unsafe { slot.read_unaligned() };
        unsafe { slot.write_unaligned(ptr::null_mut()) };
        if current.is_null() {
            None
        } else {
            // SAFETY: produced by Box::into_raw in the step trampoline
            Some(*unsafe { Box::from_raw(current) })
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let acc = acc.unwrap_or_else(|| function.imp.seed());
        function.imp.finalize(acc)
    }));
    // SAFETY: ctx is the current invocation
    unsafe { report(ctx, &function.name, outcome) };
}

unsafe extern "C" fn collation_trampoline(
    data: *mut c_void,
    len_a: c_int,
    a: *const c_void,
    len_b: c_int,
    b: *const c_void,
) -> c_int {
    // SAFETY: data is the Collation boxed at registration
    let collation = unsafe { &*data.cast::<Collation>() };
    // SAFETY: the engine passes UTF-8 buffers of the given lengths
    let (a, b) = unsafe { (utf8_lossy(a, len_a), utf8_lossy(b, len_b)) };
    match catch_unwind(AssertUnwindSafe(|| collation.compare(&a, &b))) {
        Ok(Ordering::Less) => -1,
        Ok(Ordering::Equal) => 0,
        Ok(Ordering::Greater) => 1,
        Err(payload) => {
            tracing::error!(
                collation = %collation.name,
                panic = %panic_message(payload.as_ref()),
                "collation panicked; treating operands as equal"
            );
            0
        }
    }
}

/// # Safety
/// `ptr` must be null or valid for `len` bytes.
unsafe fn utf8_lossy(ptr: *const c_void, len: c_int) -> String {
    let len = usize::try_from(len).unwrap_or(0);
    if ptr.is_null() || len == 0 {
        return String::new();
    }
    // SAFETY: per the caller's contract
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Register a scalar function on a raw handle.
pub(crate) fn register_scalar(db: *mut ffi::sqlite3, function: ScalarFunction) -> Result<()> {
    let name = ffi::to_cstring(&function.name)?;
    let arity = function.arity;
    let flags = text_rep(function.deterministic);
    let data = Box::into_raw(Box::new(function));
    // SAFETY: db is live; on failure the engine invokes the destructor
    // itself, so `data` is never freed twice
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            name.as_ptr(),
            arity,
            flags,
            data.cast(),
            Some(scalar_trampoline),
            None,
            None,
            Some(destroy_boxed::<ScalarFunction>),
        )
    };
    crate::error::check(db, rc)
}

/// Register an aggregate function on a raw handle.
pub(crate) fn register_aggregate(db: *mut ffi::sqlite3, function: AggregateFunction) -> Result<()> {
    let name = ffi::to_cstring(&function.name)?;
    let arity = function.arity;
    let flags = text_rep(function.deterministic);
    let data = Box::into_raw(Box::new(function));
    // SAFETY: as in register_scalar
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            name.as_ptr(),
            arity,
            flags,
            data.cast(),
            None,
            Some(aggregate_step_trampoline),
            Some(aggregate_final_trampoline),
            Some(destroy_boxed::<AggregateFunction>),
        )
    };
    crate::error::check(db, rc)
}

/// Register a collation on a raw handle.
pub(crate) fn register_collation(db: *mut ffi::sqlite3, collation: Collation) -> Result<()> {
    let name = ffi::to_cstring(&collation.name)?;
    let data = Box::into_raw(Box::new(collation));
    // SAFETY: db is live
    let rc = unsafe {
        ffi::sqlite3_create_collation_v2(
            db,
            name.as_ptr(),
            ffi::SQLITE_UTF8,
            data.cast(),
            Some(collation_trampoline),
            Some(destroy_boxed::<Collation>),
        )
    };
    if rc != ffi::SQLITE_OK {
        // Unlike create_function_v2, a failed create_collation_v2 does not
        // run the destructor.
        // SAFETY: the engine did not take ownership
        drop(unsafe { Box::from_raw(data) });
    }
    crate::error::check(db, rc)
}

impl Connection {
    /// Register a scalar function. Fails with `DuplicateRegistration` if a
    /// function with the same name and arity already exists.
    pub fn register_scalar_function(&self, function: ScalarFunction) -> Result<()> {
        let db = self.inner.db()?;
        let (name, arity) = (function.name.clone(), function.arity);
        self.inner.registry().borrow().check_scalar(&name, arity)?;
        register_scalar(db, function)?;
        self.inner.registry().borrow_mut().add_scalar(&name, arity)?;
        tracing::debug!(function = %name, arity, "registered scalar function");
        Ok(())
    }

    /// Register an aggregate function.
    pub fn register_aggregate_function(&self, function: AggregateFunction) -> Result<()> {
        let db = self.inner.db()?;
        let (name, arity) = (function.name.clone(), function.arity);
        self.inner.registry().borrow().check_aggregate(&name, arity)?;
        register_aggregate(db, function)?;
        self.inner
            .registry()
            .borrow_mut()
            .add_aggregate(&name, arity)?;
        tracing::debug!(function = %name, arity, "registered aggregate function");
        Ok(())
    }

    /// Register a collation.
    pub fn register_collation(&self, collation: Collation) -> Result<()> {
        let db = self.inner.db()?;
        let name = collation.name.clone();
        self.inner.registry().borrow().check_collation(&name)?;
        register_collation(db, collation)?;
        self.inner.registry().borrow_mut().add_collation(&name)?;
        tracing::debug!(collation = %name, "registered collation");
        Ok(())
    }
}
