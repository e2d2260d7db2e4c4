//! Error types for sqlkit operations.
//!
//! SQLite reports failures as a primary result code, an extended result code
//! and a message. `EngineError` carries all three verbatim; the surrounding
//! `Error` enum separates engine failures from cancellation, caller misuse and
//! use-after-close.

use std::fmt;

/// The primary error type for all sqlkit operations.
#[derive(Debug)]
pub enum Error {
    /// The engine returned a failure result code.
    Engine(EngineError),
    /// The engine reported `SQLITE_INTERRUPT`: the operation was cancelled.
    Cancelled(EngineError),
    /// Opening a database failed.
    Open(OpenError),
    /// The caller violated an API contract (bad index, duplicate registration, ...).
    Contract(ContractError),
    /// The object (or its connection) has already been closed.
    Disposed(DisposedError),
    /// Strict typed extraction from a row failed.
    Type(TypeError),
    /// I/O errors from the blob stream adapters.
    Io(std::io::Error),
    /// A user callback failed with a message.
    Custom(String),
}

/// Primary SQLite result codes.
///
/// Only the low byte of an extended code is used to pick a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    Error = 1,
    Internal = 2,
    Permission = 3,
    Abort = 4,
    Busy = 5,
    Locked = 6,
    NoMemory = 7,
    ReadOnly = 8,
    Interrupt = 9,
    IoError = 10,
    Corrupt = 11,
    NotFound = 12,
    Full = 13,
    CantOpen = 14,
    Protocol = 15,
    Empty = 16,
    Schema = 17,
    TooBig = 18,
    Constraint = 19,
    Mismatch = 20,
    Misuse = 21,
    NoLargeFileSupport = 22,
    Authorization = 23,
    Format = 24,
    Range = 25,
    NotADatabase = 26,
    Notice = 27,
    Warning = 28,
    Row = 100,
    Done = 101,
    Unknown = -1,
}

impl ResultCode {
    /// Map a primary or extended result code to its primary variant.
    pub fn from_raw(code: i32) -> Self {
        match code & 0xff {
            0 => ResultCode::Ok,
            1 => ResultCode::Error,
            2 => ResultCode::Internal,
            3 => ResultCode::Permission,
            4 => ResultCode::Abort,
            5 => ResultCode::Busy,
            6 => ResultCode::Locked,
            7 => ResultCode::NoMemory,
            8 => ResultCode::ReadOnly,
            9 => ResultCode::Interrupt,
            10 => ResultCode::IoError,
            11 => ResultCode::Corrupt,
            12 => ResultCode::NotFound,
            13 => ResultCode::Full,
            14 => ResultCode::CantOpen,
            15 => ResultCode::Protocol,
            16 => ResultCode::Empty,
            17 => ResultCode::Schema,
            18 => ResultCode::TooBig,
            19 => ResultCode::Constraint,
            20 => ResultCode::Mismatch,
            21 => ResultCode::Misuse,
            22 => ResultCode::NoLargeFileSupport,
            23 => ResultCode::Authorization,
            24 => ResultCode::Format,
            25 => ResultCode::Range,
            26 => ResultCode::NotADatabase,
            27 => ResultCode::Notice,
            28 => ResultCode::Warning,
            100 => ResultCode::Row,
            101 => ResultCode::Done,
            _ => ResultCode::Unknown,
        }
    }

    /// The raw numeric code.
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// A failure reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Primary result code (`extended_code & 0xff`).
    pub code: ResultCode,
    /// Extended result code as returned by `sqlite3_extended_errcode`.
    pub extended_code: i32,
    /// The engine's message, unmodified.
    pub message: String,
    /// The SQL that was being prepared or stepped, if any.
    pub sql: Option<String>,
}

impl EngineError {
    pub fn new(extended_code: i32, message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::from_raw(extended_code),
            extended_code,
            message: message.into(),
            sql: None,
        }
    }

    /// Attach the SQL text that triggered the failure.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

/// Opening a database failed.
#[derive(Debug)]
pub struct OpenError {
    pub path: String,
    pub error: EngineError,
}

/// Caller misuse detectable from the arguments alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// A 0-based index past the end of a parameter or column list.
    IndexOutOfRange { index: usize, len: usize },
    /// No bind parameter carries this exact name.
    UnknownParameter(String),
    /// The (name, arity) key or collation name is already registered.
    DuplicateRegistration { name: String, arity: Option<i32> },
    /// A fixed-arity function was invoked with the wrong number of arguments.
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    /// The operation is not valid in the object's current state.
    InvalidState(String),
    /// A string passed to the engine contained an interior NUL byte.
    NulByte(String),
    /// `prepare` was given more than one statement.
    TrailingSql(String),
    /// Any other invalid argument.
    InvalidArgument(String),
}

/// The kind of object an operation was attempted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Connection,
    Statement,
    Blob,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisposedError {
    pub object: ObjectKind,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Build the right variant for an engine result code.
    ///
    /// `SQLITE_INTERRUPT` becomes `Cancelled`, everything else `Engine`.
    pub fn from_engine(error: EngineError) -> Self {
        if error.code == ResultCode::Interrupt {
            Error::Cancelled(error)
        } else {
            Error::Engine(error)
        }
    }

    pub fn disposed(object: ObjectKind) -> Self {
        Error::Disposed(DisposedError { object })
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::Contract(ContractError::InvalidState(message.into()))
    }

    /// The engine error payload, for `Engine`, `Cancelled` and `Open`.
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            Error::Engine(e) | Error::Cancelled(e) => Some(e),
            Error::Open(e) => Some(&e.error),
            _ => None,
        }
    }

    /// Primary result code, if this error came from the engine.
    pub fn primary_code(&self) -> Option<ResultCode> {
        self.engine().map(|e| e.code)
    }

    /// Extended result code, if this error came from the engine.
    pub fn extended_code(&self) -> Option<i32> {
        self.engine().map(|e| e.extended_code)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Busy or locked: another connection holds the lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.primary_code(),
            Some(ResultCode::Busy | ResultCode::Locked)
        )
    }

    pub fn is_constraint(&self) -> bool {
        self.primary_code() == Some(ResultCode::Constraint)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Contract(_))
    }

    /// The SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        self.engine().and_then(|e| e.sql.as_deref())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Engine(e) => write!(f, "{}", e),
            Error::Cancelled(e) => write!(f, "Operation cancelled: {}", e.message),
            Error::Open(e) => write!(f, "Failed to open database '{}': {}", e.path, e.error),
            Error::Contract(e) => write!(f, "Contract violation: {}", e),
            Error::Disposed(e) => write!(f, "{}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Engine(e) | Error::Cancelled(e) => Some(e),
            Error::Open(e) => Some(&e.error),
            _ => None,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Unknown => write!(f, "unknown result code"),
            other => write!(f, "{:?} ({})", other, other.raw()),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The message is the engine's own text; the code is appended so
        // diagnostics stay greppable.
        write!(f, "{} (code {})", self.message, self.extended_code)
    }
}

impl std::error::Error for EngineError {}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractError::IndexOutOfRange { index, len } => {
                write!(f, "index {} out of range (length {})", index, len)
            }
            ContractError::UnknownParameter(name) => {
                write!(f, "no bind parameter named '{}'", name)
            }
            ContractError::DuplicateRegistration {
                name,
                arity: Some(arity),
            } => write!(f, "function '{}' with arity {} already registered", name, arity),
            ContractError::DuplicateRegistration { name, arity: None } => {
                write!(f, "collation '{}' already registered", name)
            }
            ContractError::ArityMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "function '{}' expects {} argument(s), got {}",
                name, expected, actual
            ),
            ContractError::InvalidState(msg)
            | ContractError::InvalidArgument(msg)
            | ContractError::NulByte(msg) => write!(f, "{}", msg),
            ContractError::TrailingSql(tail) => {
                write!(f, "expected a single statement, found trailing SQL: {}", tail)
            }
        }
    }
}

impl fmt::Display for DisposedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} has been closed", self.object)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ContractError> for Error {
    fn from(err: ContractError) -> Self {
        Error::Contract(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<OpenError> for Error {
    fn from(err: OpenError) -> Self {
        Error::Open(err)
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::from_engine(err)
    }
}

/// Result type alias for sqlkit operations.
pub type Result<T> = std::result::Result<T, Error>;
