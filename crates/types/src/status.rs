//! Status codes returned by every fallible operation in the workspace.
//!
//! A [`Status`] carries exactly one [`Code`], an optional [`SubCode`] refining
//! it (for example `IOError/NoSpace` or `TimedOut/LockTimeout`), an optional
//! human readable message, and a `retryable` flag consulted by the bounded
//! retry logic in the background jobs.
//!
//! Absence of a key is never an error: point lookups return `Ok(None)`.

use std::fmt;
use std::io;

use thiserror::Error;

/// Primary status classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    NotFound,
    Corruption,
    NotSupported,
    InvalidArgument,
    IOError,
    MergeInProgress,
    Incomplete,
    ShutdownInProgress,
    TimedOut,
    Aborted,
    Busy,
    Expired,
    TryAgain,
}

impl Code {
    fn label(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::NotFound => "NotFound",
            Code::Corruption => "Corruption",
            Code::NotSupported => "Not implemented",
            Code::InvalidArgument => "Invalid argument",
            Code::IOError => "IO error",
            Code::MergeInProgress => "Merge in progress",
            Code::Incomplete => "Result incomplete",
            Code::ShutdownInProgress => "Shutdown in progress",
            Code::TimedOut => "Operation timed out",
            Code::Aborted => "Operation aborted",
            Code::Busy => "Resource busy",
            Code::Expired => "Operation expired",
            Code::TryAgain => "Operation failed. Try again.",
        }
    }
}

/// Refinement of a [`Code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubCode {
    #[default]
    None,
    MutexTimeout,
    LockTimeout,
    LockLimit,
    NoSpace,
    Deadlock,
    StaleFile,
    MemoryLimit,
}

impl SubCode {
    fn label(self) -> Option<&'static str> {
        match self {
            SubCode::None => None,
            SubCode::MutexTimeout => Some("Timeout Acquiring Mutex"),
            SubCode::LockTimeout => Some("Timeout waiting to lock key"),
            SubCode::LockLimit => Some("Failed to acquire lock due to max_num_locks limit"),
            SubCode::NoSpace => Some("No space left on device"),
            SubCode::Deadlock => Some("Deadlock"),
            SubCode::StaleFile => Some("Stale file handle"),
            SubCode::MemoryLimit => Some("Memory limit reached"),
        }
    }
}

/// Error value shared by all crates.
#[derive(Clone, PartialEq, Eq, Error)]
#[error("{}", render(.code, .subcode, .message))]
pub struct Status {
    code: Code,
    subcode: SubCode,
    message: Option<String>,
    retryable: bool,
}

fn render(code: &Code, subcode: &SubCode, message: &Option<String>) -> String {
    let mut out = code.label().to_string();
    if let Some(sub) = subcode.label() {
        out.push_str(": ");
        out.push_str(sub);
    }
    if let Some(msg) = message {
        out.push_str(": ");
        out.push_str(msg);
    }
    out
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("code", &self.code)
            .field("subcode", &self.subcode)
            .field("message", &self.message)
            .field("retryable", &self.retryable)
            .finish()
    }
}

/// Workspace-wide result alias.
pub type Result<T, E = Status> = std::result::Result<T, E>;

macro_rules! constructors {
    ($($ctor:ident => $code:ident, $pred:ident;)*) => {
        $(
            #[doc = concat!("Creates a `", stringify!($code), "` status with a message.")]
            pub fn $ctor(msg: impl Into<String>) -> Self {
                Self::new(Code::$code, SubCode::None, Some(msg.into()))
            }

            #[must_use]
            pub fn $pred(&self) -> bool {
                self.code == Code::$code
            }
        )*
    };
}

impl Status {
    pub fn new(code: Code, subcode: SubCode, message: Option<String>) -> Self {
        Self {
            code,
            subcode,
            message,
            retryable: false,
        }
    }

    /// The `OK` status. Only used where a status value is stored rather than
    /// returned (e.g. the last status of an exhausted iterator).
    pub fn ok() -> Self {
        Self::new(Code::Ok, SubCode::None, None)
    }

    constructors! {
        not_found => NotFound, is_not_found;
        corruption => Corruption, is_corruption;
        not_supported => NotSupported, is_not_supported;
        invalid_argument => InvalidArgument, is_invalid_argument;
        io_error => IOError, is_io_error;
        merge_in_progress => MergeInProgress, is_merge_in_progress;
        incomplete => Incomplete, is_incomplete;
        shutdown_in_progress => ShutdownInProgress, is_shutdown_in_progress;
        timed_out => TimedOut, is_timed_out;
        aborted => Aborted, is_aborted;
        busy => Busy, is_busy;
        expired => Expired, is_expired;
        try_again => TryAgain, is_try_again;
    }

    /// `IOError/NoSpace`, always retryable.
    pub fn no_space(msg: impl Into<String>) -> Self {
        Self::new(Code::IOError, SubCode::NoSpace, Some(msg.into())).with_retryable(true)
    }

    /// `TimedOut/LockTimeout`.
    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Self::new(Code::TimedOut, SubCode::LockTimeout, Some(msg.into()))
    }

    #[must_use]
    pub fn with_subcode(mut self, subcode: SubCode) -> Self {
        self.subcode = subcode;
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Prefixes the message with `context`, keeping code and subcode.
    #[must_use]
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = Some(match self.message.take() {
            Some(m) => format!("{context}: {m}"),
            None => context.to_string(),
        });
        self
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn subcode(&self) -> SubCode {
        self.subcode
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    #[must_use]
    pub fn is_no_space(&self) -> bool {
        self.code == Code::IOError && self.subcode == SubCode::NoSpace
    }

    #[must_use]
    pub fn is_lock_timeout(&self) -> bool {
        self.code == Code::TimedOut && self.subcode == SubCode::LockTimeout
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        if e.raw_os_error() == Some(libc::ENOSPC) {
            return Status::no_space(e.to_string());
        }
        match e.kind() {
            io::ErrorKind::NotFound => Status::io_error(e.to_string()),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                Status::corruption(e.to_string())
            }
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Status::io_error(e.to_string()).with_retryable(true)
            }
            _ => Status::io_error(e.to_string()),
        }
    }
}
