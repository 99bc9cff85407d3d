//! Runtime failure kinds and the unwinding channel
//!
//! Script-level failures do not carry payloads through return values.
//! Instead, the failing operation fills the runtime's single exception slot
//! with a `(signal, kind)` pair and returns the zero-sized [`Unwind`]
//! marker; `?` then propagates the unwind to the nearest catch installed by
//! [`crate::protect::mcatch`], which restores the reified call stack and
//! inspects the slot.

/// Privilege level attached to code and primitive operations
pub type Seclevel = u8;

/// Enumerated runtime failure kinds surfaced to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// A value had the wrong type for the operation
    #[error("bad type")]
    BadType,

    /// A callable was invoked with an argument count it does not admit
    #[error("wrong number of parameters")]
    WrongParameters,

    /// A secure primitive was invoked above the active privilege ceiling
    #[error("security violation")]
    SecurityViolation,

    /// A value was structurally valid but unusable (e.g. a consumed jump
    /// buffer)
    #[error("bad value")]
    BadValue,

    /// Integer division by zero
    #[error("divide by zero")]
    DivideByZero,

    /// Value stack or call depth limit exceeded
    #[error("maximum recursion depth exceeded")]
    Recurse,
}

/// Why the runtime is unwinding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A runtime error; the kind is in [`Exception::error`]
    Error,
    /// A script-visible `longjmp` in flight; intercepted by the matching
    /// `setjmp` catch
    LongJmp,
}

/// The `(signal, kind)` pair held in the runtime's exception slot.
///
/// `error` is `None` for signals that carry no error kind (a `longjmp`
/// in flight).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception {
    /// What is unwinding
    pub signal: Signal,
    /// The failure kind, when the signal is an error
    pub error: Option<RuntimeError>,
}

/// Zero-sized marker propagated while unwinding. The exception itself
/// lives in the runtime's single exception slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind;

/// Result type for every operation that can unwind
pub type VmResult<T> = Result<T, Unwind>;
