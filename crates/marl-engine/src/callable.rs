//! Callable inspection and the arity & privilege gate
//!
//! Two ceilings gate secure primitives: the caller's privilege level and,
//! while a session is active, the session's `maxseclevel`. Host entries
//! carry the runtime's `default_seclevel`; the interpreter carries the
//! executing code's own level, which is how script code at a sufficient
//! level reaches secure primitives the host cannot.
//!
//! The gate itself never allocates and never blocks.

use crate::error::{RuntimeError, Seclevel, VmResult};
use crate::object::{HeapValue, MAX_FUNCTION_ARGS};
use crate::protect::runtime_error;
use crate::runtime::Runtime;
use crate::value::{GcRef, Value};

/// Is `v` (or the code it wraps) declared below the active minlevel?
///
/// Non-callable values are never violators.
pub fn minlevel_violator(rt: &Runtime, v: Value) -> bool {
    let Some(r) = v.as_ref() else {
        return false;
    };
    match rt.heap.get(r) {
        HeapValue::Closure(c) => minlevel_violator(rt, c.code),
        HeapValue::Code(code) => code.seclevel < rt.options.minlevel,
        _ => false,
    }
}

/// Can `v` be called with `nargs` arguments?
///
/// Returns false if `v` is not callable at all. Privilege is not
/// consulted; this is the cheap predicate form.
pub fn is_callable_with(rt: &Runtime, v: Value, nargs: usize) -> bool {
    let Some(r) = v.as_ref() else {
        return false;
    };
    match rt.heap.get(r) {
        HeapValue::Closure(c) => {
            let code_ref = c.code.as_ref().expect("closure without code");
            rt.heap.code(code_ref).arity.admits(nargs)
        }
        HeapValue::Primitive(p) => {
            if p.op.is_vararg() {
                nargs <= MAX_FUNCTION_ARGS
            } else {
                p.op.nargs as usize == nargs
            }
        }
        _ => false,
    }
}

/// Is `v` one of the callable kinds?
#[inline]
pub fn is_function(rt: &Runtime, v: Value) -> bool {
    v.as_ref().is_some_and(|r| {
        matches!(
            rt.heap.get(r),
            HeapValue::Closure(_) | HeapValue::Primitive(_)
        )
    })
}

/// The gate: would entering `f` with `nargs` arguments under
/// `caller_seclevel` succeed? Returns the failure kind, or `None` when the
/// call is admitted.
///
/// `f` must be a callable kind; anything else indicates a violated caller
/// contract and is fatal.
pub(crate) fn function_callable(
    rt: &Runtime,
    f: GcRef,
    nargs: usize,
    caller_seclevel: Seclevel,
) -> Option<RuntimeError> {
    match rt.heap.get(f) {
        HeapValue::Closure(c) => {
            let code_ref = c.code.as_ref().expect("closure without code");
            if rt.heap.code(code_ref).arity.admits(nargs) {
                None
            } else {
                Some(RuntimeError::WrongParameters)
            }
        }
        HeapValue::Primitive(p) => {
            if p.op.is_secure() {
                // callers below the declared level never reach the entry
                if caller_seclevel < p.op.seclevel {
                    return Some(RuntimeError::SecurityViolation);
                }
                // the session ceiling applies only while one is active
                if let Some(session) = rt.session {
                    if session.maxseclevel < p.op.seclevel {
                        return Some(RuntimeError::SecurityViolation);
                    }
                }
            }
            let admitted = if p.op.is_vararg() {
                nargs <= MAX_FUNCTION_ARGS
            } else {
                p.op.nargs as usize == nargs
            };
            if admitted {
                None
            } else {
                Some(RuntimeError::WrongParameters)
            }
        }
        other => unreachable!("gate consulted for non-callable kind {:?}", other.kind()),
    }
}

/// Name of a callable for diagnostics
pub(crate) fn callable_name(rt: &Runtime, f: GcRef) -> String {
    match rt.heap.get(f) {
        HeapValue::Closure(c) => {
            let code_ref = c.code.as_ref().expect("closure without code");
            rt.heap
                .code(code_ref)
                .name
                .clone()
                .unwrap_or_else(|| "<fn>".to_string())
        }
        HeapValue::Primitive(p) => p.op.name.to_string(),
        other => unreachable!("no callable name for kind {:?}", other.kind()),
    }
}

/// Checked callability under an explicit caller privilege
pub(crate) fn check_callable_at(
    rt: &mut Runtime,
    v: Value,
    nargs: usize,
    caller_seclevel: Seclevel,
) -> VmResult<()> {
    if !is_function(rt, v) {
        return Err(runtime_error(rt, RuntimeError::BadType));
    }
    let r = v.as_ref().expect("function values are heap values");
    match function_callable(rt, r, nargs, caller_seclevel) {
        None => Ok(()),
        Some(err) => {
            if err == RuntimeError::WrongParameters {
                rt.error_message = Some(format!(
                    "{} not callable with {} arguments",
                    callable_name(rt, r),
                    nargs
                ));
            }
            Err(runtime_error(rt, err))
        }
    }
}

/// The gate verdict for a host-level call, without raising: `None` when
/// `v` admits `nargs` arguments, otherwise the failure kind
/// (`bad-type` for non-callables). Never allocates.
pub fn callable_with_error(rt: &Runtime, v: Value, nargs: usize) -> Option<RuntimeError> {
    if !is_function(rt, v) {
        return Some(RuntimeError::BadType);
    }
    let r = v.as_ref().expect("function values are heap values");
    function_callable(rt, r, nargs, rt.options.default_seclevel)
}

/// Raise an error unless `v` can be called with `nargs` arguments from
/// host-level code.
///
/// Fails with `bad-type` for non-callables, `wrong-parameters` for arity
/// mismatches (with a "<name> not callable with N arguments" diagnostic),
/// and `security-violation` when a privilege ceiling forbids the call.
pub fn check_callable(rt: &mut Runtime, v: Value, nargs: usize) -> VmResult<()> {
    let ceiling = rt.options.default_seclevel;
    check_callable_at(rt, v, nargs, ceiling)
}
