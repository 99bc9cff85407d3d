//! Protected calls, the throw machinery, and script-visible jumps
//!
//! [`mcatch`] installs a catch context: it records the reified call-stack
//! head and the rest of the dynamic state, runs its body, and on an unwind
//! restores everything and optionally captures a diagnostic trace. Failures
//! travel as the zero-sized [`Unwind`] marker with the `(signal, kind)`
//! pair in the runtime's exception slot; nothing is recovered anywhere else.
//!
//! On top of `mcatch` sit the protected-call wrappers, one per invocation
//! shape, and the script-visible `setjmp`/`longjmp` pair whose jump buffers
//! are first-class heap values.

use tracing::debug;

use crate::call::{call, call0, call1, call1plus, callv};
use crate::call_stack::{CallFrame, CallTrace, NamedFrame, TraceEntry};
use crate::error::{Exception, RuntimeError, Signal, Unwind, VmResult};
use crate::object::{HeapValue, JmpState, ObjectKind};
use crate::runtime::Runtime;
use crate::value::Value;

/// Whether a catch contributes to captured diagnostic traces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TraceMode {
    /// Capture a trace when this catch unwinds
    On,
    /// Capture nothing
    Off,
    /// Capture nothing, and stop nested catches from inheriting an outer
    /// mode; untrusted callees must not leak stack shape outward
    Barrier,
}

/// A saved point to which a protected call unwinds
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CatchContext {
    /// Reified call-stack head at install time
    pub call_stack_depth: usize,
    /// Value-stack depth at install time
    pub value_stack_depth: usize,
    /// Scoped-root depth at install time
    pub root_depth: usize,
    /// This catch's trace mode
    pub trace_mode: TraceMode,
    /// Forbid flag at install time, restored on unwind
    pub saved_forbid: Option<&'static str>,
}

/// The trace mode a new catch should install: inherited from the
/// enclosing catch unless there is none or it is a barrier, in which case
/// the local default `On` applies.
pub fn call_trace_mode(rt: &Runtime) -> TraceMode {
    match rt.catch_stack.last() {
        Some(ctx) if ctx.trace_mode != TraceMode::Barrier => ctx.trace_mode,
        _ => TraceMode::On,
    }
}

fn capture_trace(rt: &Runtime, from_depth: usize) -> CallTrace {
    let mut entries = Vec::new();
    for frame in rt.call_stack[from_depth..].iter().rev() {
        let (name, nargs) = match frame {
            CallFrame::Named(f) => (Some(f.name.to_string()), f.nargs),
            CallFrame::Primitive(f) => {
                let r = f.prim.as_ref().expect("primitive frame holds a primitive");
                (Some(rt.heap.primitive(r).op.name.to_string()), f.nargs)
            }
            CallFrame::Interpreted { closure, nargs }
            | CallFrame::NativeClosure { closure, nargs } => {
                let r = closure.as_ref().expect("closure frame holds a closure");
                let code_ref = rt.heap.closure(r).code.as_ref().expect("closure without code");
                (rt.heap.code(code_ref).name.clone(), *nargs)
            }
        };
        entries.push(TraceEntry {
            kind: frame.kind(),
            name,
            nargs,
        });
    }
    CallTrace { entries }
}

/// Install a catch context, run `body`, and return its result, or `None`
/// after an unwind with the exception left pending in the runtime.
///
/// On either path the reified call stack and the catch chain are restored
/// to their install-time identity. The exception slot is cleared before
/// `body` runs, so a stale failure can never masquerade as this call's.
pub fn mcatch<T>(
    rt: &mut Runtime,
    trace_mode: TraceMode,
    body: impl FnOnce(&mut Runtime) -> VmResult<T>,
) -> Option<T> {
    let ctx = CatchContext {
        call_stack_depth: rt.call_stack.len(),
        value_stack_depth: rt.value_stack.len(),
        root_depth: rt.heap.root_mark(),
        trace_mode,
        saved_forbid: rt.forbid_script_calls,
    };
    rt.catch_stack.push(ctx);
    rt.exception = None;
    rt.error_message = None;

    match body(rt) {
        Ok(result) => {
            let ctx = rt.catch_stack.pop().expect("catch chain underflow");
            debug_assert_eq!(rt.call_stack.len(), ctx.call_stack_depth);
            Some(result)
        }
        Err(Unwind) => {
            let ctx = rt.catch_stack.pop().expect("catch chain underflow");
            debug!(
                exception = ?rt.exception,
                depth = rt.call_stack.len() - ctx.call_stack_depth,
                "unwound to catch"
            );
            if ctx.trace_mode == TraceMode::On {
                rt.last_trace = Some(capture_trace(rt, ctx.call_stack_depth));
            }
            rt.call_stack.truncate(ctx.call_stack_depth);
            rt.value_stack.truncate(ctx.value_stack_depth);
            rt.heap.truncate_roots(ctx.root_depth);
            rt.forbid_script_calls = ctx.saved_forbid;
            None
        }
    }
}

/// Fill the exception slot and start unwinding
pub fn mthrow(rt: &mut Runtime, signal: Signal, error: Option<RuntimeError>) -> Unwind {
    rt.exception = Some(Exception { signal, error });
    Unwind
}

/// Raise a runtime error of the given kind
pub fn runtime_error(rt: &mut Runtime, error: RuntimeError) -> Unwind {
    mthrow(rt, Signal::Error, Some(error))
}

/// Continue unwinding without touching the exception slot
pub fn mrethrow() -> Unwind {
    Unwind
}

/// Unwind only if an exception is pending. Used to clear latent failures
/// at safe points.
pub fn maybe_mrethrow(rt: &Runtime) -> VmResult<()> {
    if rt.has_pending_exception() {
        Err(Unwind)
    } else {
        Ok(())
    }
}

// ----- protected-call wrappers -----

/// Protected [`call`]: returns the result, or `None` after a failure with
/// the exception left pending. With a name, failures are traced under a
/// named frame identifying the logical call site.
pub fn mcatch_call(
    rt: &mut Runtime,
    name: Option<&'static str>,
    c: Value,
    args: Value,
) -> Option<Value> {
    let mode = call_trace_mode(rt);
    mcatch(rt, mode, |rt| match name {
        Some(n) => {
            rt.call_stack
                .push(CallFrame::Named(NamedFrame::new(n, &[args])));
            let result = call(rt, c, args)?;
            rt.call_stack.pop();
            Ok(result)
        }
        None => call(rt, c, args),
    })
}

/// Protected [`call0`]
pub fn mcatch_call0(rt: &mut Runtime, name: Option<&'static str>, c: Value) -> Option<Value> {
    let mode = call_trace_mode(rt);
    mcatch(rt, mode, |rt| match name {
        Some(n) => {
            rt.call_stack
                .push(CallFrame::Named(NamedFrame::new(n, &[])));
            let result = call0(rt, c)?;
            rt.call_stack.pop();
            Ok(result)
        }
        None => call0(rt, c),
    })
}

/// Protected [`call1plus`]
pub fn mcatch_call1plus(
    rt: &mut Runtime,
    name: Option<&'static str>,
    c: Value,
    arg: Value,
    rest: Value,
) -> Option<Value> {
    let mode = call_trace_mode(rt);
    mcatch(rt, mode, |rt| match name {
        Some(n) => {
            rt.call_stack
                .push(CallFrame::Named(NamedFrame::new(n, &[arg, rest])));
            let result = call1plus(rt, c, arg, rest)?;
            rt.call_stack.pop();
            Ok(result)
        }
        None => call1plus(rt, c, arg, rest),
    })
}

/// Protected [`callv`]; the name, when given, is handled by `callv`'s own
/// named frame
pub fn mcatchv(
    rt: &mut Runtime,
    name: Option<&'static str>,
    c: Value,
    args: &[Value],
) -> Option<Value> {
    let mode = call_trace_mode(rt);
    mcatch(rt, mode, |rt| callv(rt, name, c, args))
}

// ----- script-visible non-local jump -----

fn jmp_state(rt: &Runtime, buf: Value) -> JmpState {
    let r = buf.as_ref().expect("jump buffer is a heap value");
    match rt.heap.get(r) {
        HeapValue::JumpBuf(b) => b.state,
        other => unreachable!("expected jump buffer, found {:?}", other.kind()),
    }
}

fn disarm(rt: &mut Runtime, buf: Value) {
    let r = buf.as_ref().expect("jump buffer is a heap value");
    rt.heap.jumpbuf_mut(r).state = JmpState::Done;
}

/// `setjmp(f)`: allocate an armed jump buffer, install a catch, and call
/// `f(buf)`.
///
/// Returns `f`'s value if it returns normally (disarming the buffer), or
/// the `longjmp` payload if one fired against this buffer. Any other
/// unwind, including a jump aimed at an outer buffer, keeps propagating.
pub fn msetjmp(rt: &mut Runtime, f: Value) -> VmResult<Value> {
    let mode = call_trace_mode(rt);
    let buf = rt.with_roots(&[f], |rt| rt.alloc_jmpbuf());

    match mcatch(rt, mode, |rt| call1(rt, f, buf)) {
        Some(result) => {
            disarm(rt, buf);
            Ok(result)
        }
        None => {
            let is_longjmp = matches!(
                rt.exception,
                Some(Exception {
                    signal: Signal::LongJmp,
                    ..
                })
            );
            match jmp_state(rt, buf) {
                JmpState::Fired(payload) if is_longjmp => {
                    disarm(rt, buf);
                    rt.exception = None;
                    Ok(payload)
                }
                _ => Err(mrethrow()),
            }
        }
    }
}

/// `longjmp(buf, x)`: arm-consume `buf` with payload `x` and unwind to the
/// `setjmp` that created it.
///
/// Fails with `bad-type` if `buf` is not a jump buffer and `bad-value` if
/// it was already consumed or its `setjmp` has returned.
pub fn mlongjmp(rt: &mut Runtime, buf: Value, x: Value) -> VmResult<Value> {
    let is_buf = buf
        .as_ref()
        .is_some_and(|r| rt.heap.kind(r) == ObjectKind::JumpBuf);
    if !is_buf {
        return Err(runtime_error(rt, RuntimeError::BadType));
    }
    let r = buf.as_ref().expect("checked above");
    if rt.heap.jumpbuf_mut(r).state != JmpState::Armed {
        return Err(runtime_error(rt, RuntimeError::BadValue));
    }
    rt.heap.jumpbuf_mut(r).state = JmpState::Fired(x);
    Err(mthrow(rt, Signal::LongJmp, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_mode_inheritance() {
        let mut rt = Runtime::new();
        // no enclosing catch: local default
        assert_eq!(call_trace_mode(&rt), TraceMode::On);
        mcatch(&mut rt, TraceMode::Off, |rt| {
            assert_eq!(call_trace_mode(rt), TraceMode::Off);
            mcatch(rt, TraceMode::Barrier, |rt| {
                // barrier stops inheritance; nested catches fall back to On
                assert_eq!(call_trace_mode(rt), TraceMode::On);
                Ok(())
            });
            Ok(())
        });
    }

    #[test]
    fn test_mcatch_success_and_failure() {
        let mut rt = Runtime::new();
        assert_eq!(mcatch(&mut rt, TraceMode::On, |_| Ok(3)), Some(3));
        assert!(!rt.has_pending_exception());

        let r: Option<()> = mcatch(&mut rt, TraceMode::On, |rt| {
            Err(runtime_error(rt, RuntimeError::BadValue))
        });
        assert_eq!(r, None);
        assert_eq!(
            rt.pending_exception().unwrap().error,
            Some(RuntimeError::BadValue)
        );
    }

    #[test]
    fn test_mcatch_clears_stale_exception() {
        let mut rt = Runtime::new();
        let _: Option<()> = mcatch(&mut rt, TraceMode::On, |rt| {
            Err(runtime_error(rt, RuntimeError::BadValue))
        });
        assert!(rt.has_pending_exception());
        assert_eq!(mcatch(&mut rt, TraceMode::On, |_| Ok(())), Some(()));
        assert!(!rt.has_pending_exception());
    }

    #[test]
    fn test_maybe_mrethrow() {
        let mut rt = Runtime::new();
        assert!(maybe_mrethrow(&rt).is_ok());
        rt.exception = Some(Exception {
            signal: Signal::Error,
            error: Some(RuntimeError::BadType),
        });
        assert!(maybe_mrethrow(&rt).is_err());
    }

    #[test]
    fn test_catch_restores_depths() {
        let mut rt = Runtime::new();
        let call_depth = rt.call_stack_depth();
        let catch_depth = rt.catch_depth();
        let _: Option<()> = mcatch(&mut rt, TraceMode::On, |rt| {
            rt.call_stack.push(CallFrame::Named(NamedFrame::new("doomed", &[])));
            Err(runtime_error(rt, RuntimeError::BadValue))
        });
        assert_eq!(rt.call_stack_depth(), call_depth);
        assert_eq!(rt.catch_depth(), catch_depth);
    }

    #[test]
    fn test_unwind_captures_named_trace() {
        let mut rt = Runtime::new();
        let _: Option<()> = mcatch(&mut rt, TraceMode::On, |rt| {
            rt.call_stack.push(CallFrame::Named(NamedFrame::new("outer", &[])));
            rt.call_stack.push(CallFrame::Named(NamedFrame::new("inner", &[])));
            Err(runtime_error(rt, RuntimeError::BadValue))
        });
        let trace = rt.last_trace().expect("trace captured");
        let names: Vec<_> = trace.entries.iter().map(|e| e.name.as_deref()).collect();
        assert_eq!(names, vec![Some("inner"), Some("outer")]);
    }

    #[test]
    fn test_barrier_suppresses_trace() {
        let mut rt = Runtime::new();
        let _: Option<()> = mcatch(&mut rt, TraceMode::Barrier, |rt| {
            rt.call_stack.push(CallFrame::Named(NamedFrame::new("hidden", &[])));
            Err(runtime_error(rt, RuntimeError::BadValue))
        });
        assert!(rt.last_trace().is_none());
    }
}
