//! Marl VM call core
//!
//! This crate provides the call dispatcher and protected-invocation core of
//! the Marl runtime:
//! - Uniform tagged values and the callable model (closures, primitives,
//!   secure primitives, variadic primitives)
//! - A GC heap with a scoped rooting protocol
//! - The arity & privilege gate and the dispatch entry family
//! - A reified call stack for diagnostics and unwinding
//! - Protected calls (`mcatch` and its wrappers) and the script-visible
//!   `setjmp`/`longjmp` facility
//!
//! All state lives on a [`Runtime`] value; one runtime is one
//! single-threaded execution context.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builtins;
pub mod call;
pub mod call_stack;
pub mod callable;
pub mod error;
pub mod gc;
pub mod interp;
pub mod invoke;
pub mod object;
pub mod protect;
pub mod runtime;
pub mod value;

pub use call::{call, call0, call1, call1plus, call2, call3, call4, call5, callv};
pub use call_stack::{CallFrame, CallTrace, FrameKind, NamedFrame, PrimitiveFrame, TraceEntry};
pub use callable::{callable_with_error, check_callable, is_callable_with, minlevel_violator};
pub use error::{Exception, RuntimeError, Seclevel, Signal, Unwind, VmResult};
pub use gc::{GcStats, Heap};
pub use interp::{do_interpret, stack_pop, stack_push, stack_reserve, Op};
pub use invoke::{
    invoke0, invoke1, invoke1plus, invoke2, invoke3, invoke4, invoke5, invoke_vec,
};
pub use object::{
    Arity, Closure, Code, CodeBody, HeapValue, JmpState, JumpBuf, ObjectHeader, ObjectKind,
    OpDescriptor, Primitive, PrimitiveEntry, MAX_FUNCTION_ARGS, MAX_PRIMITIVE_ARGS, OP_CONST,
    OP_LEAF, OP_NOALLOC, OP_NOESCAPE, OP_SECURE,
};
pub use protect::{
    call_trace_mode, maybe_mrethrow, mcatch, mcatch_call, mcatch_call0, mcatch_call1plus,
    mcatchv, mlongjmp, mrethrow, msetjmp, mthrow, runtime_error, CatchContext, TraceMode,
};
pub use runtime::{Runtime, RuntimeOptions, Session};
pub use value::{GcRef, Value};
