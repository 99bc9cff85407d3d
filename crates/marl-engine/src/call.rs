//! The call dispatcher
//!
//! One semantic operation (invoke callable `c` with arguments `a0..a{n-1}`
//! and return its single result) behind a family of entry points shaped to
//! avoid building an argument vector when the caller already holds the
//! arguments individually:
//!
//! - [`call0`] through [`call5`], one per positional arity up to
//!   [`MAX_PRIMITIVE_ARGS`];
//! - [`call1plus`] for "a significant first argument plus a tail vector";
//! - [`call`] for a callable plus an argument vector;
//! - [`callv`] for a slice of arguments with an optional diagnostic name,
//!   routing internally.
//!
//! Every entry requires that the callee already passed
//! [`crate::callable::check_callable`]; an impossible kind here is a
//! violated invariant, not a user error, and is fatal.

use tracing::trace;

use crate::call_stack::{CallFrame, NamedFrame, PrimitiveFrame};
use crate::error::VmResult;
use crate::interp::{do_interpret, stack_pop, stack_push, stack_reserve};
use crate::invoke;
use crate::object::{CodeBody, FixedFn, HeapValue, ObjectKind, PrimitiveEntry, VarargFn, MAX_PRIMITIVE_ARGS};
use crate::runtime::Runtime;
use crate::value::{GcRef, Value};

/// How a (pre-checked) callee is entered
enum CalleeKind {
    ClosureNative,
    ClosureBytecode,
    PrimFixed(GcRef, FixedFn),
    PrimVararg(GcRef, VarargFn),
}

fn classify(rt: &Runtime, c: Value) -> CalleeKind {
    let r = c
        .as_ref()
        .unwrap_or_else(|| unreachable!("dispatch of a non-callable value"));
    match rt.heap.get(r) {
        HeapValue::Closure(clo) => {
            let code_ref = clo.code.as_ref().expect("closure without code");
            match rt.heap.code(code_ref).body {
                CodeBody::Native(_) => CalleeKind::ClosureNative,
                CodeBody::Bytecode(_) => CalleeKind::ClosureBytecode,
            }
        }
        HeapValue::Primitive(p) => match p.op.entry {
            PrimitiveEntry::Fixed(f) => CalleeKind::PrimFixed(r, f),
            PrimitiveEntry::Vararg(f) => CalleeKind::PrimVararg(r, f),
        },
        other => unreachable!("dispatch of impossible kind {:?}", other.kind()),
    }
}

/// Hard reentrancy guard: while the forbid flag is set, only primitive
/// callees may be dispatched.
fn check_forbidden(rt: &Runtime, c: Value) {
    if let Some(name) = rt.forbid_script_calls {
        let is_prim = c
            .as_ref()
            .is_some_and(|r| rt.heap.kind(r) == ObjectKind::Primitive);
        if !is_prim {
            panic!("{name}: script calls are forbidden here");
        }
    }
}

/// Run a fixed-arity primitive entry under a primitive frame. The frame's
/// inline buffer keeps the arguments rooted for the duration of the call;
/// on an unwind the frame is left for the catching context to harvest.
fn enter_prim_fixed(
    rt: &mut Runtime,
    prim: Value,
    f: FixedFn,
    args: &[Value],
) -> VmResult<Value> {
    rt.call_stack
        .push(CallFrame::Primitive(PrimitiveFrame::new(prim, args)));
    let result = f(rt, args)?;
    rt.call_stack.pop();
    Ok(result)
}

/// Run a variadic primitive entry under a primitive frame rooting the
/// argument vector.
fn enter_prim_vararg(
    rt: &mut Runtime,
    prim: Value,
    f: VarargFn,
    args: Value,
    nargs: usize,
) -> VmResult<Value> {
    rt.call_stack
        .push(CallFrame::Primitive(PrimitiveFrame::new(prim, &[args])));
    let result = f(rt, args, nargs)?;
    rt.call_stack.pop();
    Ok(result)
}

/// Call `c` with no arguments.
///
/// Requires that `check_callable(c, 0)` would not fail.
pub fn call0(rt: &mut Runtime, c: Value) -> VmResult<Value> {
    check_forbidden(rt, c);
    match classify(rt, c) {
        CalleeKind::ClosureNative => invoke::invoke0(rt, c),
        CalleeKind::ClosureBytecode => {
            do_interpret(rt, c, 0)?;
            Ok(stack_pop(rt))
        }
        CalleeKind::PrimFixed(r, f) => {
            rt.bump_call_count(r);
            enter_prim_fixed(rt, c, f, &[])
        }
        CalleeKind::PrimVararg(r, f) => {
            rt.bump_call_count(r);
            let args = rt.with_roots(&[c], |rt| rt.alloc_vector(0));
            enter_prim_vararg(rt, c, f, args, 0)
        }
    }
}

macro_rules! define_call_n {
    ($(#[$doc:meta])* $name:ident, $n:expr, $invoke:ident, ($($arg:ident),+)) => {
        $(#[$doc])*
        ///
        /// Requires that the matching `check_callable` would not fail.
        pub fn $name(rt: &mut Runtime, c: Value, $($arg: Value),+) -> VmResult<Value> {
            check_forbidden(rt, c);
            let args = [$($arg),+];
            match classify(rt, c) {
                CalleeKind::ClosureNative => invoke::$invoke(rt, c, $($arg),+),
                CalleeKind::ClosureBytecode => {
                    let roots = [c, $($arg),+];
                    rt.with_roots(&roots, |rt| stack_reserve(rt, $n))?;
                    for a in args {
                        stack_push(rt, a);
                    }
                    do_interpret(rt, c, $n)?;
                    Ok(stack_pop(rt))
                }
                CalleeKind::PrimFixed(r, f) => {
                    rt.bump_call_count(r);
                    enter_prim_fixed(rt, c, f, &args)
                }
                CalleeKind::PrimVararg(r, f) => {
                    rt.bump_call_count(r);
                    let roots = [c, $($arg),+];
                    let argv = rt.with_roots(&roots, |rt| rt.alloc_vector_from(&args));
                    enter_prim_vararg(rt, c, f, argv, $n)
                }
            }
        }
    };
}

define_call_n!(
    /// Call `c` with one argument.
    call1, 1, invoke1, (a1)
);
define_call_n!(
    /// Call `c` with two arguments.
    call2, 2, invoke2, (a1, a2)
);
define_call_n!(
    /// Call `c` with three arguments.
    call3, 3, invoke3, (a1, a2, a3)
);
define_call_n!(
    /// Call `c` with four arguments.
    call4, 4, invoke4, (a1, a2, a3, a4)
);
define_call_n!(
    /// Call `c` with five arguments.
    call5, 5, invoke5, (a1, a2, a3, a4, a5)
);

/// Call `c` with a significant first argument followed by a tail vector.
///
/// If `c` is a closure the argument count is not rechecked here; the
/// closure's own entry performs the check, so event-dispatch paths may
/// pass handlers of mixed arity.
pub fn call1plus(rt: &mut Runtime, c: Value, arg: Value, rest: Value) -> VmResult<Value> {
    check_forbidden(rt, c);
    let nargs = 1 + rt.vector_len(rest);
    match classify(rt, c) {
        CalleeKind::ClosureNative => invoke::invoke1plus(rt, c, arg, rest),
        CalleeKind::ClosureBytecode => {
            rt.with_roots(&[c, arg, rest], |rt| stack_reserve(rt, nargs))?;
            stack_push(rt, arg);
            for i in 0..nargs - 1 {
                let v = rt.vector_elems(rest)[i];
                stack_push(rt, v);
            }
            do_interpret(rt, c, nargs)?;
            Ok(stack_pop(rt))
        }
        CalleeKind::PrimFixed(r, f) => {
            assert!(
                nargs <= MAX_PRIMITIVE_ARGS,
                "fixed-arity primitive dispatched with {} arguments",
                nargs
            );
            rt.bump_call_count(r);
            let mut buf = [Value::null(); MAX_PRIMITIVE_ARGS];
            buf[0] = arg;
            buf[1..nargs].copy_from_slice(&rt.vector_elems(rest)[..nargs - 1]);
            enter_prim_fixed(rt, c, f, &buf[..nargs])
        }
        CalleeKind::PrimVararg(r, f) => {
            rt.bump_call_count(r);
            let argv = rt.with_roots(&[c, arg, rest], |rt| {
                let v = rt.alloc_vector(nargs);
                let vr = v.as_ref().expect("fresh vector");
                let tail: Vec<Value> = rt.vector_elems(rest).to_vec();
                let slots = rt.heap.vector_mut(vr);
                slots[0] = arg;
                slots[1..].copy_from_slice(&tail);
                v
            });
            enter_prim_vararg(rt, c, f, argv, nargs)
        }
    }
}

/// Call `c` with the arguments in `args` (a vector value).
///
/// Requires that `check_callable(c, len(args))` would not fail. A
/// zero-length vector short-circuits to [`call0`] without touching the
/// vector again.
pub fn call(rt: &mut Runtime, c: Value, args: Value) -> VmResult<Value> {
    let nargs = rt.vector_len(args);
    if nargs == 0 {
        return call0(rt, c);
    }

    check_forbidden(rt, c);
    match classify(rt, c) {
        CalleeKind::ClosureNative => invoke::invoke_vec(rt, c, args),
        CalleeKind::ClosureBytecode => {
            rt.with_roots(&[c, args], |rt| stack_reserve(rt, nargs))?;
            for i in 0..nargs {
                let v = rt.vector_elems(args)[i];
                stack_push(rt, v);
            }
            do_interpret(rt, c, nargs)?;
            Ok(stack_pop(rt))
        }
        CalleeKind::PrimFixed(r, f) => {
            assert!(
                nargs <= MAX_PRIMITIVE_ARGS,
                "fixed-arity primitive dispatched with {} arguments",
                nargs
            );
            rt.bump_call_count(r);
            let mut buf = [Value::null(); MAX_PRIMITIVE_ARGS];
            buf[..nargs].copy_from_slice(rt.vector_elems(args));
            enter_prim_fixed(rt, c, f, &buf[..nargs])
        }
        CalleeKind::PrimVararg(r, f) => {
            rt.bump_call_count(r);
            enter_prim_vararg(rt, c, f, args, nargs)
        }
    }
}

/// Call `c` with the arguments in `args`, optionally under a named
/// diagnostic frame.
///
/// Arities up to [`MAX_PRIMITIVE_ARGS`] dispatch positionally without
/// allocating; larger calls (and vector-shaped callees) are rerouted
/// through [`call`] behind a freshly-built argument vector. While that
/// vector is under construction the named frame's argument count is held
/// at zero so a collection cannot scan half-written slots.
pub fn callv(
    rt: &mut Runtime,
    name: Option<&'static str>,
    c: Value,
    args: &[Value],
) -> VmResult<Value> {
    let nargs = args.len();
    let frame_idx = name.map(|name| {
        trace!(name, nargs, "named dispatch");
        rt.call_stack
            .push(CallFrame::Named(NamedFrame::new(name, args)));
        rt.call_stack.len() - 1
    });

    let result = 'dispatch: {
        if nargs <= MAX_PRIMITIVE_ARGS {
            check_forbidden(rt, c);
            match classify(rt, c) {
                CalleeKind::ClosureNative => {
                    break 'dispatch invoke::enter_native(rt, c, args);
                }
                CalleeKind::PrimFixed(r, f) => {
                    rt.bump_call_count(r);
                    break 'dispatch enter_prim_fixed(rt, c, f, args);
                }
                // bytecode closures and variadic primitives take the
                // vector path below
                CalleeKind::ClosureBytecode | CalleeKind::PrimVararg(..) => {}
            }
        }

        if let Some(idx) = frame_idx {
            if let CallFrame::Named(frame) = &mut rt.call_stack[idx] {
                frame.nargs = 0;
            }
        }
        let argv = {
            let mut roots = Vec::with_capacity(nargs + 1);
            roots.push(c);
            roots.extend_from_slice(args);
            rt.with_roots(&roots, |rt| rt.alloc_vector_from(args))
        };
        if let Some(idx) = frame_idx {
            if let CallFrame::Named(frame) = &mut rt.call_stack[idx] {
                frame.nargs = 1;
                frame.args[0] = argv;
            }
        }
        call(rt, c, argv)
    }?;

    if frame_idx.is_some() {
        rt.call_stack.pop();
    }
    Ok(result)
}
