//! Primitives the runtime ships with
//!
//! `setjmp` and `longjmp` expose the non-local jump facility to script
//! code; `apply` is the script-level face of the vector dispatch entry.

use crate::call::call;
use crate::callable::check_callable;
use crate::error::{RuntimeError, VmResult};
use crate::object::{ObjectKind, OpDescriptor, PrimitiveEntry};
use crate::protect::{mlongjmp, msetjmp, runtime_error};
use crate::runtime::Runtime;
use crate::value::Value;

fn prim_setjmp(rt: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    let f = args[0];
    check_callable(rt, f, 1)?;
    msetjmp(rt, f)
}

static SETJMP_OP: OpDescriptor = OpDescriptor {
    name: "setjmp",
    entry: PrimitiveEntry::Fixed(prim_setjmp),
    nargs: 1,
    seclevel: 0,
    flags: 0,
};

fn prim_longjmp(rt: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    mlongjmp(rt, args[0], args[1])
}

static LONGJMP_OP: OpDescriptor = OpDescriptor {
    name: "longjmp",
    entry: PrimitiveEntry::Fixed(prim_longjmp),
    nargs: 2,
    seclevel: 0,
    flags: 0,
};

fn prim_apply(rt: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    let f = args[0];
    let argv = args[1];
    let is_vector = argv
        .as_ref()
        .is_some_and(|r| rt.heap.kind(r) == ObjectKind::Vector);
    if !is_vector {
        return Err(runtime_error(rt, RuntimeError::BadType));
    }
    let nargs = rt.vector_len(argv);
    check_callable(rt, f, nargs)?;
    call(rt, f, argv)
}

static APPLY_OP: OpDescriptor = OpDescriptor {
    name: "apply",
    entry: PrimitiveEntry::Fixed(prim_apply),
    nargs: 2,
    seclevel: 0,
    flags: 0,
};

/// Register the core primitives on a fresh runtime
pub fn register_builtins(rt: &mut Runtime) {
    rt.register_primitive(&SETJMP_OP);
    rt.register_primitive(&LONGJMP_OP);
    rt.register_primitive(&APPLY_OP);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::call2;

    #[test]
    fn test_apply_rejects_non_vector() {
        let mut rt = Runtime::new();
        let apply = rt.lookup_primitive("apply").unwrap();
        let target = rt.lookup_primitive("longjmp").unwrap();
        assert!(call2(&mut rt, apply, target, Value::int(3)).is_err());
        assert_eq!(
            rt.pending_exception().unwrap().error,
            Some(RuntimeError::BadType)
        );
    }

    #[test]
    fn test_apply_dispatches_vector() {
        let mut rt = Runtime::new();
        let apply = rt.lookup_primitive("apply").unwrap();
        let longjmp = rt.lookup_primitive("longjmp").unwrap();
        // longjmp on a non-buffer raises bad-type; reaching that error
        // proves apply dispatched through the vector entry
        let argv = rt.alloc_vector_from(&[Value::int(1), Value::int(2)]);
        rt.add_global_root(argv);
        assert!(call2(&mut rt, apply, longjmp, argv).is_err());
        assert_eq!(
            rt.pending_exception().unwrap().error,
            Some(RuntimeError::BadType)
        );
        assert_eq!(rt.primitive_call_count(longjmp), 1);
    }
}
