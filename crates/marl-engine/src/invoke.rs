//! Native-code ABI: the invoker family
//!
//! Compiled closures are entered directly through one invoker per arity up
//! to [`MAX_PRIMITIVE_ARGS`], plus generic vector and 1-plus-vector forms.
//! Each invoker honors the closure's internal arity check before entering
//! the compiled body, pushes a `NativeClosure` frame, and keeps the closure
//! and arguments rooted for the duration of the call.

use crate::call_stack::CallFrame;
use crate::error::{RuntimeError, VmResult};
use crate::object::CodeBody;
use crate::protect::runtime_error;
use crate::runtime::Runtime;
use crate::value::Value;

/// Shared entry: arity check, frame, roots, then the compiled body
pub(crate) fn enter_native(rt: &mut Runtime, closure: Value, args: &[Value]) -> VmResult<Value> {
    let closure_ref = closure.as_ref().expect("closure is a heap value");
    let code_ref = rt
        .heap
        .closure(closure_ref)
        .code
        .as_ref()
        .expect("closure without code");

    let (entry, arity) = {
        let code = rt.heap.code(code_ref);
        let entry = match code.body {
            CodeBody::Native(f) => f,
            CodeBody::Bytecode(_) => unreachable!("native invoker entered with bytecode closure"),
        };
        (entry, code.arity)
    };

    // compiled code checks its own argument count
    if !arity.admits(args.len()) {
        let name = crate::callable::callable_name(rt, closure_ref);
        rt.error_message = Some(format!(
            "{} not callable with {} arguments",
            name,
            args.len()
        ));
        return Err(runtime_error(rt, RuntimeError::WrongParameters));
    }

    rt.call_stack.push(CallFrame::NativeClosure {
        closure,
        nargs: args.len() as u32,
    });

    let mut roots = Vec::with_capacity(args.len() + 1);
    roots.push(closure);
    roots.extend_from_slice(args);
    let result = rt.with_roots(&roots, |rt| entry(rt, closure, args))?;

    rt.call_stack.pop();
    Ok(result)
}

/// Invoke a compiled closure with no arguments
pub fn invoke0(rt: &mut Runtime, closure: Value) -> VmResult<Value> {
    enter_native(rt, closure, &[])
}

macro_rules! define_invoke_n {
    ($(#[$doc:meta])* $name:ident, ($($arg:ident),+)) => {
        $(#[$doc])*
        pub fn $name(rt: &mut Runtime, closure: Value, $($arg: Value),+) -> VmResult<Value> {
            let args = [$($arg),+];
            enter_native(rt, closure, &args)
        }
    };
}

define_invoke_n!(
    /// Invoke a compiled closure with one argument
    invoke1, (a1)
);
define_invoke_n!(
    /// Invoke a compiled closure with two arguments
    invoke2, (a1, a2)
);
define_invoke_n!(
    /// Invoke a compiled closure with three arguments
    invoke3, (a1, a2, a3)
);
define_invoke_n!(
    /// Invoke a compiled closure with four arguments
    invoke4, (a1, a2, a3, a4)
);
define_invoke_n!(
    /// Invoke a compiled closure with five arguments
    invoke5, (a1, a2, a3, a4, a5)
);

/// Invoke a compiled closure with a scalar first argument followed by a
/// vector of the rest
pub fn invoke1plus(rt: &mut Runtime, closure: Value, arg: Value, rest: Value) -> VmResult<Value> {
    let rest_ref = rest.as_ref().expect("argument tail is a vector");
    let mut args = Vec::with_capacity(1 + rt.heap.vector(rest_ref).len());
    args.push(arg);
    args.extend_from_slice(rt.heap.vector(rest_ref));
    enter_native(rt, closure, &args)
}

/// Invoke a compiled closure with an argument vector
pub fn invoke_vec(rt: &mut Runtime, closure: Value, args: Value) -> VmResult<Value> {
    let args_ref = args.as_ref().expect("argument vector is a heap value");
    let argv: Vec<Value> = rt.heap.vector(args_ref).to_vec();
    enter_native(rt, closure, &argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Arity, Code};

    fn sum_entry(_rt: &mut Runtime, _closure: Value, args: &[Value]) -> VmResult<Value> {
        let total: i64 = args.iter().filter_map(|v| v.as_int()).sum();
        Ok(Value::int(total))
    }

    fn native_closure(rt: &mut Runtime, arity: Arity) -> Value {
        let code = Code {
            name: Some("native-sum".to_string()),
            arity,
            seclevel: 0,
            constants: vec![],
            body: CodeBody::Native(sum_entry),
        };
        let c = rt.new_closure(code, &[]);
        rt.add_global_root(c);
        c
    }

    #[test]
    fn test_fixed_arity_invokers() {
        let mut rt = Runtime::new();
        let c = native_closure(&mut rt, Arity::Exact(3));
        let r = invoke3(&mut rt, c, Value::int(1), Value::int(2), Value::int(3)).unwrap();
        assert_eq!(r.as_int(), Some(6));
        assert_eq!(rt.call_stack_depth(), 0);
    }

    #[test]
    fn test_invoker_checks_arity() {
        let mut rt = Runtime::new();
        let c = native_closure(&mut rt, Arity::Exact(2));
        assert!(invoke1(&mut rt, c, Value::int(1)).is_err());
        assert_eq!(
            rt.pending_exception().unwrap().error,
            Some(RuntimeError::WrongParameters)
        );
    }

    #[test]
    fn test_invoke_vec_and_1plus() {
        let mut rt = Runtime::new();
        let c = native_closure(&mut rt, Arity::Variadic);
        let rest = rt.alloc_vector_from(&[Value::int(20), Value::int(30)]);
        rt.add_global_root(rest);
        let r = invoke1plus(&mut rt, c, Value::int(10), rest).unwrap();
        assert_eq!(r.as_int(), Some(60));
        let argv = rt.alloc_vector_from(&[Value::int(5), Value::int(6)]);
        rt.add_global_root(argv);
        let r = invoke_vec(&mut rt, c, argv).unwrap();
        assert_eq!(r.as_int(), Some(11));
    }
}
