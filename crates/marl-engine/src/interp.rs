//! Interpreter collaborator: the shared value stack and bytecode execution
//!
//! The dispatcher marshals arguments by reserving space on the shared
//! value stack, pushing them in order, and transferring control here with
//! `(closure, nargs)`; the result comes back on the stack top. The stack
//! is traced by the collector, so anything on it is rooted.
//!
//! The opcode set is deliberately small: enough for closures to compute,
//! call other callables, and exercise every dispatch path. `do_interpret`
//! performs the closure's own arity check on entry, which is what the
//! dispatcher's 1-plus-vector path relies on when it skips rechecking for
//! closure callees.

use crate::call::callv;
use crate::callable::check_callable_at;
use crate::error::{RuntimeError, VmResult};
use crate::object::{Arity, CodeBody, MAX_FUNCTION_ARGS};
use crate::call_stack::CallFrame;
use crate::protect::runtime_error;
use crate::runtime::Runtime;
use crate::value::{GcRef, Value};

/// Bytecode operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Push a constant-pool value
    Const(u16),
    /// Push a local (argument) slot
    Local(u8),
    /// Push a captured-environment slot
    Capture(u8),
    /// Integer addition of the two stack-top values
    Add,
    /// Integer subtraction
    Sub,
    /// Integer multiplication
    Mul,
    /// Integer division; zero divisor raises `divide-by-zero`
    Div,
    /// Call: stack holds `callee, a1..an`; replaces them with the result
    Call(u8),
    /// Return the stack top
    Ret,
}

/// Ensure the value stack can take `n` more values. A collection point.
pub fn stack_reserve(rt: &mut Runtime, n: usize) -> VmResult<()> {
    if rt.value_stack.len() + n > rt.options.max_value_stack {
        return Err(runtime_error(rt, RuntimeError::Recurse));
    }
    rt.maybe_collect();
    rt.value_stack.reserve(n);
    Ok(())
}

/// Push onto the shared value stack
#[inline]
pub fn stack_push(rt: &mut Runtime, v: Value) {
    rt.value_stack.push(v);
}

/// Pop the shared value stack
#[inline]
pub fn stack_pop(rt: &mut Runtime) -> Value {
    rt.value_stack.pop().expect("value stack underflow")
}

fn op_at(rt: &Runtime, code: GcRef, pc: usize) -> Op {
    match &rt.heap.code(code).body {
        CodeBody::Bytecode(ops) => *ops
            .get(pc)
            .unwrap_or_else(|| unreachable!("bytecode ran off the end without Ret")),
        CodeBody::Native(_) => unreachable!("interpreting native code"),
    }
}

fn const_at(rt: &Runtime, code: GcRef, idx: usize) -> Value {
    rt.heap.code(code).constants[idx]
}

fn pop_int(rt: &mut Runtime) -> VmResult<i64> {
    match stack_pop(rt).as_int() {
        Some(i) => Ok(i),
        None => Err(runtime_error(rt, RuntimeError::BadType)),
    }
}

/// Execute a bytecode closure whose `nargs` arguments are on the value
/// stack, leaving its result on the stack top.
///
/// Performs the closure's own arity check; a variadic closure receives its
/// arguments collected into a fresh vector as its single local.
pub fn do_interpret(rt: &mut Runtime, closure: Value, nargs: usize) -> VmResult<()> {
    let closure_ref = closure.as_ref().expect("closure is a heap value");
    let code_ref = rt
        .heap
        .closure(closure_ref)
        .code
        .as_ref()
        .expect("closure without code");

    if rt.call_stack.len() >= rt.options.max_call_depth {
        return Err(runtime_error(rt, RuntimeError::Recurse));
    }

    let (arity, seclevel) = {
        let code = rt.heap.code(code_ref);
        (code.arity, code.seclevel)
    };

    // the closure's own argument-count check
    let nlocals = match arity {
        Arity::Exact(k) if k as usize == nargs => nargs,
        Arity::Variadic if nargs <= MAX_FUNCTION_ARGS => {
            // collect the arguments into a vector local; they are rooted
            // on the stack throughout, the closure needs its own root
            let base = rt.value_stack.len() - nargs;
            let packed = rt.with_roots(&[closure], |rt| {
                let elems: Vec<Value> = rt.value_stack[base..].to_vec();
                rt.alloc_vector_from(&elems)
            });
            rt.value_stack.truncate(base);
            stack_push(rt, packed);
            1
        }
        _ => {
            let name = crate::callable::callable_name(rt, closure_ref);
            rt.error_message = Some(format!("{} not callable with {} arguments", name, nargs));
            return Err(runtime_error(rt, RuntimeError::WrongParameters));
        }
    };

    rt.call_stack.push(CallFrame::Interpreted {
        closure,
        nargs: nargs as u32,
    });

    let bp = rt.value_stack.len() - nlocals;
    let env = rt.heap.closure(closure_ref).env;
    let mut pc = 0usize;

    loop {
        let op = op_at(rt, code_ref, pc);
        pc += 1;
        match op {
            Op::Const(i) => {
                let v = const_at(rt, code_ref, i as usize);
                stack_push(rt, v);
            }
            Op::Local(i) => {
                let v = rt.value_stack[bp + i as usize];
                stack_push(rt, v);
            }
            Op::Capture(i) => {
                let env_ref = env.as_ref().expect("capture in capture-free closure");
                let v = rt.heap.vector(env_ref)[i as usize];
                stack_push(rt, v);
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                let b = pop_int(rt)?;
                let a = pop_int(rt)?;
                let r = match op {
                    Op::Add => a.wrapping_add(b),
                    Op::Sub => a.wrapping_sub(b),
                    Op::Mul => a.wrapping_mul(b),
                    Op::Div => {
                        if b == 0 {
                            return Err(runtime_error(rt, RuntimeError::DivideByZero));
                        }
                        a.wrapping_div(b)
                    }
                    _ => unreachable!(),
                };
                stack_push(rt, Value::int(r));
            }
            Op::Call(n) => {
                let n = n as usize;
                let len = rt.value_stack.len();
                let callee = rt.value_stack[len - 1 - n];
                // script calls carry the executing code's privilege, not
                // the host ceiling
                check_callable_at(rt, callee, n, seclevel)?;
                // copies; the originals stay on the stack, rooted, until
                // the call completes
                let args: Vec<Value> = rt.value_stack[len - n..].to_vec();
                let result = callv(rt, None, callee, &args)?;
                rt.value_stack.truncate(len - 1 - n);
                stack_push(rt, result);
            }
            Op::Ret => {
                let result = stack_pop(rt);
                rt.value_stack.truncate(bp);
                rt.call_stack.pop();
                stack_push(rt, result);
                return Ok(());
            }
        }
    }
}
