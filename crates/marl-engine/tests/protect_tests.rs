//! Protected-call and non-local-jump scenarios
//!
//! Failure capture, stack restoration on both unwind paths, trace modes,
//! and the script-visible `setjmp`/`longjmp` round trips.

use marl_engine::{
    call1, maybe_mrethrow, mcatch, mcatch_call, mcatch_call0, mcatchv, mlongjmp, msetjmp,
    runtime_error, Arity, Code, CodeBody, FrameKind, Op, OpDescriptor, PrimitiveEntry, Runtime,
    RuntimeError, Signal, TraceMode, Value, VmResult,
};

fn raise_bad_value(rt: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Err(runtime_error(rt, RuntimeError::BadValue))
}

static RAISE: OpDescriptor = OpDescriptor {
    name: "raise",
    entry: PrimitiveEntry::Fixed(raise_bad_value),
    nargs: 0,
    seclevel: 0,
    flags: 0,
};

fn bytecode_closure(
    rt: &mut Runtime,
    name: &str,
    arity: Arity,
    constants: Vec<Value>,
    ops: Vec<Op>,
) -> Value {
    let code = Code {
        name: Some(name.to_string()),
        arity,
        seclevel: 0,
        constants,
        body: CodeBody::Bytecode(ops),
    };
    let c = rt.new_closure(code, &[]);
    rt.add_global_root(c);
    c
}

fn native_closure(rt: &mut Runtime, name: &str, arity: Arity, entry: marl_engine::object::NativeClosureFn, captures: &[Value]) -> Value {
    let code = Code {
        name: Some(name.to_string()),
        arity,
        seclevel: 0,
        constants: vec![],
        body: CodeBody::Native(entry),
    };
    let c = rt.new_closure(code, captures);
    rt.add_global_root(c);
    c
}

// ===== Protected calls =====

#[test]
fn test_protected_call_captures_failure() {
    let mut rt = Runtime::new();
    let p = rt.register_primitive(&RAISE);
    let args = rt.alloc_vector(0);
    rt.add_global_root(args);

    let call_depth = rt.call_stack_depth();
    let catch_depth = rt.catch_depth();

    let r = mcatch_call(&mut rt, Some("doomed"), p, args);
    assert!(r.is_none());
    assert_eq!(rt.call_stack_depth(), call_depth);
    assert_eq!(rt.catch_depth(), catch_depth);

    let exn = rt.pending_exception().expect("failure is pending");
    assert_eq!(exn.signal, Signal::Error);
    assert_eq!(exn.error, Some(RuntimeError::BadValue));
}

#[test]
fn test_protected_call_success_clears_pending() {
    let mut rt = Runtime::new();
    let p = rt.register_primitive(&RAISE);
    let c9 = bytecode_closure(
        &mut rt,
        "nine",
        Arity::Exact(0),
        vec![Value::int(9)],
        vec![Op::Const(0), Op::Ret],
    );

    // leave a failure pending, then succeed; the success must not report
    // the stale failure
    assert!(mcatch_call0(&mut rt, None, p).is_none());
    assert!(rt.has_pending_exception());

    let r = mcatch_call0(&mut rt, Some("nine-site"), c9);
    assert_eq!(r.unwrap().as_int(), Some(9));
    assert!(!rt.has_pending_exception());
}

#[test]
fn test_mcatchv_shapes() {
    let mut rt = Runtime::new();
    let sub = bytecode_closure(
        &mut rt,
        "sub",
        Arity::Exact(2),
        vec![],
        vec![Op::Local(0), Op::Local(1), Op::Sub, Op::Ret],
    );
    let r = mcatchv(&mut rt, Some("sub-site"), sub, &[Value::int(9), Value::int(4)]);
    assert_eq!(r.unwrap().as_int(), Some(5));

    let p = rt.register_primitive(&RAISE);
    assert!(mcatchv(&mut rt, Some("raise-site"), p, &[]).is_none());
    assert_eq!(rt.call_stack_depth(), 0);
}

#[test]
fn test_failure_trace_names_call_sites() {
    let mut rt = Runtime::new();
    let p = rt.register_primitive(&RAISE);
    // failing(x) = raise()
    let failing = bytecode_closure(
        &mut rt,
        "failing",
        Arity::Exact(0),
        vec![p],
        vec![Op::Const(0), Op::Call(0), Op::Ret],
    );

    assert!(mcatch_call0(&mut rt, Some("entry-site"), failing).is_none());

    let trace = rt.last_trace().expect("trace captured on unwind");
    // innermost first: the raising primitive, the interpreted closure,
    // then the named wrapper frame
    assert_eq!(trace.entries[0].kind, FrameKind::Primitive);
    assert_eq!(trace.entries[0].name.as_deref(), Some("raise"));
    assert_eq!(trace.entries[1].kind, FrameKind::Interpreted);
    assert_eq!(trace.entries[1].name.as_deref(), Some("failing"));
    assert_eq!(trace.entries[2].kind, FrameKind::NamedCall);
    assert_eq!(trace.entries[2].name.as_deref(), Some("entry-site"));
}

#[test]
fn test_trace_mode_off_is_inherited() {
    let mut rt = Runtime::new();
    let p = rt.register_primitive(&RAISE);

    let r: Option<()> = mcatch(&mut rt, TraceMode::Off, |rt| {
        // the nested protected call inherits Off and captures nothing
        assert!(mcatch_call0(rt, Some("quiet"), p).is_none());
        assert!(rt.last_trace().is_none());
        Err(runtime_error(rt, RuntimeError::BadValue))
    });
    assert!(r.is_none());
    assert!(rt.last_trace().is_none());
}

#[test]
fn test_maybe_mrethrow_at_safe_point() {
    let mut rt = Runtime::new();
    let p = rt.register_primitive(&RAISE);
    assert!(mcatch_call0(&mut rt, None, p).is_none());

    // a latent failure unwinds at the next safe point
    let r: Option<i64> = mcatch(&mut rt, TraceMode::On, |rt| {
        // note: mcatch cleared the slot; re-raise to simulate a latent one
        let _ = runtime_error(rt, RuntimeError::BadType);
        maybe_mrethrow(rt)?;
        Ok(5)
    });
    assert!(r.is_none());
    assert_eq!(
        rt.pending_exception().unwrap().error,
        Some(RuntimeError::BadType)
    );
}

// ===== setjmp / longjmp =====

#[test]
fn test_setjmp_normal_return() {
    let mut rt = Runtime::new();
    // fn (buf) -> 9
    let f = bytecode_closure(
        &mut rt,
        "plain",
        Arity::Exact(1),
        vec![Value::int(9)],
        vec![Op::Const(0), Op::Ret],
    );
    assert_eq!(msetjmp(&mut rt, f).unwrap().as_int(), Some(9));
}

#[test]
fn test_setjmp_longjmp_round_trip() {
    let mut rt = Runtime::new();
    let longjmp = rt.lookup_primitive("longjmp").unwrap();
    // fn (buf) -> { longjmp(buf, 7); 0 }
    let f = bytecode_closure(
        &mut rt,
        "jumper",
        Arity::Exact(1),
        vec![longjmp, Value::int(7), Value::int(0)],
        vec![
            Op::Const(0),
            Op::Local(0),
            Op::Const(1),
            Op::Call(2),
            Op::Const(2),
            Op::Ret,
        ],
    );
    assert_eq!(msetjmp(&mut rt, f).unwrap().as_int(), Some(7));
    assert!(!rt.has_pending_exception());
    assert_eq!(rt.call_stack_depth(), 0);
}

#[test]
fn test_setjmp_through_script_primitive() {
    let mut rt = Runtime::new();
    let setjmp = rt.lookup_primitive("setjmp").unwrap();
    let longjmp = rt.lookup_primitive("longjmp").unwrap();
    let f = bytecode_closure(
        &mut rt,
        "jumper",
        Arity::Exact(1),
        vec![longjmp, Value::int(7), Value::int(0)],
        vec![
            Op::Const(0),
            Op::Local(0),
            Op::Const(1),
            Op::Call(2),
            Op::Const(2),
            Op::Ret,
        ],
    );
    assert_eq!(call1(&mut rt, setjmp, f).unwrap().as_int(), Some(7));
}

fn stash_and_return(rt: &mut Runtime, closure: Value, args: &[Value]) -> VmResult<Value> {
    let cell = rt.closure_env(closure);
    rt.vector_set(cell, 0, args[0]);
    Ok(Value::int(9))
}

#[test]
fn test_longjmp_on_stale_buffer_is_bad_value() {
    let mut rt = Runtime::new();
    let f = native_closure(
        &mut rt,
        "stash",
        Arity::Exact(1),
        stash_and_return,
        &[Value::null()],
    );
    assert_eq!(msetjmp(&mut rt, f).unwrap().as_int(), Some(9));

    // the buffer escaped through the capture cell but its setjmp has
    // returned; jumping is a runtime error
    let stale = rt.vector_get(rt.closure_env(f), 0);
    assert!(mlongjmp(&mut rt, stale, Value::int(0)).is_err());
    assert_eq!(
        rt.pending_exception().unwrap().error,
        Some(RuntimeError::BadValue)
    );
}

fn stash_and_jump(rt: &mut Runtime, closure: Value, args: &[Value]) -> VmResult<Value> {
    let cell = rt.closure_env(closure);
    rt.vector_set(cell, 0, args[0]);
    mlongjmp(rt, args[0], Value::int(7))
}

#[test]
fn test_jump_buffer_consumed_exactly_once() {
    let mut rt = Runtime::new();
    let f = native_closure(
        &mut rt,
        "stash-jump",
        Arity::Exact(1),
        stash_and_jump,
        &[Value::null()],
    );
    assert_eq!(msetjmp(&mut rt, f).unwrap().as_int(), Some(7));

    let consumed = rt.vector_get(rt.closure_env(f), 0);
    assert!(mlongjmp(&mut rt, consumed, Value::int(1)).is_err());
    assert_eq!(
        rt.pending_exception().unwrap().error,
        Some(RuntimeError::BadValue)
    );
}

#[test]
fn test_longjmp_rejects_non_buffer() {
    let mut rt = Runtime::new();
    assert!(mlongjmp(&mut rt, Value::int(3), Value::null()).is_err());
    assert_eq!(
        rt.pending_exception().unwrap().error,
        Some(RuntimeError::BadType)
    );
}

fn jump_to_captured(rt: &mut Runtime, closure: Value, _args: &[Value]) -> VmResult<Value> {
    let env = rt.closure_env(closure);
    let outer_buf = rt.vector_get(env, 0);
    mlongjmp(rt, outer_buf, Value::int(31))
}

fn outer_with_inner_setjmp(rt: &mut Runtime, _closure: Value, args: &[Value]) -> VmResult<Value> {
    let outer_buf = args[0];
    // an inner setjmp whose body jumps past it to the outer buffer
    let code = Code {
        name: Some("inner-jumper".to_string()),
        arity: Arity::Exact(1),
        seclevel: 0,
        constants: vec![],
        body: CodeBody::Native(jump_to_captured),
    };
    let g = rt.new_closure(code, &[outer_buf]);
    let r = rt.with_roots(&[g], |rt| msetjmp(rt, g))?;
    // not reached: the jump bypasses the inner catch
    Ok(r)
}

#[test]
fn test_longjmp_propagates_past_inner_setjmp() {
    let mut rt = Runtime::new();
    let f = native_closure(
        &mut rt,
        "outer",
        Arity::Exact(1),
        outer_with_inner_setjmp,
        &[],
    );
    assert_eq!(msetjmp(&mut rt, f).unwrap().as_int(), Some(31));
    assert!(!rt.has_pending_exception());
    assert_eq!(rt.call_stack_depth(), 0);
}

#[test]
fn test_error_inside_setjmp_body_propagates() {
    let mut rt = Runtime::new();
    let p = rt.register_primitive(&RAISE);
    // fn (buf) -> raise()
    let f = bytecode_closure(
        &mut rt,
        "raiser",
        Arity::Exact(1),
        vec![p],
        vec![Op::Const(0), Op::Call(0), Op::Ret],
    );
    assert!(msetjmp(&mut rt, f).is_err());
    assert_eq!(
        rt.pending_exception().unwrap().error,
        Some(RuntimeError::BadValue)
    );
}
