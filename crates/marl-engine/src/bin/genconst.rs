//! Emits the struct-offset constants table consumed by the native-code
//! compiler and the hand-written trampolines.
//!
//! Output is a generated Rust source on stdout: byte offsets of the fields
//! the compiled-code ABI reaches into, sizes of the types it lays out, and
//! the numeric values of the kind tags.

use std::mem::{offset_of, size_of};

use marl_engine::call_stack::{NamedFrame, PrimitiveFrame};
use marl_engine::object::{Closure, ObjectHeader, ObjectKind, OpDescriptor, Primitive};
use marl_engine::protect::{CatchContext, TraceMode};
use marl_engine::{CallFrame, Value};

fn pr(name: &str, value: usize) {
    println!("pub const {:<32} usize = {};", format!("{}:", name), value);
}

fn main() {
    println!("// automatically generated by genconst; do not edit");
    println!();

    pr("OBJECT_SIZE", size_of::<ObjectHeader>());
    pr("OBJECT_KIND", offset_of!(ObjectHeader, kind));
    pr("OBJECT_FLAGS", offset_of!(ObjectHeader, flags));
    pr("OBJECT_INFO", offset_of!(ObjectHeader, size));

    pr("VALUE_SIZE", size_of::<Value>());

    pr("CLOSURE_SIZE", size_of::<Closure>());
    pr("CLOSURE_CODE", offset_of!(Closure, code));
    pr("CLOSURE_ENV", offset_of!(Closure, env));

    pr("PRIMITIVE_SIZE", size_of::<Primitive>());
    pr("PRIMITIVE_OP", offset_of!(Primitive, op));
    pr("PRIMITIVE_CALL_COUNT", offset_of!(Primitive, call_count));

    pr("PRIMOP_SIZE", size_of::<OpDescriptor>());
    pr("PRIMOP_ENTRY", offset_of!(OpDescriptor, entry));
    pr("PRIMOP_NARGS", offset_of!(OpDescriptor, nargs));
    pr("PRIMOP_SECLEVEL", offset_of!(OpDescriptor, seclevel));
    pr("PRIMOP_FLAGS", offset_of!(OpDescriptor, flags));

    pr("CCONTEXT_SIZE", size_of::<CatchContext>());
    pr("CCONTEXT_CALL_STACK", offset_of!(CatchContext, call_stack_depth));
    pr("CCONTEXT_VALUE_STACK", offset_of!(CatchContext, value_stack_depth));
    pr("CCONTEXT_ROOTS", offset_of!(CatchContext, root_depth));
    pr("CCONTEXT_TRACE_MODE", offset_of!(CatchContext, trace_mode));

    pr("CALL_FRAME_SIZE", size_of::<CallFrame>());
    pr("NAMED_FRAME_SIZE", size_of::<NamedFrame>());
    pr("NAMED_FRAME_NAME", offset_of!(NamedFrame, name));
    pr("NAMED_FRAME_NARGS", offset_of!(NamedFrame, nargs));
    pr("NAMED_FRAME_ARGS", offset_of!(NamedFrame, args));
    pr("PRIM_FRAME_SIZE", size_of::<PrimitiveFrame>());
    pr("PRIM_FRAME_PRIM", offset_of!(PrimitiveFrame, prim));
    pr("PRIM_FRAME_NARGS", offset_of!(PrimitiveFrame, nargs));
    pr("PRIM_FRAME_ARGS", offset_of!(PrimitiveFrame, args));

    println!();
    for (name, kind) in [
        ("KIND_VECTOR", ObjectKind::Vector),
        ("KIND_STR", ObjectKind::Str),
        ("KIND_CODE", ObjectKind::Code),
        ("KIND_CLOSURE", ObjectKind::Closure),
        ("KIND_PRIMITIVE", ObjectKind::Primitive),
        ("KIND_JUMP_BUF", ObjectKind::JumpBuf),
    ] {
        pr(name, kind as usize);
    }
    for (name, mode) in [
        ("TRACE_ON", TraceMode::On),
        ("TRACE_OFF", TraceMode::Off),
        ("TRACE_BARRIER", TraceMode::Barrier),
    ] {
        pr(name, mode as usize);
    }
}
