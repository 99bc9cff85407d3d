//! Reified call stack
//!
//! The runtime keeps its own record of every in-flight call, independent of
//! the host call stack, for diagnostics and unwinding. Frames form a strict
//! LIFO; the stack lives as a `Vec` on the [`crate::runtime::Runtime`] and a
//! saved "head" is a depth into it. A frame is popped on normal return;
//! on an unwind it is left in place so the catching [`crate::protect::mcatch`]
//! can harvest a trace before truncating back to its saved depth.
//!
//! Frames that enter native code carry a small inline argument buffer so a
//! collection during the call need not chase live references outside the
//! runtime. While an argument vector is being constructed, the constructing
//! frame's `nargs` is held at zero so a mid-construction collection never
//! scans partially-initialized slots.

use crate::object::MAX_PRIMITIVE_ARGS;
use crate::value::Value;

/// What kind of call a frame describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A bytecode closure running in the interpreter
    Interpreted,
    /// A native-compiled closure entered through the invoker ABI
    NativeClosure,
    /// A primitive running native code
    Primitive,
    /// A named host-level call site (pushed by the protected-call wrappers)
    NamedCall,
}

/// Payload of a named host-level frame
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct NamedFrame {
    /// The call-site name shown in traces
    pub name: &'static str,
    /// Live argument count; zeroed during argument-vector construction
    pub nargs: u32,
    /// Inline argument buffer, traced by the collector up to `nargs`
    pub args: [Value; MAX_PRIMITIVE_ARGS],
}

impl NamedFrame {
    /// Build a named frame holding up to [`MAX_PRIMITIVE_ARGS`] arguments
    pub fn new(name: &'static str, args: &[Value]) -> Self {
        let n = args.len().min(MAX_PRIMITIVE_ARGS);
        let mut buf = [Value::null(); MAX_PRIMITIVE_ARGS];
        buf[..n].copy_from_slice(&args[..n]);
        NamedFrame {
            name,
            nargs: n as u32,
            args: buf,
        }
    }
}

/// Payload of a primitive frame
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PrimitiveFrame {
    /// The primitive being run
    pub prim: Value,
    /// Live argument count
    pub nargs: u32,
    /// Inline argument buffer, traced by the collector up to `nargs`
    pub args: [Value; MAX_PRIMITIVE_ARGS],
}

impl PrimitiveFrame {
    /// Build a primitive frame holding up to [`MAX_PRIMITIVE_ARGS`]
    /// arguments
    pub fn new(prim: Value, args: &[Value]) -> Self {
        let n = args.len().min(MAX_PRIMITIVE_ARGS);
        let mut buf = [Value::null(); MAX_PRIMITIVE_ARGS];
        buf[..n].copy_from_slice(&args[..n]);
        PrimitiveFrame {
            prim,
            nargs: n as u32,
            args: buf,
        }
    }
}

/// One in-flight call
#[derive(Debug, Clone, Copy)]
pub enum CallFrame {
    /// Bytecode closure; its arguments live on the value stack
    Interpreted {
        /// The closure being interpreted
        closure: Value,
        /// Argument count
        nargs: u32,
    },
    /// Native-compiled closure
    NativeClosure {
        /// The closure being run
        closure: Value,
        /// Argument count
        nargs: u32,
    },
    /// Primitive call with inline argument buffer
    Primitive(PrimitiveFrame),
    /// Named host-level call site
    Named(NamedFrame),
}

impl CallFrame {
    /// The frame's kind tag
    pub fn kind(&self) -> FrameKind {
        match self {
            CallFrame::Interpreted { .. } => FrameKind::Interpreted,
            CallFrame::NativeClosure { .. } => FrameKind::NativeClosure,
            CallFrame::Primitive(_) => FrameKind::Primitive,
            CallFrame::Named(_) => FrameKind::NamedCall,
        }
    }

    /// Values this frame keeps alive, for the collector
    pub(crate) fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        let (fixed, buf): (&[Value], &[Value]) = match self {
            CallFrame::Interpreted { closure, .. } | CallFrame::NativeClosure { closure, .. } => {
                (std::slice::from_ref(closure), &[])
            }
            CallFrame::Primitive(p) => {
                (std::slice::from_ref(&p.prim), &p.args[..p.nargs as usize])
            }
            CallFrame::Named(n) => (&[], &n.args[..n.nargs as usize]),
        };
        fixed.iter().chain(buf.iter()).copied()
    }
}

/// One line of a captured diagnostic trace, innermost first
#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// Frame kind
    pub kind: FrameKind,
    /// Logical name, when one is known
    pub name: Option<String>,
    /// Argument count at the call site
    pub nargs: u32,
}

/// A diagnostic trace captured at a catch site
#[derive(Debug, Clone, Default)]
pub struct CallTrace {
    /// Entries, innermost call first
    pub entries: Vec<TraceEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_frame_truncates_to_buffer() {
        let args: Vec<Value> = (0..8).map(Value::int).collect();
        let f = NamedFrame::new("site", &args);
        assert_eq!(f.nargs as usize, MAX_PRIMITIVE_ARGS);
        assert_eq!(f.args[0].as_int(), Some(0));
        assert_eq!(f.args[MAX_PRIMITIVE_ARGS - 1].as_int(), Some(4));
    }

    #[test]
    fn test_frame_roots() {
        let prim = Value::int(0); // placeholder handle shape is irrelevant here
        let frame = CallFrame::Primitive(PrimitiveFrame::new(prim, &[Value::int(1), Value::int(2)]));
        let roots: Vec<Value> = frame.roots().collect();
        assert_eq!(roots.len(), 3);
    }
}
