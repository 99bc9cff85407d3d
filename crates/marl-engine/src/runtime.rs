//! The runtime instance
//!
//! All execution state lives on one [`Runtime`] value threaded through
//! every entry point: the reified call stack, the catch-context chain,
//! the exception slot, the privilege ceilings, and the forbid flag.
//! Nothing is process-wide, so each test owns a fresh runtime and the
//! suite stays deterministic.
//!
//! The runtime is single-threaded by design: no entry point is safe to
//! invoke from a second thread, and none of this state is locked.

use rustc_hash::FxHashMap;

use crate::builtins;
use crate::call_stack::{CallFrame, CallTrace};
use crate::error::{Exception, Seclevel};
use crate::gc::Heap;
use crate::object::OpDescriptor;
use crate::protect::CatchContext;
use crate::value::{GcRef, Value};

/// Tunables fixed at runtime construction
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Privilege of code entering from the outside without crossing a
    /// script frame; secure primitives above this level are unreachable
    /// from the host
    pub default_seclevel: Seclevel,
    /// Floor below which closures are reported by
    /// [`crate::callable::minlevel_violator`]
    pub minlevel: Seclevel,
    /// Collect at every allocation site (test mode)
    pub gc_stress: bool,
    /// Allocations between collections when not stressed
    pub gc_threshold: usize,
    /// Value-stack depth limit
    pub max_value_stack: usize,
    /// Reified call-stack depth limit
    pub max_call_depth: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            default_seclevel: 0,
            minlevel: 0,
            gc_stress: false,
            gc_threshold: 4096,
            max_value_stack: 64 * 1024,
            max_call_depth: 1024,
        }
    }
}

/// Per-session privilege state, present only while a session is active
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// Ceiling above which secure primitives fail with a security
    /// violation for the duration of the session
    pub maxseclevel: Seclevel,
}

/// A single-threaded runtime instance
pub struct Runtime {
    pub(crate) heap: Heap,
    /// Shared interpreter value stack; the dispatcher pushes arguments
    /// here and reads results off its top
    pub(crate) value_stack: Vec<Value>,
    /// Reified call stack, most recent frame last
    pub(crate) call_stack: Vec<CallFrame>,
    /// Installed catch contexts, innermost last
    pub(crate) catch_stack: Vec<CatchContext>,
    /// The single exception slot
    pub(crate) exception: Option<Exception>,
    /// Diagnostic accompanying the pending exception, when one was built
    pub(crate) error_message: Option<String>,
    /// Trace captured by the most recent unwound catch
    pub(crate) last_trace: Option<CallTrace>,
    pub(crate) session: Option<Session>,
    /// When set, names the primitive forbidding script calls; dispatching
    /// any non-primitive callee is then fatal
    pub(crate) forbid_script_calls: Option<&'static str>,
    registry: FxHashMap<&'static str, Value>,
    pub(crate) options: RuntimeOptions,
}

impl Runtime {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// Create a runtime with the given options. The core primitives
    /// (`setjmp`, `longjmp`, `apply`) are registered up front.
    pub fn with_options(options: RuntimeOptions) -> Self {
        let mut rt = Runtime {
            heap: Heap::new(options.gc_threshold, options.gc_stress),
            value_stack: Vec::new(),
            call_stack: Vec::new(),
            catch_stack: Vec::new(),
            exception: None,
            error_message: None,
            last_trace: None,
            session: None,
            forbid_script_calls: None,
            registry: FxHashMap::default(),
            options,
        };
        builtins::register_builtins(&mut rt);
        rt
    }

    /// The options this runtime was built with
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    // ----- sessions and privilege -----

    /// Activate a session context; its `maxseclevel` gates secure
    /// primitives until [`Runtime::clear_session`]
    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Deactivate the session context
    pub fn clear_session(&mut self) {
        self.session = None;
    }

    /// The active session, if any
    pub fn session(&self) -> Option<Session> {
        self.session
    }

    // ----- forbid flag -----

    /// Name of the primitive currently forbidding script calls, if any
    pub fn forbid_script_calls(&self) -> Option<&'static str> {
        self.forbid_script_calls
    }

    /// Set or clear the forbid flag. Never cleared implicitly: a leaf
    /// primitive that sets it owns clearing it.
    pub fn set_forbid_script_calls(&mut self, name: Option<&'static str>) {
        self.forbid_script_calls = name;
    }

    // ----- primitive registry -----

    /// Allocate and register a primitive for a static descriptor. The
    /// primitive is permanently rooted and resolvable by name.
    pub fn register_primitive(&mut self, op: &'static OpDescriptor) -> Value {
        let prim = self.alloc_primitive(op);
        self.add_global_root(prim);
        self.registry.insert(op.name, prim);
        prim
    }

    /// Resolve a registered primitive by name
    pub fn lookup_primitive(&self, name: &str) -> Option<Value> {
        self.registry.get(name).copied()
    }

    // ----- exception slot -----

    /// Is an exception pending (set by a failure, not yet consumed)?
    pub fn has_pending_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// The pending exception, if any
    pub fn pending_exception(&self) -> Option<Exception> {
        self.exception
    }

    /// Diagnostic message accompanying the pending exception, if one was
    /// built
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Trace captured by the most recent unwound catch, if its trace mode
    /// said to capture one
    pub fn last_trace(&self) -> Option<&CallTrace> {
        self.last_trace.as_ref()
    }

    // ----- introspection -----

    /// Depth of the reified call stack
    pub fn call_stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Depth of the catch-context chain
    pub fn catch_depth(&self) -> usize {
        self.catch_stack.len()
    }

    /// Depth of the shared value stack
    pub fn value_stack_depth(&self) -> usize {
        self.value_stack.len()
    }

    /// Elements of a vector value. Panics if `v` is not a vector.
    pub fn vector_elems(&self, v: Value) -> &[Value] {
        let r = v.as_ref().expect("not a heap value");
        self.heap.vector(r)
    }

    /// Length of a vector value. Panics if `v` is not a vector.
    pub fn vector_len(&self, v: Value) -> usize {
        self.vector_elems(v).len()
    }

    /// Read a vector element. Panics if `v` is not a vector or the index
    /// is out of bounds.
    pub fn vector_get(&self, v: Value, idx: usize) -> Value {
        self.vector_elems(v)[idx]
    }

    /// Write a vector element. Panics if `v` is not a vector or the index
    /// is out of bounds.
    pub fn vector_set(&mut self, v: Value, idx: usize, val: Value) {
        let r = v.as_ref().expect("not a heap value");
        self.heap.vector_mut(r)[idx] = val;
    }

    /// A closure's capture vector (or null for capture-free closures).
    /// Panics if `v` is not a closure.
    pub fn closure_env(&self, v: Value) -> Value {
        let r = v.as_ref().expect("not a heap value");
        self.heap.closure(r).env
    }

    /// Contents of a string value. Panics if `v` is not a string.
    pub fn str_value(&self, v: Value) -> &str {
        let r = v.as_ref().expect("not a heap value");
        match self.heap.get(r) {
            crate::object::HeapValue::Str(s) => s,
            other => panic!("expected string, found {:?}", other.kind()),
        }
    }

    /// A primitive's call counter. Panics if `v` is not a primitive.
    pub fn primitive_call_count(&self, v: Value) -> u64 {
        let r = v.as_ref().expect("not a heap value");
        self.heap.primitive(r).call_count
    }

    pub(crate) fn bump_call_count(&mut self, r: GcRef) {
        self.heap.primitive_mut(r).call_count += 1;
    }

    // ----- construction helpers -----

    /// Allocate a code object and a closure over it in one step,
    /// handling the rooting of constants and captures internally.
    pub fn new_closure(&mut self, code: crate::object::Code, captures: &[Value]) -> Value {
        let mut roots: Vec<Value> = code.constants.clone();
        roots.extend_from_slice(captures);
        self.with_roots(&roots, move |rt| {
            let code_v = rt.alloc_code(code);
            rt.with_roots(&[code_v], |rt| {
                let env = if captures.is_empty() {
                    Value::null()
                } else {
                    rt.alloc_vector_from(captures)
                };
                rt.alloc_closure(code_v, env)
            })
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_runtime_is_quiescent() {
        let rt = Runtime::new();
        assert_eq!(rt.call_stack_depth(), 0);
        assert_eq!(rt.catch_depth(), 0);
        assert!(!rt.has_pending_exception());
        assert!(rt.last_trace().is_none());
    }

    #[test]
    fn test_core_primitives_registered() {
        let rt = Runtime::new();
        assert!(rt.lookup_primitive("setjmp").is_some());
        assert!(rt.lookup_primitive("longjmp").is_some());
        assert!(rt.lookup_primitive("apply").is_some());
        assert!(rt.lookup_primitive("no-such").is_none());
    }

    #[test]
    fn test_session_toggling() {
        let mut rt = Runtime::new();
        assert!(rt.session().is_none());
        rt.set_session(Session { maxseclevel: 3 });
        assert_eq!(rt.session().unwrap().maxseclevel, 3);
        rt.clear_session();
        assert!(rt.session().is_none());
    }
}
