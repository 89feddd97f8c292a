//! Execution context identity
//!
//! A context is an isolated unit of execution. Memory and namespace
//! isolation are provided by the host runtime; here a context is only an
//! identity that links are created between.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Whether a context is the privileged supervisor or an application task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Supervisor,
    Task,
}

/// Identity of an execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    id: ContextId,
    name: String,
    kind: ContextKind,
}

impl Context {
    /// Create the identity of a supervisor context
    pub fn supervisor(name: impl Into<String>) -> Self {
        Self::new(name, ContextKind::Supervisor)
    }

    /// Create the identity of an application task context
    pub fn task(name: impl Into<String>) -> Self {
        Self::new(name, ContextKind::Task)
    }

    fn new(name: impl Into<String>, kind: ContextKind) -> Self {
        Self {
            id: ContextId::next(),
            name: name.into(),
            kind,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn is_supervisor(&self) -> bool {
        self.kind == ContextKind::Supervisor
    }
}

impl From<&Context> for ContextId {
    fn from(context: &Context) -> Self {
        context.id()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_unique() {
        let a = Context::task("a");
        let b = Context::task("a");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_context_kind() {
        assert!(Context::supervisor("ams").is_supervisor());
        assert!(!Context::task("app").is_supervisor());
    }
}
