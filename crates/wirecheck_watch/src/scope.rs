//! Thread-local watch scope.
//!
//! Each thread carries its own scope, so concurrent watched calls never see
//! each other's correlation id. Scopes change only through [`ScopeGuard`],
//! which restores the previous scope when dropped, including during unwinding.

use std::cell::RefCell;
use wirecheck_core::CorrelationId;

/// What the current thread is observing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    /// No watched call is running
    #[default]
    Inactive,
    /// Commands belong to this correlation id
    Active(CorrelationId),
    /// Commands belong to nobody, and nested calls open no new scope
    Suppressed,
}

impl Scope {
    /// Whether a new top-level watched call may open a scope here
    #[must_use]
    pub const fn is_inactive(&self) -> bool {
        matches!(self, Self::Inactive)
    }

    /// The correlation id commands are tagged with, if any
    #[must_use]
    pub const fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Active(id) => Some(id),
            _ => None,
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Scope> = const { RefCell::new(Scope::Inactive) };
}

/// Scope of the current thread
#[must_use]
pub fn current() -> Scope {
    CURRENT.with(|scope| scope.borrow().clone())
}

/// Correlation id active on the current thread
#[must_use]
pub fn current_id() -> Option<CorrelationId> {
    CURRENT.with(|scope| scope.borrow().correlation_id().cloned())
}

/// Replace the current thread's scope until the guard drops
pub fn enter(scope: Scope) -> ScopeGuard {
    let previous = CURRENT.with(|current| current.replace(scope));
    ScopeGuard { previous: Some(previous) }
}

/// Restores the previous scope on drop
#[must_use = "the scope is restored as soon as the guard drops"]
#[derive(Debug)]
pub struct ScopeGuard {
    previous: Option<Scope>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|current| current.replace(previous));
        }
    }
}
