// Caller context: a per-thread stack of unit locations, pushed by
// scope guards and walked by the resolver to attribute traced calls.
//
// Each thread carries its own stack, so traces recorded from worker
// threads attribute against the scopes those threads entered.

use crate::domain::registry::UnitRegistry;
use crate::domain::unit::Unit;
use crate::errors::TraceError;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound on lookups during one caller resolution.
pub const MAX_WALK: usize = 1000;

thread_local! {
    static CALL_STACK: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());
}

/// RAII guard marking the current thread as executing inside a unit.
/// Dropping the guard pops the frame, so guards must be dropped in
/// reverse order of entry; holding them on the stack guarantees that.
pub struct UnitScope {
    // Keep the guard on the thread whose stack it pushed.
    _not_send: PhantomData<*const ()>,
}

impl UnitScope {
    #[must_use]
    pub fn enter(location: impl Into<PathBuf>) -> UnitScope {
        CALL_STACK.with(|stack| stack.borrow_mut().push(location.into()));
        UnitScope {
            _not_send: PhantomData,
        }
    }
}

impl Drop for UnitScope {
    fn drop(&mut self) {
        CALL_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Current depth of this thread's scope stack.
pub fn depth() -> usize {
    CALL_STACK.with(|stack| stack.borrow().len())
}

/// Resolve the unit responsible for the current call.
///
/// Walks the scope stack from the top, skipping `skip` frames first,
/// then skipping frames whose location is not indexed in the registry.
/// The nearest indexed frame wins. Running out of frames is
/// `CallerUnresolved`; spending more than [`MAX_WALK`] lookups without
/// exhausting the stack is `CallerWalkCeiling`.
pub fn resolve(registry: &UnitRegistry, skip: usize) -> Result<Arc<Unit>, TraceError> {
    CALL_STACK.with(|stack| {
        let stack = stack.borrow();
        if stack.len() <= skip {
            return Err(TraceError::CallerUnresolved { steps: 0 });
        }
        let mut idx = stack.len() - 1 - skip;
        let mut steps = 0;
        loop {
            steps += 1;
            if steps > MAX_WALK {
                return Err(TraceError::CallerWalkCeiling(MAX_WALK));
            }
            if let Some(unit) = registry.unit_at(&stack[idx]) {
                return Ok(unit);
            }
            if idx == 0 {
                return Err(TraceError::CallerUnresolved { steps });
            }
            idx -= 1;
        }
    })
}
