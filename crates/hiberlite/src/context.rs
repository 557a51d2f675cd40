//! Thread-bound current sessions.
//!
//! Each thread holds at most one session per factory. A session stays bound
//! until it is committed or rolled back through the factory, or until the
//! thread exits (dropping the session releases its connection).
//!
//! While a closure runs against the current session, the binding is marked
//! in use. Re-entering the context for the same factory from inside that
//! closure fails instead of opening a second session.

use std::cell::RefCell;
use std::collections::HashMap;

use hiberlite_core::{Error, Result};
use hiberlite_session::Session;

enum Binding {
    Idle(Session),
    InUse,
}

thread_local! {
    static CURRENT: RefCell<HashMap<u64, Binding>> = RefCell::new(HashMap::new());
}

fn in_use() -> Error {
    Error::Transaction("the current session is already in use on this thread".to_string())
}

/// Clears an in-use marker that was never replaced by the session, e.g. when
/// opening failed or the closure panicked.
struct InUseMarker(u64);

impl Drop for InUseMarker {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|c| {
            let mut map = c.borrow_mut();
            if matches!(map.get(&self.0), Some(Binding::InUse)) {
                map.remove(&self.0);
            }
        });
    }
}

/// Run `f` with the session bound to `factory` on this thread, opening and
/// binding one first if needed.
///
/// Fails if `f` for the same factory is already running on this thread.
pub(crate) fn with_current<R>(
    factory: u64,
    open: impl FnOnce() -> Result<Session>,
    f: impl FnOnce(&mut Session) -> Result<R>,
) -> Result<R> {
    let bound = CURRENT.with(|c| match c.borrow_mut().insert(factory, Binding::InUse) {
        Some(Binding::InUse) => Err(in_use()),
        Some(Binding::Idle(session)) => Ok(Some(session)),
        None => Ok(None),
    })?;
    let _marker = InUseMarker(factory);

    let mut session = match bound {
        Some(session) => session,
        None => {
            tracing::debug!(factory, "Binding new session to current thread");
            open()?
        }
    };
    let result = f(&mut session);
    CURRENT.with(|c| c.borrow_mut().insert(factory, Binding::Idle(session)));
    result
}

/// Remove the session bound to `factory` on this thread.
///
/// Fails while the session is in use.
pub(crate) fn unbind(factory: u64) -> Result<Option<Session>> {
    CURRENT.with(|c| {
        let mut map = c.borrow_mut();
        if matches!(map.get(&factory), Some(Binding::InUse)) {
            return Err(in_use());
        }
        Ok(match map.remove(&factory) {
            Some(Binding::Idle(session)) => Some(session),
            Some(Binding::InUse) | None => None,
        })
    })
}

/// Whether a session is bound to `factory` on this thread.
pub(crate) fn is_bound(factory: u64) -> bool {
    CURRENT.with(|c| c.borrow().contains_key(&factory))
}
