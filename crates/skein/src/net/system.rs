use std::sync::atomic::{AtomicUsize, Ordering};

use super::error::TransportError;

static SYSTEM_USERS: AtomicUsize = AtomicUsize::new(0);

/// Must be called before any transport is constructed. Calls nest: every
/// `initialize_system` needs a matching [`close_system`].
pub fn initialize_system() {
    if SYSTEM_USERS.fetch_add(1, Ordering::SeqCst) == 0 {
        log::debug!("Network system initialized");
    }
}

pub fn close_system() {
    let previous = SYSTEM_USERS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |users| {
            users.checked_sub(1)
        })
        .unwrap_or(0);

    match previous {
        0 => log::warn!("close_system called without a matching initialize_system"),
        1 => log::debug!("Network system closed"),
        _ => {}
    }
}

pub fn is_initialized() -> bool {
    SYSTEM_USERS.load(Ordering::SeqCst) > 0
}

pub(crate) fn ensure_initialized() -> Result<(), TransportError> {
    if is_initialized() {
        Ok(())
    } else {
        Err(TransportError::NotInitialized)
    }
}
