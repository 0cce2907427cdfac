use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Process-local holder of the current access token.
///
/// Never persisted. The epoch counter advances on every identity change
/// (login, register, logout) so that refresh results started under an older
/// identity can be recognised and discarded.
#[derive(Debug, Default)]
pub struct TokenStore {
    token: RwLock<Option<String>>,
    epoch: AtomicU64,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token, if any
    pub fn get(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the token unconditionally
    pub fn set(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn clear(&self) {
        self.set(None);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new identity epoch and return it
    pub fn advance_epoch(&self) -> u64 {
        // hold the write lock so no conditional write interleaves with the bump
        let _guard = self.token.write().unwrap_or_else(PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Write `token` only if the store is still in `epoch`.
    ///
    /// Returns whether the write happened.
    pub fn set_if_epoch(&self, epoch: u64, token: Option<String>) -> bool {
        let mut guard = self.token.write().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        *guard = token;
        true
    }
}
