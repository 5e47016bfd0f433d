//! Per-login session state
//!
//! Caches one decrypted private key for the lifetime of a login, tracks
//! the init status, and carries the administrative decrypt-all override.
//! Nothing here is ever written to durable storage.

use crate::{KeyError, Result};
use parking_lot::Mutex;
use sharekey_crypto::PrivateKey;

/// Outcome of the login-time key initialization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    #[default]
    NotInitialized = 0,
    InitExecuted = 1,
    InitSuccessful = 2,
    InitFailed = 3,
}

#[derive(Default)]
struct DecryptAll {
    uid: String,
    key: Option<PrivateKey>,
}

#[derive(Default)]
struct SessionState {
    status: SessionStatus,
    private_key: Option<PrivateKey>,
    decrypt_all: Option<DecryptAll>,
}

/// Session state for one login
#[derive(Default)]
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.state.lock().status = status;
    }

    /// Cache the decrypted private key of the logged-in principal
    pub fn set_private_key(&self, key: PrivateKey) {
        self.state.lock().private_key = Some(key);
    }

    /// The cached private key
    pub fn private_key(&self) -> Result<PrivateKey> {
        self.state
            .lock()
            .private_key
            .clone()
            .ok_or(KeyError::SessionKeyMissing)
    }

    pub fn is_private_key_set(&self) -> bool {
        self.state.lock().private_key.is_some()
    }

    /// Enter decrypt-all mode for `uid`
    pub fn prepare_decrypt_all(&self, uid: &str, key: Option<PrivateKey>) {
        self.state.lock().decrypt_all = Some(DecryptAll {
            uid: uid.to_string(),
            key,
        });
    }

    pub fn decrypt_all_mode_activated(&self) -> bool {
        self.state.lock().decrypt_all.is_some()
    }

    /// User whose files are decrypted in decrypt-all mode
    pub fn decrypt_all_uid(&self) -> Result<String> {
        let state = self.state.lock();
        let decrypt_all = state.decrypt_all.as_ref().ok_or(KeyError::DecryptAllNotActivated)?;
        if decrypt_all.uid.is_empty() {
            return Err(KeyError::DecryptAllStateInvalid("uid"));
        }
        Ok(decrypt_all.uid.clone())
    }

    /// Private key used in decrypt-all mode
    pub fn decrypt_all_key(&self) -> Result<PrivateKey> {
        let state = self.state.lock();
        let decrypt_all = state.decrypt_all.as_ref().ok_or(KeyError::DecryptAllNotActivated)?;
        decrypt_all
            .key
            .clone()
            .ok_or(KeyError::DecryptAllStateInvalid("private key"))
    }

    /// Drop every cached value at once
    pub fn clear(&self) {
        *self.state.lock() = SessionState::default();
    }
}
