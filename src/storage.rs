//! Persisted login session using the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate), on
//! macOS the Keychain and on Linux the kernel keyring. The token never
//! touches the SQLite file.

use keyring::Entry;
use std::sync::Mutex;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{PosError, Result};
use crate::session::Session;

const SERVICE_NAME: &str = "canteen-pos";

// Credential keys
const KEY_AUTHORIZATION: &str = "authorization";
const KEY_CANTEEN_ID: &str = "canteen_id";
const KEY_CANTEEN_NAME: &str = "canteen_name";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_AUTHORIZATION, KEY_CANTEEN_ID, KEY_CANTEEN_NAME];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential. Returns `None` when the entry does not
/// exist or the platform store cannot be read.
fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

fn set_credential(key: &str, value: &str) -> Result<()> {
    let entry =
        Entry::new(SERVICE_NAME, key).map_err(|e| PosError::Credential(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| PosError::Credential(e.to_string()))
}

/// Delete a credential. Silently succeeds if the entry does not exist.
fn delete_credential(key: &str) -> Result<()> {
    let entry =
        Entry::new(SERVICE_NAME, key).map_err(|e| PosError::Credential(e.to_string()))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(PosError::Credential(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// Persist the session so the next launch starts logged in.
pub fn save_session(session: &Session) -> Result<()> {
    set_credential(KEY_AUTHORIZATION, session.token())?;
    set_credential(KEY_CANTEEN_ID, &session.canteen_id().to_string())?;
    set_credential(KEY_CANTEEN_NAME, session.canteen_name())?;
    info!(canteen_id = session.canteen_id(), "session persisted");
    Ok(())
}

/// Load the persisted session. A stored token means "logged in".
pub fn load_session() -> Option<Session> {
    let token = Zeroizing::new(get_credential(KEY_AUTHORIZATION)?);
    let canteen_id = get_credential(KEY_CANTEEN_ID);
    let canteen_name = get_credential(KEY_CANTEEN_NAME).unwrap_or_default();
    session_from_parts(&token, canteen_id.as_deref(), &canteen_name)
}

/// Delete every stored credential (logout).
pub fn clear_session() -> Result<()> {
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    info!("persisted session cleared");
    Ok(())
}

// ---------------------------------------------------------------------------
// Credential stores
// ---------------------------------------------------------------------------

/// Where the login session outlives the process.
pub trait CredentialStore: Send + Sync {
    fn save(&self, session: &Session) -> Result<()>;
    fn load(&self) -> Option<Session>;
    fn clear(&self) -> Result<()>;
}

/// The OS credential store.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl CredentialStore for KeyringStore {
    fn save(&self, session: &Session) -> Result<()> {
        save_session(session)
    }

    fn load(&self) -> Option<Session> {
        load_session()
    }

    fn clear(&self) -> Result<()> {
        clear_session()
    }
}

/// Keeps the session for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryStore {
    session: Mutex<Option<Session>>,
}

impl CredentialStore for MemoryStore {
    fn save(&self, session: &Session) -> Result<()> {
        *self.session.lock()? = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn clear(&self) -> Result<()> {
        self.session.lock()?.take();
        Ok(())
    }
}

/// Rebuild a session from stored strings. The canteen id may have been
/// written JSON-encoded (`"3"`), so surrounding quotes are tolerated.
fn session_from_parts(token: &str, canteen_id: Option<&str>, canteen_name: &str) -> Option<Session> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    let canteen_id = match canteen_id
        .map(|raw| raw.trim().trim_matches('"'))
        .map(str::parse::<i64>)
    {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            warn!(error = %e, "stored canteen id is not a number");
            return None;
        }
        None => {
            warn!("stored session has no canteen id");
            return None;
        }
    };
    Some(Session::new(token, canteen_id, canteen_name))
}
