use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

use super::TokenPair;

/// Keychain service name
const SERVICE_NAME: &str = "commitments";

/// Keychain account under which the token pair is stored
const KEYRING_ACCOUNT: &str = "session-tokens";

/// Credential file name in cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Persistence for the current token pair.
///
/// Implementations keep an in-memory copy so reads never fail; `save` and
/// `clear` write through to the backing storage and replace both tokens as a
/// unit. Storage that cannot be opened is reported by the constructor, not
/// later.
pub trait CredentialStore: Send + Sync {
    /// Replace the stored pair
    fn save(&self, tokens: &TokenPair) -> Result<()>;

    /// Remove the stored pair. Safe to call when already empty.
    fn clear(&self) -> Result<()>;

    /// Current pair, if any
    fn tokens(&self) -> Option<TokenPair>;

    fn access_token(&self) -> Option<String> {
        self.tokens().map(|t| t.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens().map(|t| t.refresh_token)
    }
}

fn read_slot(slot: &RwLock<Option<TokenPair>>) -> Option<TokenPair> {
    match slot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_slot(slot: &RwLock<Option<TokenPair>>) -> std::sync::RwLockWriteGuard<'_, Option<TokenPair>> {
    match slot.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<TokenPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            slot: RwLock::new(Some(tokens)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, tokens: &TokenPair) -> Result<()> {
        *write_slot(&self.slot) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *write_slot(&self.slot) = None;
        Ok(())
    }

    fn tokens(&self) -> Option<TokenPair> {
        read_slot(&self.slot)
    }
}

/// Decode a persisted pair; a blank token means the storage is corrupt
fn parse_stored_pair(contents: &str) -> Result<TokenPair> {
    let tokens: TokenPair = serde_json::from_str(contents).context("Failed to parse tokens")?;
    tokens
        .validate()
        .ok_or_else(|| anyhow::anyhow!("Stored token pair contains an empty token"))
}

// ============================================================================
// JSON file
// ============================================================================

/// Token pair persisted as a JSON document in the cache directory.
pub struct FileCredentialStore {
    path: PathBuf,
    slot: RwLock<Option<TokenPair>>,
}

impl FileCredentialStore {
    /// Open the store in `cache_dir`, loading any previously saved pair
    pub fn open(cache_dir: &Path) -> Result<Self> {
        let path = cache_dir.join(CREDENTIALS_FILE);
        let tokens = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read credential file {}", path.display()))?;
            Some(parse_stored_pair(&contents).context("Invalid credential file")?)
        } else {
            None
        };

        debug!(path = %path.display(), loaded = tokens.is_some(), "Opened file credential store");
        Ok(Self {
            path,
            slot: RwLock::new(tokens),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, tokens: &TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create credential directory")?;
        }
        let contents = serde_json::to_string_pretty(tokens)?;

        // Write a sibling then rename so the pair on disk is replaced whole
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write credential file")?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace credential file")?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict credential file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, tokens: &TokenPair) -> Result<()> {
        let mut slot = write_slot(&self.slot);
        self.write_file(tokens)?;
        *slot = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = write_slot(&self.slot);
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to delete credential file")?;
        }
        *slot = None;
        Ok(())
    }

    fn tokens(&self) -> Option<TokenPair> {
        read_slot(&self.slot)
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Token pair stored as a single JSON secret in the OS keychain.
pub struct KeyringCredentialStore {
    entry: Entry,
    slot: RwLock<Option<TokenPair>>,
}

impl KeyringCredentialStore {
    pub fn open() -> Result<Self> {
        let entry = Entry::new(SERVICE_NAME, KEYRING_ACCOUNT)
            .context("Failed to create keyring entry")?;

        let tokens = match entry.get_password() {
            Ok(secret) => Some(parse_stored_pair(&secret).context("Invalid keychain entry")?),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                return Err(e).context("Failed to retrieve tokens from keychain");
            }
        };

        debug!(loaded = tokens.is_some(), "Opened keychain credential store");
        Ok(Self {
            entry,
            slot: RwLock::new(tokens),
        })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, tokens: &TokenPair) -> Result<()> {
        let mut slot = write_slot(&self.slot);
        let secret = serde_json::to_string(tokens)?;
        self.entry
            .set_password(&secret)
            .context("Failed to store tokens in keychain")?;
        *slot = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = write_slot(&self.slot);
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(e).context("Failed to delete tokens from keychain"),
        }
        *slot = None;
        Ok(())
    }

    fn tokens(&self) -> Option<TokenPair> {
        read_slot(&self.slot)
    }
}
