use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Credential produced by a successful device-authorization flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Whether the access token has passed its absolute expiry.
    /// Credentials without an expiry are treated as valid.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| expires_at <= Utc::now())
            .unwrap_or(false)
    }
}

/// Storage abstraction for persisted credentials, keyed by
/// provider/account.
pub trait CredentialStore: Send + Sync {
    fn load(&self, provider: &str, account: &str) -> Result<Option<Credential>, AuthError>;
    fn save(&self, provider: &str, account: &str, credential: &Credential)
        -> Result<(), AuthError>;
    fn clear(&self, provider: &str, account: &str) -> Result<(), AuthError>;
}

/// File-backed credential store using TOML files.
///
/// # Example
/// ```no_run
/// use portcullis::store::{Credential, CredentialStore, FileCredentialStore};
///
/// let store = FileCredentialStore::new_default();
/// let credential = Credential {
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     expires_at: None,
/// };
/// store.save("gemini", "default", &credential)?;
/// # Ok::<(), portcullis::error::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn new_default() -> Self {
        Self {
            base_dir: default_credential_dir(),
        }
    }

    fn credential_path(&self, provider: &str, account: &str) -> PathBuf {
        let provider = normalize_label(provider);
        let account = normalize_label(account);
        let name = if account == "default" {
            format!("{provider}.toml")
        } else {
            format!("{provider}.{account}.toml")
        };
        self.base_dir.join(name)
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, provider: &str, account: &str) -> Result<Option<Credential>, AuthError> {
        let path = self.credential_path(provider, account);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: CredentialFile = toml::from_str(&raw)?;
        Ok(Some(file.credential))
    }

    fn save(
        &self,
        provider: &str,
        account: &str,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        let path = self.credential_path(provider, account);
        Self::ensure_parent(&path)?;
        let file = CredentialFile {
            version: 1,
            provider: provider.to_string(),
            account: account.to_string(),
            credential: credential.clone(),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self, provider: &str, account: &str) -> Result<(), AuthError> {
        let path = self.credential_path(provider, account);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    provider: String,
    account: String,
    credential: Credential,
    saved_at: DateTime<Utc>,
}

fn default_credential_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".portcullis"))
        .unwrap_or_else(|| PathBuf::from(".portcullis"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileCredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    fn sample_credential() -> Credential {
        Credential {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: None,
        }
    }

    #[test]
    fn credential_round_trip_works() {
        let (_dir, store) = temp_store();
        store.save("gemini", "default", &sample_credential()).unwrap();
        let loaded = store.load("gemini", "default").unwrap().unwrap();
        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
    }

    #[test]
    fn missing_credential_loads_as_none() {
        let (_dir, store) = temp_store();
        assert!(store.load("gemini", "default").unwrap().is_none());
    }

    #[test]
    fn clear_removes_credential_and_is_idempotent() {
        let (_dir, store) = temp_store();
        store.save("gemini", "default", &sample_credential()).unwrap();
        store.clear("gemini", "default").unwrap();
        assert!(store.load("gemini", "default").unwrap().is_none());
        store.clear("gemini", "default").unwrap();
    }

    #[test]
    fn non_default_account_gets_its_own_file() {
        let (_dir, store) = temp_store();
        store.save("gemini", "work", &sample_credential()).unwrap();
        assert!(store.load("gemini", "default").unwrap().is_none());
        assert!(store.load("gemini", "work").unwrap().is_some());
    }

    #[test]
    fn labels_are_normalized_for_paths() {
        let (_dir, store) = temp_store();
        store
            .save("Gemini Cloud!", "default", &sample_credential())
            .unwrap();
        assert!(store.load("gemini-cloud-", "default").unwrap().is_some());
    }

    #[test]
    fn expiry_is_checked_against_now() {
        let mut credential = sample_credential();
        assert!(!credential.is_expired());
        credential.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(credential.is_expired());
        credential.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!credential.is_expired());
    }
}
