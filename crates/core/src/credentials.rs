//! Credential resolution
//!
//! Turns the authentication settings of an [`HttpConfig`] into the material
//! attached to every request. Resolution only touches the local filesystem,
//! so a broken setup is reported before any connection is opened.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{AuthSettings, HttpConfig, ObjectStoreSettings};
use crate::error::{Error, Result};
use crate::uri::Authority;

/// How requests authenticate against the server
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// `Authorization: Bearer <token>` on every request
    Bearer(String),
    /// Mutual TLS with a client certificate and its private key
    ClientCertificate { cert: PathBuf, key: PathBuf },
    None,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer(_) => f.write_str("Bearer(****)"),
            Auth::ClientCertificate { cert, key } => f
                .debug_struct("ClientCertificate")
                .field("cert", cert)
                .field("key", key)
                .finish(),
            Auth::None => f.write_str("None"),
        }
    }
}

/// Static keys used to sign object-store requests
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"****")
            .field("session_token", &self.session_token.as_ref().map(|_| "****"))
            .field("region", &self.region)
            .finish()
    }
}

/// Everything needed to authenticate requests to one authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialMaterial {
    pub auth: Auth,
    pub ca_bundle: Option<PathBuf>,
    pub signing: Option<SigningKeys>,
}

impl CredentialMaterial {
    pub fn anonymous() -> Self {
        Self {
            auth: Auth::None,
            ca_bundle: None,
            signing: None,
        }
    }

    pub fn bearer_token(&self) -> Option<&str> {
        match &self.auth {
            Auth::Bearer(token) => Some(token),
            _ => None,
        }
    }

    pub fn client_certificate(&self) -> Option<(&Path, &Path)> {
        match &self.auth {
            Auth::ClientCertificate { cert, key } => Some((cert, key)),
            _ => None,
        }
    }
}

/// Resolves [`CredentialMaterial`] from immutable settings
#[derive(Debug, Clone, Default)]
pub struct CredentialProvider {
    auth: AuthSettings,
    object_store: ObjectStoreSettings,
}

impl CredentialProvider {
    pub fn new(auth: AuthSettings, object_store: ObjectStoreSettings) -> Self {
        Self { auth, object_store }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(config.auth.clone(), config.object_store.clone())
    }

    /// Resolve the material for `authority`
    ///
    /// A bearer token wins over a client certificate. A certificate needs
    /// its key and the other way around. Every configured file must exist.
    pub fn resolve(&self, authority: &Authority) -> Result<CredentialMaterial> {
        let ca_bundle = match &self.auth.ca_bundle {
            Some(path) => Some(require_file(path, "CA bundle")?),
            None => None,
        };

        let certificate = match (&self.auth.client_cert, &self.auth.client_key) {
            (Some(cert), Some(key)) => {
                let cert = require_file(cert, "client certificate")?;
                let key = require_file(key, "client key")?;
                check_private(&key, "client key")?;
                Some((cert, key))
            }
            (Some(cert), None) => {
                return Err(Error::AuthConfiguration(format!(
                    "client certificate {} is configured without a client key",
                    cert.display()
                )));
            }
            (None, Some(key)) => {
                return Err(Error::AuthConfiguration(format!(
                    "client key {} is configured without a client certificate",
                    key.display()
                )));
            }
            (None, None) => None,
        };

        let auth = match (&self.auth.bearer_token, certificate) {
            (Some(value), _) => Auth::Bearer(read_bearer_token(value)?),
            (None, Some((cert, key))) => Auth::ClientCertificate { cert, key },
            (None, None) => {
                tracing::warn!(
                    authority = %authority,
                    "No bearer token or client certificate configured; requests are unauthenticated"
                );
                Auth::None
            }
        };

        Ok(CredentialMaterial {
            auth,
            ca_bundle,
            signing: self.signing_keys(),
        })
    }

    fn signing_keys(&self) -> Option<SigningKeys> {
        let store = &self.object_store;
        match (&store.access_key_id, &store.secret_access_key) {
            (Some(id), Some(secret)) => Some(SigningKeys {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
                session_token: store.session_token.clone(),
                region: store.region.clone(),
            }),
            _ => None,
        }
    }
}

/// The configured value is either a path to a token file or the token itself
fn read_bearer_token(value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::AuthConfiguration("bearer token is empty".into()));
    }

    let path = Path::new(value);
    let token = if path.is_file() {
        check_private(path, "bearer token file")?;
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::AuthConfiguration(format!("cannot read token file {}: {e}", path.display()))
        })?;
        contents.trim_end_matches(['\r', '\n']).trim().to_string()
    } else {
        value.to_string()
    };

    if token.is_empty() {
        return Err(Error::AuthConfiguration(format!(
            "bearer token file {value} is empty"
        )));
    }
    Ok(token)
}

fn require_file(path: &Path, what: &str) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(Error::AuthConfiguration(format!(
            "{what} {} does not exist or is not a file",
            path.display()
        )))
    }
}

/// Secrets must not be accessible by group or others
#[cfg(unix)]
fn check_private(path: &Path, what: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)
        .map_err(|e| Error::AuthConfiguration(format!("cannot stat {what} {}: {e}", path.display())))?
        .permissions()
        .mode();
    if mode & 0o077 != 0 {
        return Err(Error::AuthConfiguration(format!(
            "{what} {} must only be accessible by its owner (mode {:o})",
            path.display(),
            mode & 0o777
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_private(_path: &Path, _what: &str) -> Result<()> {
    Ok(())
}
