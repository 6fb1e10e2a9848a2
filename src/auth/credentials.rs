//! Account credentials for the password grant

use std::fmt;

use crate::error::{ClientError, ClientResult};

/// Username and password for the identity service
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Account name
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Holds the credentials used to (re-)establish a session.
///
/// Performs no I/O after construction; the values never change.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    credentials: Credentials,
}

impl CredentialStore {
    /// Store explicit credentials. Blank values are rejected.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> ClientResult<Self> {
        let username = username.into();
        let password = password.into();

        if username.trim().is_empty() {
            return Err(ClientError::Validation("username must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(ClientError::Validation("password must not be empty".to_string()));
        }

        Ok(Self {
            credentials: Credentials {
                username: username.trim().to_string(),
                password,
            },
        })
    }

    /// Read credentials from two environment variables (conventionally
    /// `DS_USER` and `DS_PASS`).
    pub fn from_env(user_var: &str, pass_var: &str) -> ClientResult<Self> {
        let username = std::env::var(user_var).map_err(|_| {
            ClientError::Validation(format!("environment variable {user_var} is not set"))
        })?;
        let password = std::env::var(pass_var).map_err(|_| {
            ClientError::Validation(format!("environment variable {pass_var} is not set"))
        })?;
        Self::new(username, password)
    }

    /// The stored credentials
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}
