//! Credentials and the access-token lifecycle
//!
//! [`CredentialStore`] holds the account used for the password grant and
//! performs no I/O. [`TokenManager`] turns it into bearer tokens, refreshing
//! them before expiry and re-authenticating when a refresh is refused.

pub mod credentials;
pub mod token;

pub use credentials::{CredentialStore, Credentials};
pub use token::{TokenManager, TokenPair};
