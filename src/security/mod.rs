//! User identity and credential verification

pub mod credentials;

pub use credentials::{CredentialStore, Registration, User, DEFAULT_PROFILE_SUMMARY};
