//! Git credentials with memory-safe handling and masking
//!
//! The password (usually a personal access token) lives in a
//! [`SecretString`] so it never shows up in `Debug` output or logs.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Username and password used for both HTTPS git access and the release API
pub struct GitCredentials {
    username: String,
    password: SecretString,
}

impl GitCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into().into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// `Basic <base64(username:password)>`, as git's `http.extraHeader` expects
    pub fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password.expose_secret());
        format!("Basic {}", base64::encode(raw))
    }

    /// Every string derived from the password that may leak into tool output
    pub fn redactions(&self) -> Vec<String> {
        let password = self.password.expose_secret();
        if password.is_empty() {
            return Vec::new();
        }
        let encoded = self
            .basic_auth_header()
            .trim_start_matches("Basic ")
            .to_string();
        vec![password.to_string(), encoded]
    }

    /// Mask the password wherever it appears in `text`
    pub fn mask_in(&self, text: &str) -> String {
        let redactions = self.redactions();
        let secrets: Vec<&str> = redactions.iter().map(String::as_str).collect();
        mask_secrets_in(text, &secrets)
    }
}

impl Clone for GitCredentials {
    fn clone(&self) -> Self {
        Self {
            username: self.username.clone(),
            password: SecretString::new(self.password.expose_secret().into()),
        }
    }
}

impl fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("password", &mask_token(self.password.expose_secret()))
            .finish()
    }
}

/// Masks a token for safe logging
///
/// Shows only the first 3 and last 3 characters. Tokens shorter than 10
/// characters are fully masked as "****".
pub fn mask_token(token: &str) -> String {
    if token.len() < 10 || !token.is_char_boundary(3) || !token.is_char_boundary(token.len() - 3)
    {
        return "****".to_string();
    }

    let prefix = &token[..3];
    let suffix = &token[token.len() - 3..];
    format!("{}...{}", prefix, suffix)
}

/// Replace every occurrence of each secret in `text` with its masked form
pub fn mask_secrets_in(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|secret| !secret.is_empty())
        .fold(text.to_string(), |masked, secret| {
            masked.replace(secret, &mask_token(secret))
        })
}
