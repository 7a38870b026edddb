//! Secret providers for executor credentials
//!
//! Executors receive resolved secrets at construction time. Two providers
//! exist: INLINE stores a value encrypted at rest (the cipher is a
//! collaborator behind [`SecretCipher`]); ENV references a process
//! environment variable whose name must match `^[A-Z][A-Z0-9_]*$`.

use crate::error::{PipelineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Where a secret's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretProvider {
    Inline,
    Env,
}

/// A stored secret definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretDefinition {
    pub code: String,
    pub provider: SecretProvider,
    /// INLINE: ciphertext. ENV: the environment variable name.
    pub value: String,
}

fn env_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("static pattern compiles"))
}

/// Validate a secret definition at save time
///
/// ENV names must match the uppercase identifier pattern; INLINE secrets may
/// not be created empty.
pub fn validate_secret(definition: &SecretDefinition) -> Result<()> {
    match definition.provider {
        SecretProvider::Env => {
            if !env_name_pattern().is_match(&definition.value) {
                return Err(PipelineError::Secret(format!(
                    "environment variable name '{}' must match ^[A-Z][A-Z0-9_]*$",
                    definition.value
                )));
            }
        }
        SecretProvider::Inline => {
            if definition.value.is_empty() {
                return Err(PipelineError::Secret(
                    "inline secret value must not be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Collaborator decrypting INLINE secret values
pub trait SecretCipher: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Identity cipher for development and tests
#[derive(Debug, Clone, Default)]
pub struct PlainCipher;

impl SecretCipher for PlainCipher {
    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

/// Resolves secret definitions to plaintext at executor construction time
pub struct SecretResolver<C: SecretCipher = PlainCipher> {
    cipher: C,
}

impl SecretResolver<PlainCipher> {
    pub fn new() -> Self {
        Self::with_cipher(PlainCipher)
    }
}

impl Default for SecretResolver<PlainCipher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: SecretCipher> SecretResolver<C> {
    pub fn with_cipher(cipher: C) -> Self {
        Self { cipher }
    }

    /// Resolve a secret to its plaintext value
    pub fn resolve(&self, definition: &SecretDefinition) -> Result<String> {
        validate_secret(definition)?;
        match definition.provider {
            SecretProvider::Inline => self.cipher.decrypt(&definition.value),
            SecretProvider::Env => std::env::var(&definition.value).map_err(|_| {
                PipelineError::Secret(format!(
                    "environment variable '{}' is not set",
                    definition.value
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(provider: SecretProvider, value: &str) -> SecretDefinition {
        SecretDefinition {
            code: "api-key".to_string(),
            provider,
            value: value.to_string(),
        }
    }

    #[test]
    fn env_names_are_validated() {
        assert!(validate_secret(&secret(SecretProvider::Env, "API_KEY_2")).is_ok());
        assert!(validate_secret(&secret(SecretProvider::Env, "api_key")).is_err());
        assert!(validate_secret(&secret(SecretProvider::Env, "2KEY")).is_err());
        assert!(validate_secret(&secret(SecretProvider::Env, "")).is_err());
    }

    #[test]
    fn empty_inline_value_rejected() {
        assert!(validate_secret(&secret(SecretProvider::Inline, "")).is_err());
        assert!(validate_secret(&secret(SecretProvider::Inline, "ciphertext")).is_ok());
    }

    #[test]
    fn resolve_env_secret() {
        std::env::set_var("DATAHUB_TEST_SECRET", "s3cr3t");
        let resolver = SecretResolver::new();
        let resolved = resolver
            .resolve(&secret(SecretProvider::Env, "DATAHUB_TEST_SECRET"))
            .unwrap();
        assert_eq!(resolved, "s3cr3t");

        assert!(resolver
            .resolve(&secret(SecretProvider::Env, "DATAHUB_TEST_UNSET"))
            .is_err());
    }

    #[test]
    fn resolve_inline_goes_through_cipher() {
        let resolver = SecretResolver::new();
        let resolved = resolver
            .resolve(&secret(SecretProvider::Inline, "opaque"))
            .unwrap();
        assert_eq!(resolved, "opaque");
    }
}
