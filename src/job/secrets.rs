//! Decryption of encrypted job properties.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::exec::Env;

/// Prefix of the environment variables holding decrypted secrets.
pub const SECRET_ENV_PREFIX: &str = "HAL_SECRET_";

/// Decrypts encrypted job properties.
pub trait EncryptedPropertyResolver {
    /// Returns the decrypted value of every property it could decrypt,
    /// keyed by property name. Missing entries signal failure.
    fn decrypt(&self, encrypted: &BTreeMap<String, String>) -> Env;
}

type Lookup = fn(&str) -> Option<String>;

/// Resolves secrets supplied to the agent as `HAL_SECRET_<NAME>`
/// environment variables, where `<NAME>` is the uppercased property name.
#[derive(Clone, Copy, Debug)]
pub struct EnvSecretResolver<F = Lookup> {
    lookup: F,
}

fn process_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl EnvSecretResolver {
    /// Reads secrets from the agent's own environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self {
            lookup: process_lookup,
        }
    }
}

impl<F: Fn(&str) -> Option<String>> EnvSecretResolver<F> {
    /// Reads secrets through `lookup`, which receives the full variable name.
    #[must_use]
    pub const fn with_lookup(lookup: F) -> Self {
        Self { lookup }
    }
}

impl<F: Fn(&str) -> Option<String>> EncryptedPropertyResolver for EnvSecretResolver<F> {
    fn decrypt(&self, encrypted: &BTreeMap<String, String>) -> Env {
        encrypted
            .keys()
            .filter_map(|name| {
                let variable = format!("{SECRET_ENV_PREFIX}{}", name.to_ascii_uppercase());
                (self.lookup)(&variable).map(|value| (name.clone(), value))
            })
            .collect()
    }
}

/// Decrypts every property in `encrypted`.
///
/// # Errors
///
/// Returns [`DecryptError::Incomplete`] when the resolver returns fewer
/// entries than were requested.
pub fn decrypt_all(
    resolver: &dyn EncryptedPropertyResolver,
    encrypted: &BTreeMap<String, String>,
) -> Result<Env, DecryptError> {
    let decrypted = resolver.decrypt(encrypted);
    let missing: Vec<String> = encrypted
        .keys()
        .filter(|name| !decrypted.contains_key(*name))
        .cloned()
        .collect();
    if decrypted.len() < encrypted.len() || !missing.is_empty() {
        return Err(DecryptError::Incomplete {
            requested: encrypted.len(),
            returned: decrypted.len(),
            missing,
        });
    }
    Ok(decrypted)
}

/// Errors raised while decrypting properties.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecryptError {
    /// Some properties could not be decrypted.
    #[error("decrypted {returned} of {requested} properties; missing: {}", .missing.join(", "))]
    Incomplete {
        /// Number of properties requested.
        requested: usize,
        /// Number of properties returned.
        returned: usize,
        /// Names that were not returned.
        missing: Vec<String>,
    },
}
