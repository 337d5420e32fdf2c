//! Credential resolution for configuration values.
//!
//! Decryption algorithms are pluggable: implementations register a factory
//! under a name and configuration picks one. Resolution is explicitly
//! fallible: a failure is returned to the caller, never silently replaced
//! by the cleartext, so a misconfigured credential cannot masquerade as a
//! valid one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::JobError;

/// Decrypts an encrypted credential value.
pub trait Decrypter: Send + Sync {
    /// Decrypt `value`, returning the cleartext.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Credential`] when the value cannot be decrypted.
    fn decrypt(&self, value: &str) -> Result<String, JobError>;
}

/// Builds one decrypter instance.
pub type DecrypterFactory = Arc<dyn Fn() -> Box<dyn Decrypter> + Send + Sync>;

/// Registry of named decrypter constructors.
#[derive(Clone, Default)]
pub struct DecrypterRegistry {
    factories: HashMap<String, DecrypterFactory>,
}

impl DecrypterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Decrypter> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Build a decrypter by name.
    #[must_use]
    pub fn build(&self, name: &str) -> Option<Box<dyn Decrypter>> {
        self.factories.get(name).map(|factory| factory())
    }
}

/// Strip an `ENC(...)` wrapper, returning the inner value and whether the
/// wrapper was present.
#[must_use]
pub fn unwrap_enc(value: &str) -> (&str, bool) {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix("ENC(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        (inner, true)
    } else {
        (trimmed, false)
    }
}

/// Resolves possibly-encrypted configuration values.
pub struct CredentialResolver {
    decrypter: Option<Box<dyn Decrypter>>,
}

impl CredentialResolver {
    /// Resolver with no decrypter: plain values pass through unchanged.
    #[must_use]
    pub fn passthrough() -> Self {
        Self { decrypter: None }
    }

    /// Resolver delegating to the given decrypter.
    #[must_use]
    pub fn with_decrypter(decrypter: Box<dyn Decrypter>) -> Self {
        Self {
            decrypter: Some(decrypter),
        }
    }

    /// Resolve one value. An `ENC(...)` wrapper is stripped before
    /// decryption; with a decrypter configured, every value (wrapped or
    /// not) is decrypted, so `ENC(x)` and plain `x` resolve identically.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Credential`] when decryption fails, or when a
    /// wrapped value is found but no decrypter is configured.
    pub fn resolve(&self, raw: &str) -> Result<String, JobError> {
        let (inner, wrapped) = unwrap_enc(raw);
        match &self.decrypter {
            Some(decrypter) => decrypter.decrypt(inner),
            None if wrapped => Err(JobError::Credential(
                "value is wrapped as ENC(...) but no decrypter is configured".into(),
            )),
            None => Ok(inner.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Toy decrypter: reverses the value. Enough to prove round-trip
    /// equivalence without a real cipher.
    struct Reverser;

    impl Decrypter for Reverser {
        fn decrypt(&self, value: &str) -> Result<String, JobError> {
            Ok(value.chars().rev().collect())
        }
    }

    struct AlwaysFails;

    impl Decrypter for AlwaysFails {
        fn decrypt(&self, _value: &str) -> Result<String, JobError> {
            Err(JobError::Credential("bad key".into()))
        }
    }

    #[test]
    fn unwrap_detects_wrapper() {
        assert_eq!(unwrap_enc("ENC(secret)"), ("secret", true));
        assert_eq!(unwrap_enc("secret"), ("secret", false));
        assert_eq!(unwrap_enc("  ENC(a)  "), ("a", true));
        assert_eq!(unwrap_enc("ENC(unclosed"), ("ENC(unclosed", false));
    }

    #[test]
    fn wrapped_and_plain_resolve_identically() {
        let resolver = CredentialResolver::with_decrypter(Box::new(Reverser));
        let from_wrapped = resolver.resolve("ENC(terces)").unwrap();
        let from_plain = resolver.resolve("terces").unwrap();
        assert_eq!(from_wrapped, from_plain);
        assert_eq!(from_wrapped, "secret");
    }

    #[test]
    fn passthrough_keeps_plain_values() {
        let resolver = CredentialResolver::passthrough();
        assert_eq!(resolver.resolve("plain").unwrap(), "plain");
    }

    #[test]
    fn wrapped_value_without_decrypter_is_an_error() {
        let resolver = CredentialResolver::passthrough();
        assert!(matches!(
            resolver.resolve("ENC(secret)").unwrap_err(),
            JobError::Credential(_)
        ));
    }

    #[test]
    fn decryption_failure_is_returned_not_masked() {
        let resolver = CredentialResolver::with_decrypter(Box::new(AlwaysFails));
        assert!(matches!(
            resolver.resolve("ENC(secret)").unwrap_err(),
            JobError::Credential(_)
        ));
    }

    #[test]
    fn registry_builds_by_name() {
        let mut registry = DecrypterRegistry::new();
        registry.register("reverse", || Box::new(Reverser));
        assert!(registry.build("reverse").is_some());
        assert!(registry.build("absent").is_none());
    }
}
