//! # cb-auth-simple
//!
//! OS-random implementation of `AuthProvider`.
//! Issues public post ids, manage tokens and conversation ids, and checks the
//! global owner delete key.

use cb_core::traits::{AuthProvider, OwnerKeyCheck};
use secrecy::{ExposeSecret, SecretString};

/// Byte lengths before hex encoding. The manage token is the only bearer
/// credential for a post, so it is twice as long as the public id.
const POST_ID_BYTES: usize = 8;
const MANAGE_TOKEN_BYTES: usize = 16;
const CONVERSATION_ID_BYTES: usize = 6;

pub struct SimpleAuthProvider {
    /// Global owner delete key; `None` disables the override.
    owner_key: Option<SecretString>,
}

impl SimpleAuthProvider {
    /// Accepts the owner key (e.g., from an environment variable). Blank
    /// keys count as unset.
    pub fn new(owner_key: Option<SecretString>) -> Self {
        let owner_key = owner_key.filter(|key| !key.expose_secret().trim().is_empty());
        Self { owner_key }
    }
}

/// Hex-encoded bytes from the operating system's CSPRNG.
fn random_token(size: usize) -> anyhow::Result<String> {
    let mut bytes = vec![0u8; size];
    getrandom::getrandom(&mut bytes)
        .map_err(|err| anyhow::anyhow!("operating system random source unavailable: {err}"))?;
    Ok(hex::encode(bytes))
}

impl AuthProvider for SimpleAuthProvider {
    fn generate_post_id(&self) -> anyhow::Result<String> {
        random_token(POST_ID_BYTES)
    }

    fn generate_manage_token(&self) -> anyhow::Result<String> {
        random_token(MANAGE_TOKEN_BYTES)
    }

    fn generate_conversation_id(&self) -> anyhow::Result<String> {
        random_token(CONVERSATION_ID_BYTES)
    }

    /// Exact match against the trimmed configured key.
    fn verify_owner_key(&self, provided: &str) -> OwnerKeyCheck {
        let Some(expected) = &self.owner_key else {
            return OwnerKeyCheck::NotConfigured;
        };
        let provided = provided.trim();
        if !provided.is_empty() && provided == expected.expose_secret().trim() {
            OwnerKeyCheck::Granted
        } else {
            OwnerKeyCheck::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_lengths() {
        let auth = SimpleAuthProvider::new(None);
        assert_eq!(auth.generate_post_id().unwrap().len(), 16);
        assert_eq!(auth.generate_manage_token().unwrap().len(), 32);
        assert_eq!(auth.generate_conversation_id().unwrap().len(), 12);
        assert!(auth.generate_manage_token().unwrap().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_token_returns_hex() {
        let token = random_token(4).unwrap();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_do_not_repeat() {
        let auth = SimpleAuthProvider::new(None);
        let tokens: HashSet<String> = (0..500).map(|_| auth.generate_manage_token().unwrap()).collect();
        assert_eq!(tokens.len(), 500);
    }

    #[test]
    fn test_owner_key() {
        let unset = SimpleAuthProvider::new(None);
        assert_eq!(unset.verify_owner_key("anything"), OwnerKeyCheck::NotConfigured);

        let blank = SimpleAuthProvider::new(Some(SecretString::from("   ".to_owned())));
        assert_eq!(blank.verify_owner_key(""), OwnerKeyCheck::NotConfigured);

        let auth = SimpleAuthProvider::new(Some(SecretString::from("s3cret".to_owned())));
        assert_eq!(auth.verify_owner_key("s3cret"), OwnerKeyCheck::Granted);
        assert_eq!(auth.verify_owner_key("S3CRET"), OwnerKeyCheck::Denied);
        assert_eq!(auth.verify_owner_key(""), OwnerKeyCheck::Denied);
    }
}
