//! # kl-auth-simple
//!
//! HMAC-SHA256 bearer tokens implementing `AuthProvider`.
//! A token is `<user uuid>.<base64url(hmac(secret, uuid))>`; there is no
//! server-side session state, so rotating the secret revokes every token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use kl_core::error::{AppError, Result};
use kl_core::traits::AuthProvider;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Shortest signing secret we accept.
pub const MIN_SECRET_LEN: usize = 16;

pub struct SimpleAuthProvider {
    secret: SecretString,
}

impl SimpleAuthProvider {
    pub fn new(secret: SecretString) -> Result<Self> {
        if secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(AppError::ValidationError(format!(
                "auth secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self { secret })
    }

    fn mac(&self, user_id: &Uuid) -> HmacSha256 {
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(user_id.as_bytes());
        mac
    }
}

impl AuthProvider for SimpleAuthProvider {
    fn authenticate(&self, token: &str) -> Option<Uuid> {
        let (id, signature) = token.trim().split_once('.')?;
        let user_id = Uuid::parse_str(id).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        match self.mac(&user_id).verify_slice(&signature) {
            Ok(()) => Some(user_id),
            Err(_) => {
                debug!(%user_id, "bearer token signature mismatch");
                None
            }
        }
    }

    fn issue_token(&self, user_id: Uuid) -> String {
        let signature = self.mac(&user_id).finalize().into_bytes();
        format!("{}.{}", user_id.hyphenated(), URL_SAFE_NO_PAD.encode(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(secret: &str) -> SimpleAuthProvider {
        SimpleAuthProvider::new(SecretString::from(secret.to_string())).unwrap()
    }

    #[test]
    fn issued_token_authenticates() {
        let auth = provider("an-adequately-long-secret");
        let user = Uuid::new_v4();
        let token = auth.issue_token(user);
        assert!(token.starts_with(&user.to_string()));
        assert_eq!(auth.authenticate(&token), Some(user));
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let auth = provider("an-adequately-long-secret");
        let other = provider("a-different-long-secret");
        let user = Uuid::new_v4();
        let token = auth.issue_token(user);

        assert_eq!(other.authenticate(&token), None);

        let (_, sig) = token.split_once('.').unwrap();
        let forged = format!("{}.{sig}", Uuid::new_v4());
        assert_eq!(auth.authenticate(&forged), None);

        let bad_signature = format!("{user}.!!!");
        for junk in ["", "no-dot", "not-a-uuid.abc", bad_signature.as_str()] {
            assert_eq!(auth.authenticate(junk), None);
        }
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = SimpleAuthProvider::new(SecretString::from("short".to_string())).err();
        assert!(matches!(err, Some(AppError::ValidationError(_))));
    }
}
