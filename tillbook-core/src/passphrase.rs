//! Scoped passphrase buffer.
//!
//! The passphrase is acquired at the call boundary (prompt, environment),
//! handed to the core for the minimal derive/seal/unseal scope, and zeroed
//! on every exit path — success or failure — by the wrapper's drop.

use secrecy::{ExposeSecret, SecretSlice};

/// A caller-supplied passphrase.
///
/// Never persisted, never logged. `Debug` is redacted and the bytes are
/// zeroized when the value is dropped.
pub struct Passphrase(SecretSlice<u8>);

impl Passphrase {
    /// Wraps passphrase bytes. The input buffer is moved into the secret
    /// container and zeroized with it.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(SecretSlice::from(bytes))
    }

    /// Exposes the raw bytes for the duration of a derive/sign/seal call.
    #[must_use]
    pub(crate) fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passphrase")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let passphrase = Passphrase::from("hunter2");
        assert!(!format!("{passphrase:?}").contains("hunter2"));
    }

    #[test]
    fn test_expose_round_trips() {
        let passphrase = Passphrase::new(b"correct horse".to_vec());
        assert_eq!(passphrase.expose(), b"correct horse");
    }
}
