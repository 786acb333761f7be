//! Session secret generation and comparison.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

/// Raw secret length in bytes before encoding.
pub const SECRET_LEN: usize = 32;

/// A per-session authentication secret.
///
/// Generated once per start attempt and handed to the trusted peer
/// out-of-band. The value is never logged: `Debug` is redacted and the type
/// implements neither `Display` nor `Serialize`.
#[derive(Clone)]
pub struct SecretToken(String);

impl SecretToken {
    /// Generate a fresh secret from the OS CSPRNG.
    ///
    /// Only a catastrophic entropy-source failure can abort this, in which
    /// case `OsRng` panics.
    pub fn generate() -> Self {
        let mut raw = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut raw);
        Self(URL_SAFE_NO_PAD.encode(raw))
    }

    /// The encoded secret, for publication to the trusted peer only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compare a client-supplied header value against this secret.
    ///
    /// The comparison touches every byte of the longer input and does not
    /// short-circuit on a length mismatch.
    pub fn matches(&self, provided: &str) -> bool {
        ct_eq(provided.as_bytes(), self.0.as_bytes())
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken(<redacted>)")
    }
}

/// Length-independent byte equality.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = (a.len() ^ b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_differ() {
        let a = SecretToken::generate();
        let b = SecretToken::generate();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn matches_own_encoding() {
        let secret = SecretToken::generate();
        let presented = secret.expose().to_string();
        assert!(secret.matches(&presented));
    }

    #[test]
    fn rejects_wrong_value() {
        let secret = SecretToken::generate();
        assert!(!secret.matches("not-the-secret"));
        assert!(!secret.matches(""));
    }

    #[test]
    fn rejects_prefix_and_extension() {
        let secret = SecretToken::generate();
        let full = secret.expose().to_string();
        assert!(!secret.matches(&full[..full.len() - 1]));
        let mut longer = full.clone();
        longer.push('A');
        assert!(!secret.matches(&longer));
    }

    #[test]
    fn debug_is_redacted() {
        let secret = SecretToken::generate();
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains(secret.expose()));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn ct_eq_handles_empty_inputs() {
        assert!(ct_eq(b"", b""));
        assert!(!ct_eq(b"", b"x"));
        assert!(!ct_eq(b"x", b""));
    }
}
