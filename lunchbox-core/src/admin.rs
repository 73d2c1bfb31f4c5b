//! Admin access gate.
//!
//! Menu edits are gated behind a shared passphrase. Only the SHA-256
//! digest of the passphrase is stored; verification hashes the attempt
//! and compares digests in constant time.

use sha2::{Digest, Sha256};

/// Verifies admin passphrase attempts against a stored digest.
#[derive(Debug, Clone)]
pub struct AdminGate {
    digest: [u8; 32],
}

impl AdminGate {
    /// Builds a gate from the plaintext passphrase, e.g. from config.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self {
            digest: hash(passphrase),
        }
    }

    /// Builds a gate from a lowercase hex SHA-256 digest. Returns `None`
    /// when the string is not 64 hex characters.
    pub fn from_digest_hex(hex: &str) -> Option<Self> {
        // Byte pairs, not char pairs: slicing the str would panic on
        // multibyte input of the right byte length.
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut digest = [0u8; 32];
        for (i, byte) in digest.iter_mut().enumerate() {
            let pair = std::str::from_utf8(&hex.as_bytes()[i * 2..i * 2 + 2]).ok()?;
            *byte = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self { digest })
    }

    /// Hex form of the stored digest, for writing back to config.
    pub fn digest_hex(&self) -> String {
        self.digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Checks an attempt without early exit on the first mismatching byte.
    pub fn verify(&self, attempt: &str) -> bool {
        let candidate = hash(attempt);
        let mut diff = 0u8;
        for (a, b) in self.digest.iter().zip(candidate.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

fn hash(input: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().into()
}
