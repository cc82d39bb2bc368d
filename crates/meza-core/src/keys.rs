use crate::error::CustodyError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

/// An ed25519 account keypair.
///
/// The signing seed is held in-process only; records persist it as a hex seed
/// via [`Keypair::secret_seed`]. `Debug` never prints secret material.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn random() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from a 32-byte hex seed.
    pub fn from_secret_seed(seed: &str) -> Result<Self, CustodyError> {
        let bytes = hex::decode(seed.trim())
            .map_err(|e| CustodyError::InvalidKey(format!("seed is not hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CustodyError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Public identifier: uppercase hex of the verifying key.
    pub fn public_key(&self) -> String {
        hex::encode_upper(self.signing.verifying_key().as_bytes())
    }

    pub fn secret_seed(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Verify a hex signature made by the holder of `public_key` over `message`.
pub fn verify_signature(public_key: &str, message: &[u8], signature: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    verifying.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_roundtrip_preserves_public_key() {
        let keypair = Keypair::random();
        let restored = Keypair::from_secret_seed(&keypair.secret_seed()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());
    }

    #[test]
    fn signatures_verify_against_public_key() {
        let keypair = Keypair::random();
        let signature = keypair.sign(b"settle deposit");
        assert!(verify_signature(
            &keypair.public_key(),
            b"settle deposit",
            &signature
        ));
        assert!(!verify_signature(
            &keypair.public_key(),
            b"different message",
            &signature
        ));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let keypair = Keypair::random();
        let rendered = format!("{keypair:?}");
        assert!(rendered.contains(&keypair.public_key()));
        assert!(!rendered.contains(&keypair.secret_seed()));
    }

    #[test]
    fn rejects_malformed_seed() {
        assert!(Keypair::from_secret_seed("not-hex").is_err());
        assert!(Keypair::from_secret_seed("abcd").is_err());
    }
}
