//! Sealed-box [`PeerCrypto`] adapter: X25519 key agreement +
//! ChaCha20-Poly1305.
//!
//! Each participant holds a static X25519 keypair. Encrypting to a peer
//! uses an ephemeral keypair: `output = eph_pub (32 bytes) || ciphertext`,
//! with the AEAD key derived as `SHA-256(DH(eph, recipient))`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};

use crate::application::ports::PeerCrypto;
use crate::domain::peer::PublicKey;

pub struct SealedBoxCrypto {
    secret: X25519Secret,
    public: X25519Public,
}

impl SealedBoxCrypto {
    /// Generate a fresh identity (random).
    pub fn generate() -> Self {
        let secret = X25519Secret::random_from_rng(rand::thread_rng());
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }
}

impl PeerCrypto for SealedBoxCrypto {
    fn public_key(&self) -> PublicKey {
        PublicKey(self.public.to_bytes())
    }

    fn encrypt_for(&self, key: &PublicKey, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let eph_secret = X25519Secret::random_from_rng(rand::thread_rng());
        let eph_public = X25519Public::from(&eph_secret);

        let recipient = X25519Public::from(key.0);
        let shared = eph_secret.diffie_hellman(&recipient);
        let sym_key = Sha256::digest(shared.as_bytes());

        let cipher = ChaCha20Poly1305::new_from_slice(&sym_key)?;
        // Zeroed nonce: the ephemeral key is used exactly once.
        let nonce = Nonce::default();
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("AEAD seal error: {e}"))?;

        let mut sealed = Vec::with_capacity(32 + ciphertext.len());
        sealed.extend_from_slice(eph_public.as_bytes());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        if ciphertext.len() < 32 {
            anyhow::bail!("Sealed data too short");
        }
        let mut eph_pub_bytes = [0u8; 32];
        eph_pub_bytes.copy_from_slice(&ciphertext[..32]);
        let eph_public = X25519Public::from(eph_pub_bytes);

        let shared = self.secret.diffie_hellman(&eph_public);
        let sym_key = Sha256::digest(shared.as_bytes());

        let cipher = ChaCha20Poly1305::new_from_slice(&sym_key)?;
        let nonce = Nonce::default();
        cipher
            .decrypt(&nonce, &ciphertext[32..])
            .map_err(|e| anyhow::anyhow!("AEAD unseal error: {e}"))
    }

    fn digest(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn stringify_key(&self, key: &PublicKey) -> String {
        BASE64.encode(key.0)
    }

    fn parse_key(&self, s: &str) -> anyhow::Result<PublicKey> {
        let bytes = BASE64.decode(s)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Public key must be 32 bytes"))?;
        Ok(PublicKey(bytes))
    }
}
