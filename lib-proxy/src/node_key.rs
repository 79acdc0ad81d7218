//! Node transport identity
//!
//! An ed25519 signing key loaded from a JSON key file:
//!
//! ```json
//! {"priv_key": "<base64 of the 64-byte keypair or the 32-byte seed>"}
//! ```
//!
//! The key only authenticates the proxy on the transport handshake; it is
//! never a validator signing key.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors loading or parsing a node key file
#[derive(Debug, Error)]
pub enum NodeKeyError {
    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key file: {0}")]
    Parse(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

#[derive(Serialize, Deserialize)]
struct NodeKeyFile {
    priv_key: String,
}

/// The proxy's transport identity
#[derive(Clone)]
pub struct NodeKey {
    signing: SigningKey,
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKey").field("node_id", &self.node_id()).finish()
    }
}

impl NodeKey {
    /// Load from a JSON key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeKeyError> {
        let data = std::fs::read(path)?;
        let file: NodeKeyFile = serde_json::from_slice(&data)
            .map_err(|e| NodeKeyError::Parse(e.to_string()))?;
        let bytes = STANDARD
            .decode(file.priv_key.as_bytes())
            .map_err(|e| NodeKeyError::Parse(format!("priv_key is not base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Accepts the 64-byte keypair form or the bare 32-byte seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NodeKeyError> {
        let signing = match bytes.len() {
            64 => {
                let keypair: [u8; 64] = bytes.try_into().expect("length checked");
                SigningKey::from_keypair_bytes(&keypair)
                    .map_err(|e| NodeKeyError::InvalidKey(e.to_string()))?
            }
            32 => {
                let seed: [u8; 32] = bytes.try_into().expect("length checked");
                SigningKey::from_bytes(&seed)
            }
            other => {
                return Err(NodeKeyError::InvalidKey(format!(
                    "expected 32 or 64 bytes, got {other}"
                )))
            }
        };
        Ok(Self { signing })
    }

    /// Fresh random identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self { signing: SigningKey::from_bytes(&seed) }
    }

    /// Persist in the JSON key file format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), NodeKeyError> {
        let file = NodeKeyFile {
            priv_key: STANDARD.encode(self.signing.to_keypair_bytes()),
        };
        let data = serde_json::to_vec_pretty(&file)
            .map_err(|e| NodeKeyError::Parse(e.to_string()))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Node id: lowercase hex of the first 20 bytes of SHA-256 over the
    /// public key.
    pub fn node_id(&self) -> String {
        let digest = Sha256::digest(self.signing.verifying_key().as_bytes());
        hex::encode(&digest[..20])
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

/// Verify a handshake transcript signature against a raw public key.
pub fn verify_signature(
    public: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), NodeKeyError> {
    let key = VerifyingKey::from_bytes(public)
        .map_err(|e| NodeKeyError::InvalidKey(e.to_string()))?;
    key.verify(message, signature)
        .map_err(|e| NodeKeyError::InvalidKey(format!("signature verification failed: {e}")))
}
