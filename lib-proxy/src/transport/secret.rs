//! Authenticated encrypted connection
//!
//! Handshake:
//!
//! 1. Both sides exchange a plaintext hello `[version][ed25519 pub][nonce]`.
//! 2. Session keys are derived with HKDF-SHA256: the transcript hash of both
//!    hellos (byte order normalised) salts the two 32-byte nonces. Each
//!    direction gets its own key; the side with the lower hello sends on the
//!    first key.
//! 3. Each side signs the transcript hash with its identity key and sends
//!    the signature inside the first encrypted frame; the peer verifies it
//!    against the hello's public key.
//!
//! Traffic frames are `[u32 BE ciphertext length][ciphertext]`, sealed with
//! ChaCha20-Poly1305 under a per-direction counter nonce. Nonce reuse is
//! impossible within a session: the counter increments per frame and the
//! two directions use distinct keys.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::Signature;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;
use crate::node_key::{verify_signature, NodeKey};

use super::MAX_FRAME_SIZE;

const HANDSHAKE_VERSION: u8 = 1;
const HELLO_LEN: usize = 1 + 32 + 32;
const HKDF_INFO: &[u8] = b"faultline/secret-connection/v1";

/// An authenticated, encrypted, frame-oriented connection.
pub struct SecretConnection<S> {
    reader: SecretReader<io::ReadHalf<S>>,
    writer: SecretWriter<io::WriteHalf<S>>,
    remote_pubkey: [u8; 32],
}

/// Receiving half: decrypts length-prefixed frames.
pub struct SecretReader<R> {
    inner: R,
    cipher: ChaCha20Poly1305,
    counter: u64,
}

/// Sending half: encrypts length-prefixed frames.
pub struct SecretWriter<W> {
    inner: W,
    cipher: ChaCha20Poly1305,
    counter: u64,
}

impl<S> SecretConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over a fresh stream.
    pub async fn handshake(stream: S, identity: &NodeKey) -> Result<Self, ProxyError> {
        let (mut read_half, mut write_half) = io::split(stream);

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);

        let mut local_hello = Vec::with_capacity(HELLO_LEN);
        local_hello.push(HANDSHAKE_VERSION);
        local_hello.extend_from_slice(&identity.public_bytes());
        local_hello.extend_from_slice(&nonce);

        write_plain_frame(&mut write_half, &local_hello).await?;
        let remote_hello = read_plain_frame(&mut read_half).await?;
        if remote_hello.len() != HELLO_LEN {
            return Err(ProxyError::Handshake(format!(
                "hello has {} bytes, expected {HELLO_LEN}",
                remote_hello.len()
            )));
        }
        if remote_hello[0] != HANDSHAKE_VERSION {
            return Err(ProxyError::Handshake(format!(
                "unsupported handshake version {}",
                remote_hello[0]
            )));
        }
        if remote_hello == local_hello {
            return Err(ProxyError::Handshake("reflected hello".into()));
        }

        let mut remote_pubkey = [0u8; 32];
        remote_pubkey.copy_from_slice(&remote_hello[1..33]);
        let remote_nonce: &[u8] = &remote_hello[33..];

        // Normalise byte order so both sides derive identical material.
        let local_is_low = local_hello.as_slice() < remote_hello.as_slice();
        let (low_hello, high_hello): (&[u8], &[u8]) = if local_is_low {
            (&local_hello, &remote_hello)
        } else {
            (&remote_hello, &local_hello)
        };
        let (low_nonce, high_nonce): (&[u8], &[u8]) = if local_is_low {
            (&nonce, remote_nonce)
        } else {
            (remote_nonce, &nonce)
        };

        let mut transcript_hasher = Sha256::new();
        transcript_hasher.update(low_hello);
        transcript_hasher.update(high_hello);
        let transcript: [u8; 32] = transcript_hasher.finalize().into();

        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(low_nonce);
        ikm.extend_from_slice(high_nonce);

        let hk = Hkdf::<Sha256>::new(Some(&transcript[..]), &ikm);
        let mut keys = [0u8; 64];
        hk.expand(HKDF_INFO, &mut keys)
            .map_err(|e| ProxyError::Handshake(format!("key derivation failed: {e}")))?;

        let (send_key, recv_key) = if local_is_low {
            (&keys[..32], &keys[32..])
        } else {
            (&keys[32..], &keys[..32])
        };

        let mut writer = SecretWriter {
            inner: write_half,
            cipher: ChaCha20Poly1305::new(Key::from_slice(send_key)),
            counter: 0,
        };
        let mut reader = SecretReader {
            inner: read_half,
            cipher: ChaCha20Poly1305::new(Key::from_slice(recv_key)),
            counter: 0,
        };

        // Authenticate: first encrypted frame carries the transcript signature.
        let signature = identity.sign(&transcript);
        writer.send_frame(&signature.to_bytes()).await?;

        let remote_sig_bytes = reader.recv_frame().await?;
        let remote_sig: [u8; 64] = remote_sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ProxyError::Handshake("malformed transcript signature".into()))?;
        verify_signature(&remote_pubkey, &transcript, &Signature::from_bytes(&remote_sig))
            .map_err(|e| ProxyError::Handshake(e.to_string()))?;

        Ok(Self { reader, writer, remote_pubkey })
    }
}

impl<S> SecretConnection<S> {
    /// Peer identity: lowercase hex of the first 20 bytes of SHA-256 over
    /// the remote public key.
    pub fn remote_id(&self) -> String {
        let digest = Sha256::digest(self.remote_pubkey);
        hex::encode(&digest[..20])
    }

    pub fn remote_pubkey(&self) -> [u8; 32] {
        self.remote_pubkey
    }

    /// Split into independently owned halves for concurrent read/write.
    pub fn into_split(
        self,
    ) -> (SecretReader<io::ReadHalf<S>>, SecretWriter<io::WriteHalf<S>>, [u8; 32]) {
        (self.reader, self.writer, self.remote_pubkey)
    }
}

impl<R> SecretReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Read and decrypt the next frame.
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>, ProxyError> {
        let ciphertext = read_plain_frame(&mut self.inner).await?;
        let nonce = counter_nonce(self.counter);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| ProxyError::Transport("frame authentication failed".into()))?;
        self.counter += 1;
        Ok(plaintext)
    }
}

impl<W> SecretWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Encrypt and write one frame.
    pub async fn send_frame(&mut self, plaintext: &[u8]) -> Result<(), ProxyError> {
        let nonce = counter_nonce(self.counter);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ProxyError::Transport("frame encryption failed".into()))?;
        self.counter += 1;
        write_plain_frame(&mut self.inner, &ciphertext).await
    }

    pub async fn shutdown(&mut self) -> Result<(), ProxyError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// 96-bit nonce: 4 zero bytes then the frame counter, big-endian.
fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

async fn write_plain_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProxyError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProxyError::Transport(format!(
            "frame of {} bytes exceeds the {MAX_FRAME_SIZE} byte cap",
            data.len()
        )));
    }
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_plain_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProxyError> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProxyError::Transport(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte cap"
        )));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}
