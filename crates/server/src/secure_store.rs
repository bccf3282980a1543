//! Presence-gated storage for a single secret.
//!
//! The value is sealed with AES-256-GCM under a key kept in its own 0600
//! file and written as `base64(nonce || ciphertext || tag)`. Remembering and
//! recalling both require the user to confirm presence first.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as IoWrite};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::FutureExt;
use hostbridge_core::{CapabilityError, CapabilityFuture, SecureValueStore};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use tracing::{info, warn};

use crate::presence::PresenceCheck;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("failed to initialise key")]
    KeyInit,
    #[error("failed to generate random bytes")]
    Random,
    #[error("failed to seal value")]
    Seal,
    #[error("sealed value is corrupt or was sealed with another key")]
    Open,
    #[error("key file has {0} bytes, expected 32")]
    KeyLength(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SealError> for CapabilityError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::Io(err) => CapabilityError::Io(err),
            other => CapabilityError::Failed(other.to_string()),
        }
    }
}

/// Read the key file, creating it with fresh random bytes on first use.
fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN], SealError> {
    match fs::read(path) {
        Ok(bytes) => {
            return <[u8; KEY_LEN]>::try_from(bytes.as_slice())
                .map_err(|_| SealError::KeyLength(bytes.len()));
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let mut key = [0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| SealError::Random)?;

    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
    {
        Ok(mut file) => {
            file.write_all(&key)?;
            info!(
                component = "secure_store",
                event = "secure_store.key_generated",
                path = %path.display(),
                "Generated secure-value key"
            );
            Ok(key)
        }
        // Lost a race with another writer; use theirs.
        Err(err) if err.kind() == ErrorKind::AlreadyExists => load_or_create_key(path),
        Err(err) => Err(err.into()),
    }
}

fn seal(key_bytes: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<String, SealError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).map_err(|_| SealError::KeyInit)?;
    let key = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| SealError::Random)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| SealError::Seal)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);
    Ok(BASE64.encode(&sealed))
}

fn open(key_bytes: &[u8; KEY_LEN], sealed: &str) -> Result<Vec<u8>, SealError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).map_err(|_| SealError::KeyInit)?;
    let key = LessSafeKey::new(unbound);

    let mut data = BASE64.decode(sealed.trim()).map_err(|_| SealError::Open)?;
    if data.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(SealError::Open);
    }

    let nonce_bytes: [u8; NONCE_LEN] = data[..NONCE_LEN]
        .try_into()
        .map_err(|_| SealError::Open)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut data[NONCE_LEN..])
        .map_err(|_| SealError::Open)?;
    Ok(plaintext.to_vec())
}

struct Files {
    key_path: PathBuf,
    value_path: PathBuf,
}

impl Files {
    fn write_sealed(&self, value: &[u8]) -> Result<(), SealError> {
        let key = load_or_create_key(&self.key_path)?;
        let sealed = seal(&key, value)?;

        let tmp_path = self.value_path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)?;
        file.write_all(sealed.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.value_path)?;
        Ok(())
    }

    fn read_sealed(&self) -> Result<Option<Vec<u8>>, SealError> {
        let sealed = match fs::read_to_string(&self.value_path) {
            Ok(sealed) => sealed,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = load_or_create_key(&self.key_path)?;
        open(&key, &sealed).map(Some)
    }
}

pub struct SealedValueStore {
    files: Arc<Files>,
    presence: PresenceCheck,
}

impl SealedValueStore {
    pub fn new(key_path: PathBuf, value_path: PathBuf, presence: PresenceCheck) -> Self {
        Self {
            files: Arc::new(Files {
                key_path,
                value_path,
            }),
            presence,
        }
    }
}

impl SecureValueStore for SealedValueStore {
    fn remember(&self, value: Vec<u8>) -> Result<(), CapabilityError> {
        let files = self.files.clone();
        let presence = self.presence.clone();
        tokio::spawn(async move {
            if !presence.confirm("remember").await {
                return;
            }
            let outcome = tokio::task::spawn_blocking(move || files.write_sealed(&value)).await;
            match outcome {
                Ok(Ok(())) => info!(
                    component = "secure_store",
                    event = "secure_store.remembered",
                    "Stored secure value"
                ),
                Ok(Err(err)) => warn!(
                    component = "secure_store",
                    event = "secure_store.remember_failed",
                    error = %err,
                    "Failed to store secure value"
                ),
                Err(err) => warn!(
                    component = "secure_store",
                    event = "secure_store.remember_failed",
                    error = %err,
                    "Secure value write task failed"
                ),
            }
        });
        Ok(())
    }

    fn recall(&self) -> CapabilityFuture<Option<Vec<u8>>> {
        let files = self.files.clone();
        let presence = self.presence.clone();
        async move {
            if !files.value_path.exists() {
                return Ok(None);
            }
            if !presence.confirm("recall").await {
                return Err(CapabilityError::PresenceDenied);
            }
            tokio::task::spawn_blocking(move || files.read_sealed())
                .await
                .map_err(|err| CapabilityError::Failed(err.to_string()))?
                .map_err(CapabilityError::from)
        }
        .boxed()
    }
}
