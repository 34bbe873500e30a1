//! Envelope encryption of individual attributes.
//!
//! Each encrypted attribute is sealed with AES-256-GCM under a fresh data key
//! issued by a [`KeyProvider`]. The stored value is a map envelope
//! `{v: N"1", edk: B, nonce: B, ct: B}` holding the wrapped data key, the
//! nonce and the ciphertext of the tagged JSON form of the plaintext value.
//! The attribute name is bound as associated data, so an envelope copied to
//! another attribute fails to open.

use crate::{
    codec::{Item, json},
    error::{Direction, Error, Result},
    model::ModelMetadata,
};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use aws_sdk_dynamodb::{primitives::Blob, types::AttributeValue};
use rand::RngCore;
use std::{collections, error, fmt, future::Future, pin::Pin, sync::Arc};

const ENVELOPE_VERSION: &str = "1";
const NONCE_LEN: usize = 12;
const DATA_KEY_LEN: usize = 32;
const AAD_PREFIX: &str = "dynamodb-mapper:encrypted:v1|attr=";

/// Failure reported by a [`KeyProvider`].
pub type KeyProviderError = Box<dyn error::Error + Send + Sync>;

/// Boxed future returned by [`KeyProvider`] methods.
pub type KeyFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KeyProviderError>> + Send + 'a>>;

/// A plaintext data key and its wrapped form.
#[derive(Clone)]
pub struct DataKey {
    /// 256-bit key used to seal one value.
    pub plaintext: Vec<u8>,
    /// The key wrapped by the provider, stored alongside the ciphertext.
    pub encrypted: Vec<u8>,
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"<redacted>")
            .field("encrypted", &self.encrypted.len())
            .finish()
    }
}

/// Issuer and unwrapper of data keys, typically a key management service.
pub trait KeyProvider: Send + Sync {
    /// Issues a fresh 256-bit data key.
    fn generate_data_key(&self) -> KeyFuture<'_, DataKey>;

    /// Unwraps a data key issued by [`KeyProvider::generate_data_key`].
    fn decrypt_data_key<'a>(&'a self, encrypted: &'a [u8]) -> KeyFuture<'a, Vec<u8>>;
}

/// Wraps data keys with a local AES-256-GCM master key.
///
/// ```rust
/// use dynamodb_mapper::encryption::{KeyProvider, StaticKeyProvider};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = StaticKeyProvider::new(&[7; 32]).unwrap();
/// let key = provider.generate_data_key().await.unwrap();
/// let unwrapped = provider.decrypt_data_key(&key.encrypted).await.unwrap();
/// assert_eq!(unwrapped, key.plaintext);
/// # }
/// ```
#[derive(Clone)]
pub struct StaticKeyProvider {
    master: Aes256Gcm,
}

impl fmt::Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyProvider").finish_non_exhaustive()
    }
}

impl StaticKeyProvider {
    /// A provider wrapping keys with `master_key`, which must be 32 bytes.
    pub fn new(master_key: &[u8]) -> Result<Self, KeyProviderError> {
        let master = Aes256Gcm::new_from_slice(master_key)
            .map_err(|_| "master key must be 32 bytes long")?;
        Ok(Self { master })
    }

    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .master
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| "failed to wrap data key")?;
        let mut wrapped = nonce.to_vec();
        wrapped.extend(ciphertext);
        Ok(wrapped)
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        if wrapped.len() <= NONCE_LEN {
            return Err("wrapped data key is too short".into());
        }
        let (nonce, ciphertext) = wrapped.split_at(NONCE_LEN);
        let plaintext = self
            .master
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| "failed to unwrap data key")?;
        Ok(plaintext)
    }
}

impl KeyProvider for StaticKeyProvider {
    fn generate_data_key(&self) -> KeyFuture<'_, DataKey> {
        Box::pin(async move {
            let mut plaintext = vec![0u8; DATA_KEY_LEN];
            rand::thread_rng().fill_bytes(&mut plaintext);
            let encrypted = self.wrap(&plaintext)?;
            Ok(DataKey {
                plaintext,
                encrypted,
            })
        })
    }

    fn decrypt_data_key<'a>(&'a self, encrypted: &'a [u8]) -> KeyFuture<'a, Vec<u8>> {
        Box::pin(async move { self.unwrap_key(encrypted) })
    }
}

/// Seals and opens encrypted attributes.
#[derive(Clone)]
pub struct EnvelopeEncryptor {
    provider: Arc<dyn KeyProvider>,
}

impl fmt::Debug for EnvelopeEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeEncryptor").finish_non_exhaustive()
    }
}

fn associated_data(attribute: &str) -> Vec<u8> {
    format!("{AAD_PREFIX}{attribute}").into_bytes()
}

fn envelope_bytes<'a>(
    envelope: &'a collections::HashMap<String, AttributeValue>,
    name: &str,
) -> std::result::Result<&'a [u8], String> {
    match envelope.get(name) {
        Some(AttributeValue::B(blob)) => Ok(blob.as_ref()),
        _ => Err(format!("envelope has no binary `{name}`")),
    }
}

impl EnvelopeEncryptor {
    /// Encryptor drawing data keys from `provider`.
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self { provider }
    }

    /// Envelope of `value` stored under `attribute`.
    pub async fn encrypt(&self, attribute: &str, value: &AttributeValue) -> Result<AttributeValue> {
        let failed = |reason: String| Error::EncryptedField {
            field: attribute.to_string(),
            direction: Direction::Encrypt,
            reason,
        };
        let tagged = json::to_tagged(value).map_err(|err| failed(err.to_string()))?;
        let plaintext = serde_json::to_vec(&tagged).map_err(|err| failed(err.to_string()))?;
        let data_key = self
            .provider
            .generate_data_key()
            .await
            .map_err(|err| failed(err.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&data_key.plaintext)
            .map_err(|_| failed("data key must be 32 bytes long".to_string()))?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let aad = associated_data(attribute);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| failed("sealing failed".to_string()))?;
        Ok(AttributeValue::M(collections::HashMap::from([
            (
                "v".to_string(),
                AttributeValue::N(ENVELOPE_VERSION.to_string()),
            ),
            (
                "edk".to_string(),
                AttributeValue::B(Blob::new(data_key.encrypted)),
            ),
            ("nonce".to_string(), AttributeValue::B(Blob::new(nonce.to_vec()))),
            ("ct".to_string(), AttributeValue::B(Blob::new(ciphertext))),
        ])))
    }

    /// Plaintext value of an envelope stored under `attribute`.
    pub async fn decrypt(&self, attribute: &str, value: &AttributeValue) -> Result<AttributeValue> {
        let failed = |reason: String| Error::EncryptedField {
            field: attribute.to_string(),
            direction: Direction::Decrypt,
            reason,
        };
        let AttributeValue::M(envelope) = value else {
            return Err(failed("value is not an envelope".to_string()));
        };
        match envelope.get("v") {
            Some(AttributeValue::N(version)) if version == ENVELOPE_VERSION => {}
            _ => return Err(failed("unsupported envelope version".to_string())),
        }
        let encrypted_key = envelope_bytes(envelope, "edk").map_err(failed)?;
        let nonce = envelope_bytes(envelope, "nonce").map_err(failed)?;
        let ciphertext = envelope_bytes(envelope, "ct").map_err(failed)?;
        if nonce.len() != NONCE_LEN {
            return Err(failed("nonce must be 12 bytes long".to_string()));
        }
        let data_key = self
            .provider
            .decrypt_data_key(encrypted_key)
            .await
            .map_err(|err| failed(err.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&data_key)
            .map_err(|_| failed("data key must be 32 bytes long".to_string()))?;
        let aad = associated_data(attribute);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| failed("authentication failed".to_string()))?;
        let tagged: serde_json::Value =
            serde_json::from_slice(&plaintext).map_err(|err| failed(err.to_string()))?;
        json::from_tagged(&tagged).map_err(|err| failed(err.to_string()))
    }

    /// Seals every encrypted field present in a wire item.
    pub async fn encrypt_item(&self, metadata: &ModelMetadata, item: &mut Item) -> Result<()> {
        for field in metadata.fields().filter(|field| field.is_encrypted()) {
            let wire_name = field.wire_name();
            if let Some(value) = item.get(wire_name) {
                let sealed = self.encrypt(wire_name, value).await?;
                item.insert(wire_name.to_string(), sealed);
            }
        }
        Ok(())
    }

    /// Opens every encrypted field present in a wire item.
    pub async fn decrypt_item(&self, metadata: &ModelMetadata, item: &mut Item) -> Result<()> {
        for field in metadata.fields().filter(|field| field.is_encrypted()) {
            let wire_name = field.wire_name();
            if let Some(value) = item.get(wire_name) {
                let opened = self.decrypt(wire_name, value).await?;
                item.insert(wire_name.to_string(), opened);
            }
        }
        Ok(())
    }
}
