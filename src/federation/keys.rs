//! Relay keypair
//!
//! The relay signs every outbound request with a single RSA key. The key is
//! generated on first start and persisted under `actorKeys`; losing or
//! corrupting it is fatal.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::data::{ACTOR_KEYS, StateStore, load_json, save_json};
use crate::error::AppError;

/// Key size used for newly generated relay keys
pub const KEY_BITS: usize = 4096;

/// Persisted form of the keypair
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKeys {
    #[serde(rename = "publicKey")]
    public_key: String,
    #[serde(rename = "privateKey")]
    private_key: String,
}

/// The relay's signing identity
pub struct RelayIdentity {
    signing_key: rsa::pkcs1v15::SigningKey<Sha256>,
    public_key_pem: String,
}

impl std::fmt::Debug for RelayIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayIdentity")
            .field("public_key_pem", &self.public_key_pem)
            .finish_non_exhaustive()
    }
}

impl RelayIdentity {
    /// Load the persisted keypair, generating and persisting a new one on
    /// first run.
    ///
    /// # Errors
    /// `AppError::KeyMaterial` if stored keys cannot be decoded; the caller
    /// must not start the relay in that case.
    pub async fn load_or_generate(store: &dyn StateStore) -> Result<Self, AppError> {
        let stored: Option<StoredKeys> = load_json(store, ACTOR_KEYS)
            .await
            .map_err(|e| AppError::KeyMaterial(e.to_string()))?;

        if let Some(keys) = stored {
            let identity = Self::from_pem(&keys.private_key, &keys.public_key)?;
            tracing::info!("Loaded relay keypair");
            return Ok(identity);
        }

        tracing::info!(bits = KEY_BITS, "No actor keys present, generating RSA keypair");
        let identity = tokio::task::spawn_blocking(|| Self::generate(KEY_BITS))
            .await
            .map_err(|e| AppError::Internal(e.into()))??;

        save_json(
            store,
            ACTOR_KEYS,
            &StoredKeys {
                public_key: identity.public_key_pem.clone(),
                private_key: identity.private_key_pem()?,
            },
        )
        .await?;
        tracing::info!("Relay keypair generated and stored");

        Ok(identity)
    }

    /// Generate a fresh keypair.
    pub fn generate(bits: usize) -> Result<Self, AppError> {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, bits).map_err(|e| AppError::KeyMaterial(e.to_string()))?;
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::KeyMaterial(e.to_string()))?;

        Ok(Self {
            signing_key: rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key),
            public_key_pem,
        })
    }

    /// Build an identity from PEM strings.
    ///
    /// The private key may be PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1
    /// (`BEGIN RSA PRIVATE KEY`). The public key must belong to it.
    pub fn from_pem(private_key_pem: &str, public_key_pem: &str) -> Result<Self, AppError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| AppError::KeyMaterial(format!("Invalid private key: {}", e)))?;

        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .or_else(|_| {
                use rsa::pkcs1::DecodeRsaPublicKey;
                RsaPublicKey::from_pkcs1_pem(public_key_pem)
            })
            .map_err(|e| AppError::KeyMaterial(format!("Invalid public key: {}", e)))?;

        if RsaPublicKey::from(&private_key) != public_key {
            return Err(AppError::KeyMaterial(
                "Stored public key does not match private key".to_string(),
            ));
        }

        Ok(Self {
            signing_key: rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key),
            public_key_pem: public_key_pem.to_string(),
        })
    }

    /// PEM-encoded public key as published in the actor document
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// `publicKey` fragment of the actor document
    pub fn public_key_document(&self, actor_uri: &str) -> serde_json::Value {
        serde_json::json!({
            "id": format!("{}#main-key", actor_uri),
            "owner": actor_uri,
            "publicKeyPem": self.public_key_pem,
        })
    }

    /// RSA-SHA256 signature over `data`, base64-encoded
    pub fn sign(&self, data: &[u8]) -> String {
        let mut rng = rand::thread_rng();
        let signature = self.signing_key.sign_with_rng(&mut rng, data);
        BASE64.encode(signature.to_bytes())
    }

    fn private_key_pem(&self) -> Result<String, AppError> {
        let private_key: &RsaPrivateKey = self.signing_key.as_ref();
        Ok(private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::KeyMaterial(e.to_string()))?
            .to_string())
    }
}
