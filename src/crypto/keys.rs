//! ECDSA key management for manufacturers
//!
//! Every manufacturer gets one secp256k1 key pair the first time it
//! registers a product. Records are signed with the private key and can be
//! verified by anyone holding the compressed public key.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::hash::{canonical_json, sha256};

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Unknown manufacturer: {0}")]
    UnknownManufacturer(String),
    #[error("Manufacturer name must not be empty")]
    EmptyManufacturer,
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Sign a 32-byte message digest with the private key
    pub fn sign(&self, message_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(message_hash)?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }

    /// Verify a signature against this key pair's public key
    pub fn verify(&self, message_hash: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        verify_signature(&self.public_key, message_hash, signature)
    }
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Verify a compact signature over a 32-byte digest
pub fn verify_signature(
    public_key: &PublicKey,
    message_hash: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(message_hash)?;
    let sig = secp256k1::ecdsa::Signature::from_compact(signature)
        .map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &sig, public_key).is_ok())
}

/// Digest that a signature commits to: SHA-256 of the canonical JSON payload
pub fn payload_digest<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, KeyError> {
    Ok(sha256(canonical_json(payload)?.as_bytes()))
}

/// Verify a hex signature over `payload` using only the signer's public key.
///
/// Malformed keys or signatures verify as false.
pub fn verify_with_public_key<T: Serialize + ?Sized>(
    public_key_hex: &str,
    payload: &T,
    signature_hex: &str,
) -> bool {
    let check = || -> Result<bool, KeyError> {
        let public_key = public_key_from_hex(public_key_hex)?;
        let signature = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;
        verify_signature(&public_key, &payload_digest(payload)?, &signature)
    };
    check().unwrap_or(false)
}

/// Stored key material for one manufacturer
#[derive(Clone, Serialize, Deserialize)]
pub struct ManufacturerKey {
    public_key: String,
    private_key: String,
    created_at: DateTime<Utc>,
}

impl ManufacturerKey {
    fn from_key_pair(key_pair: &KeyPair) -> Self {
        Self {
            public_key: key_pair.public_key_hex(),
            private_key: key_pair.private_key_hex(),
            created_at: Utc::now(),
        }
    }

    /// Compressed public key, hex encoded
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// When the key pair was generated
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn key_pair(&self) -> Result<KeyPair, KeyError> {
        KeyPair::from_private_key_hex(&self.private_key)
    }
}

impl fmt::Debug for ManufacturerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManufacturerKey")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Public view of a registered manufacturer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManufacturerInfo {
    pub manufacturer_id: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only registry of manufacturer key pairs.
///
/// Private keys never leave the registry: callers sign and verify through
/// it and only ever see [`ManufacturerInfo`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRegistry {
    keys: BTreeMap<String, ManufacturerKey>,
}

impl KeyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the manufacturer's key pair, generating it on first use
    pub fn get_or_create_keypair(&mut self, manufacturer: &str) -> Result<ManufacturerInfo, KeyError> {
        if manufacturer.trim().is_empty() {
            return Err(KeyError::EmptyManufacturer);
        }

        if !self.keys.contains_key(manufacturer) {
            let key_pair = KeyPair::generate();
            log::info!(
                "Generated key pair for manufacturer {:?} (public key {}...)",
                manufacturer,
                &key_pair.public_key_hex()[..16]
            );
            self.keys.insert(
                manufacturer.to_string(),
                ManufacturerKey::from_key_pair(&key_pair),
            );
        }

        self.info(manufacturer)
            .ok_or_else(|| KeyError::UnknownManufacturer(manufacturer.to_string()))
    }

    /// Whether a key pair exists for this manufacturer
    pub fn contains(&self, manufacturer: &str) -> bool {
        self.keys.contains_key(manufacturer)
    }

    /// Public key for a manufacturer, if registered
    pub fn public_key(&self, manufacturer: &str) -> Option<&str> {
        self.keys.get(manufacturer).map(ManufacturerKey::public_key)
    }

    /// Public view of one manufacturer
    pub fn info(&self, manufacturer: &str) -> Option<ManufacturerInfo> {
        self.keys.get(manufacturer).map(|key| ManufacturerInfo {
            manufacturer_id: manufacturer.to_string(),
            public_key: key.public_key.clone(),
            created_at: key.created_at,
        })
    }

    /// All registered manufacturers, ordered by name
    pub fn manufacturers(&self) -> Vec<ManufacturerInfo> {
        self.keys.keys().filter_map(|name| self.info(name)).collect()
    }

    /// Sign a payload on behalf of a manufacturer, returning a hex signature
    pub fn sign<T: Serialize + ?Sized>(
        &self,
        manufacturer: &str,
        payload: &T,
    ) -> Result<String, KeyError> {
        let key = self
            .keys
            .get(manufacturer)
            .ok_or_else(|| KeyError::UnknownManufacturer(manufacturer.to_string()))?;

        let signature = key.key_pair()?.sign(&payload_digest(payload)?)?;
        Ok(hex::encode(signature))
    }

    /// Verify a manufacturer's signature over a payload
    pub fn verify<T: Serialize + ?Sized>(
        &self,
        manufacturer: &str,
        payload: &T,
        signature: &str,
    ) -> bool {
        match self.public_key(manufacturer) {
            Some(public_key) => verify_with_public_key(public_key, payload, signature),
            None => false,
        }
    }

    /// Number of registered manufacturers
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no manufacturer has registered yet
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let kp = KeyPair::generate();
        let digest = sha256(b"Hello, ledger!");

        let signature = kp.sign(&digest).unwrap();
        assert!(kp.verify(&digest, &signature).unwrap());
        assert!(!kp.verify(&sha256(b"other"), &signature).unwrap());
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut registry = KeyRegistry::new();
        let first = registry.get_or_create_keypair("Acme").unwrap();
        let second = registry.get_or_create_keypair("Acme").unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(first.manufacturer_id, "Acme");
    }

    #[test]
    fn test_empty_manufacturer_rejected() {
        let mut registry = KeyRegistry::new();
        assert!(matches!(
            registry.get_or_create_keypair("  "),
            Err(KeyError::EmptyManufacturer)
        ));
    }

    #[test]
    fn test_sign_unknown_manufacturer() {
        let registry = KeyRegistry::new();
        let result = registry.sign("Nobody", &json!({"a": 1}));
        assert!(matches!(result, Err(KeyError::UnknownManufacturer(name)) if name == "Nobody"));
    }

    #[test]
    fn test_registry_sign_verify() {
        let mut registry = KeyRegistry::new();
        registry.get_or_create_keypair("Acme").unwrap();
        registry.get_or_create_keypair("Globex").unwrap();

        let payload = json!({"product_name": "Widget", "batch_number": "B-1"});
        let signature = registry.sign("Acme", &payload).unwrap();

        assert!(registry.verify("Acme", &payload, &signature));
        assert!(!registry.verify("Globex", &payload, &signature));
        assert!(!registry.verify("Unknown", &payload, &signature));

        let tampered = json!({"product_name": "Widgeu", "batch_number": "B-1"});
        assert!(!registry.verify("Acme", &tampered, &signature));
    }

    #[test]
    fn test_verify_with_public_key_only() {
        let mut registry = KeyRegistry::new();
        let info = registry.get_or_create_keypair("Acme").unwrap();
        let payload = json!({"x": 1});
        let signature = registry.sign("Acme", &payload).unwrap();

        assert!(verify_with_public_key(&info.public_key, &payload, &signature));
        assert!(!verify_with_public_key("zz", &payload, &signature));
        assert!(!verify_with_public_key(&info.public_key, &payload, "not-hex"));
    }

    #[test]
    fn test_registry_serialization_keeps_keys() {
        let mut registry = KeyRegistry::new();
        registry.get_or_create_keypair("Acme").unwrap();
        let payload = json!({"x": 1});
        let signature = registry.sign("Acme", &payload).unwrap();

        let json = serde_json::to_string(&registry).unwrap();
        let restored: KeyRegistry = serde_json::from_str(&json).unwrap();

        assert!(restored.verify("Acme", &payload, &signature));
        assert_eq!(restored.sign("Acme", &payload).map(|s| s.len()).unwrap(), 128);
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let mut registry = KeyRegistry::new();
        registry.get_or_create_keypair("Acme").unwrap();
        let debug = format!("{:?}", registry);
        assert!(debug.contains("<redacted>"));
    }
}
