//! Product registration records
//!
//! A record is one signed product-registration entry. Its `product_id` is
//! the digest of the registered fields and its `record_id` additionally
//! commits to the product id and the record timestamp. The manufacturer's
//! signature covers the whole payload, product id included.

use crate::crypto::{hash_value, KeyError, KeyRegistry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp of the genesis record and block (2025-01-01T00:00:00Z, in µs)
pub const GENESIS_TIMESTAMP: i64 = 1_735_689_600_000_000;

/// Manufacturer that owns the genesis record
pub const GENESIS_MANUFACTURER: &str = "System";

/// Record errors
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Record {0}: product id does not match payload")]
    ProductIdMismatch(String),
    #[error("Record {0}: record id does not match contents")]
    RecordIdMismatch(String),
    #[error("Record {0}: signature does not verify for manufacturer {1:?}")]
    InvalidSignature(String, String),
}

/// Product data submitted by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistration {
    pub product_name: String,
    pub manufacturer: String,
    pub batch_number: String,
    pub manufacture_date: String,
}

impl ProductRegistration {
    pub fn new(
        product_name: impl Into<String>,
        manufacturer: impl Into<String>,
        batch_number: impl Into<String>,
        manufacture_date: impl Into<String>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            manufacturer: manufacturer.into(),
            batch_number: batch_number.into(),
            manufacture_date: manufacture_date.into(),
        }
    }

    /// Reject registrations with blank fields
    pub fn validate(&self) -> Result<(), RecordError> {
        let fields = [
            ("product_name", &self.product_name),
            ("manufacturer", &self.manufacturer),
            ("batch_number", &self.batch_number),
            ("manufacture_date", &self.manufacture_date),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(RecordError::MissingField(name));
            }
        }
        Ok(())
    }
}

/// The fields a product id is derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFields {
    pub product_name: String,
    pub manufacturer: String,
    pub batch_number: String,
    pub manufacture_date: String,
    pub registration_time: i64,
}

impl ProductFields {
    fn from_registration(registration: ProductRegistration, registration_time: i64) -> Self {
        Self {
            product_name: registration.product_name,
            manufacturer: registration.manufacturer,
            batch_number: registration.batch_number,
            manufacture_date: registration.manufacture_date,
            registration_time,
        }
    }
}

/// Signed payload: the product fields plus their digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPayload {
    #[serde(flatten)]
    pub fields: ProductFields,
    pub product_id: String,
}

/// Input to the record id digest
#[derive(Serialize)]
struct RecordIdInput<'a> {
    payload_fields: &'a ProductFields,
    product_id: &'a str,
    timestamp: i64,
}

/// A signed product registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: String,
    pub timestamp: i64,
    pub payload: ProductPayload,
    pub signature: String,
}

impl Record {
    /// Build and sign a record stamped with the current time.
    ///
    /// The manufacturer must already have a key pair in `registry`.
    pub fn create(
        registration: ProductRegistration,
        registry: &KeyRegistry,
    ) -> Result<Self, RecordError> {
        Self::create_at(registration, registry, Utc::now().timestamp_micros())
    }

    /// Build and sign a record with an explicit timestamp (Unix µs)
    pub fn create_at(
        registration: ProductRegistration,
        registry: &KeyRegistry,
        timestamp: i64,
    ) -> Result<Self, RecordError> {
        registration.validate()?;

        let fields = ProductFields::from_registration(registration, timestamp);
        let (payload, record_id) = Self::derive(fields, timestamp)?;
        let signature = registry.sign(&payload.fields.manufacturer, &payload)?;

        Ok(Self {
            record_id,
            timestamp,
            payload,
            signature,
        })
    }

    /// The unsigned record carried by the genesis block
    pub fn genesis() -> Result<Self, RecordError> {
        let fields = ProductFields {
            product_name: "Genesis Block".to_string(),
            manufacturer: GENESIS_MANUFACTURER.to_string(),
            batch_number: "GENESIS-001".to_string(),
            manufacture_date: "2025-01-01".to_string(),
            registration_time: GENESIS_TIMESTAMP,
        };
        let (payload, record_id) = Self::derive(fields, GENESIS_TIMESTAMP)?;

        Ok(Self {
            record_id,
            timestamp: GENESIS_TIMESTAMP,
            payload,
            signature: String::new(),
        })
    }

    fn derive(fields: ProductFields, timestamp: i64) -> Result<(ProductPayload, String), RecordError> {
        let product_id = hash_value(&fields)?;
        let record_id = hash_value(&RecordIdInput {
            payload_fields: &fields,
            product_id: &product_id,
            timestamp,
        })?;
        Ok((ProductPayload { fields, product_id }, record_id))
    }

    pub fn product_id(&self) -> &str {
        &self.payload.product_id
    }

    pub fn manufacturer(&self) -> &str {
        &self.payload.fields.manufacturer
    }

    /// Whether `id` is this record's id or its product id
    pub fn matches(&self, id: &str) -> bool {
        self.record_id == id || self.payload.product_id == id
    }

    /// Merkle leaf digest of the whole record
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        hash_value(self)
    }

    /// Recompute product id and record id from the stored contents
    pub fn verify_ids(&self) -> Result<(), RecordError> {
        let product_id = hash_value(&self.payload.fields)?;
        if product_id != self.payload.product_id {
            return Err(RecordError::ProductIdMismatch(self.record_id.clone()));
        }

        let record_id = hash_value(&RecordIdInput {
            payload_fields: &self.payload.fields,
            product_id: &self.payload.product_id,
            timestamp: self.timestamp,
        })?;
        if record_id != self.record_id {
            return Err(RecordError::RecordIdMismatch(self.record_id.clone()));
        }

        Ok(())
    }

    /// Check the signature against the manufacturer's registered key
    pub fn verify_signature(&self, registry: &KeyRegistry) -> Result<(), RecordError> {
        if registry.verify(self.manufacturer(), &self.payload, &self.signature) {
            Ok(())
        } else {
            Err(RecordError::InvalidSignature(
                self.record_id.clone(),
                self.manufacturer().to_string(),
            ))
        }
    }

    /// Full record check: ids and signature
    pub fn verify(&self, registry: &KeyRegistry) -> Result<(), RecordError> {
        self.verify_ids()?;
        self.verify_signature(registry)
    }
}
