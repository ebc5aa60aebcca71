//! Per-installation device identity used to key rate limits and annotate writes.

use crate::clock::Clock;
use crate::platform::get_platform;
use crate::store::{keys, Store};
use crate::{FixerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

/// Length of a device id in hex characters.
pub const DEVICE_ID_LEN: usize = 32;

/// A device identity: stable opaque id + creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub created_at: DateTime<Utc>,
}

impl DeviceIdentity {
    /// Derive a fresh identity. Not persisted.
    pub fn generate(clock: &dyn Clock) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(Uuid::new_v4().as_bytes());
        hasher.update(get_platform().as_bytes());
        let digest = hex::encode(hasher.finalize());

        Self {
            device_id: digest[..DEVICE_ID_LEN].to_string(),
            created_at: clock.now(),
        }
    }

    /// Load the persisted identity, creating and saving one on first use.
    pub fn load_or_create(store: &dyn Store, clock: &dyn Clock) -> Result<Self> {
        if let Some(identity) = store.load::<Self>(keys::DEVICE_IDENTITY)? {
            identity.validate()?;
            return Ok(identity);
        }

        let identity = Self::generate(clock);
        store.save(keys::DEVICE_IDENTITY, &identity)?;
        info!(device_id = %identity.device_id, "Created device identity");
        Ok(identity)
    }

    fn validate(&self) -> Result<()> {
        let well_formed = self.device_id.len() == DEVICE_ID_LEN
            && self.device_id.chars().all(|c| c.is_ascii_hexdigit());
        if !well_formed {
            return Err(FixerError::InvalidInput(format!(
                "Stored device id is malformed: {:?}",
                self.device_id
            )));
        }
        Ok(())
    }
}
