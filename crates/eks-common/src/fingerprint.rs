//! Node pool version fingerprint
//!
//! A content hash over the launch-affecting configuration of a node pool.
//! Two pools with the same fingerprint are operationally interchangeable; a
//! changed fingerprint means the launch template has to be rolled.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::NodePoolDescriptor;

/// Launch-affecting inputs of a node pool
///
/// Security groups are held in a sorted set so their order never affects the
/// hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FingerprintInput<'a> {
    /// Image reference (AMI id)
    pub image: &'a str,
    /// Volume storage type, empty when defaulted
    pub storage_type: &'a str,
    /// Whether the root volume is encrypted
    pub encrypted: bool,
    /// KMS key used for volume encryption, empty when defaulted
    pub kms_key: &'a str,
    /// Effective root volume size in GiB
    pub volume_size: u32,
    /// Custom security group ids
    pub security_groups: BTreeSet<&'a str>,
}

impl<'a> FingerprintInput<'a> {
    /// Collect the inputs from a descriptor and its effective volume size
    pub fn from_descriptor(pool: &'a NodePoolDescriptor, volume_size: u32) -> Self {
        let (encrypted, kms_key) = match &pool.volume.encryption {
            Some(enc) => (enc.enabled, enc.kms_key.as_deref().unwrap_or_default()),
            None => (false, ""),
        };
        Self {
            image: &pool.image,
            storage_type: pool.volume.storage_type.as_deref().unwrap_or_default(),
            encrypted,
            kms_key,
            volume_size,
            security_groups: pool.security_groups.iter().map(String::as_str).collect(),
        }
    }
}

/// Opaque fingerprint of a node pool's launch configuration
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePoolVersion(String);

impl NodePoolVersion {
    /// Hash the canonical JSON form of `input` with SHA-256
    pub fn compute(input: &FingerprintInput<'_>) -> crate::Result<Self> {
        use aws_lc_rs::digest;
        use std::fmt::Write;

        // serde_json emits struct fields in declaration order, BTreeSet sorted
        let canonical = serde_json::to_vec(input)?;
        let hash = digest::digest(&digest::SHA256, &canonical);
        let hex = hash
            .as_ref()
            .iter()
            .fold(String::with_capacity(64), |mut s, b| {
                let _ = write!(s, "{:02x}", b);
                s
            });
        Ok(Self(hex))
    }

    /// Fingerprint of `pool` at the given effective volume size
    pub fn for_pool(pool: &NodePoolDescriptor, volume_size: u32) -> crate::Result<Self> {
        Self::compute(&FingerprintInput::from_descriptor(pool, volume_size))
    }

    /// The hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePoolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
