use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::ResourceLimits;

const FINGERPRINT_VERSION: &[u8] = b"code-runner/v1";

/// Content digest identifying a submission for caching and deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest over language, source, stdin and limits. Fields are length-prefixed
    /// so that no two distinct submissions share an encoding.
    pub fn compute(language: &str, source: &str, stdin: Option<&str>, limits: &ResourceLimits) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION);
        update_field(&mut hasher, language.as_bytes());
        update_field(&mut hasher, source.as_bytes());
        match stdin {
            Some(input) => {
                hasher.update([1u8]);
                update_field(&mut hasher, input.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(limits.time_limit_ms.to_le_bytes());
        hasher.update(limits.memory_limit_bytes.to_le_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
