//! Profile transfer framing
//!
//! A profile is streamed as two commands: first `hash,<md5>` announcing the
//! digest of the JSON body, then the body itself wrapped as `json\n<body>`.
//! The core recomputes the MD5 over the body and rejects a mismatch, so the
//! digest must cover exactly the bytes between the prefix and the ETX.

use crate::error::Result;
use crate::protocol::{hash_command, json_envelope};
use md5::{Digest, Md5};
use serde_json::Value;
use std::time::Duration;

/// Lowercase hex MD5 of `payload`
pub fn digest_hex(payload: &str) -> String {
    format!("{:x}", Md5::digest(payload.as_bytes()))
}

/// A profile serialized and ready to stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedProfile {
    /// Compact JSON body
    pub payload: String,
    pub digest: String,
}

impl PreparedProfile {
    pub fn new(profile: &Value) -> Result<Self> {
        let payload = serde_json::to_string(profile)?;
        let digest = digest_hex(&payload);
        Ok(Self { payload, digest })
    }

    /// The hash command followed by the JSON envelope, in sending order
    pub fn frames(&self) -> [Vec<u8>; 2] {
        [hash_command(&self.digest), json_envelope(&self.payload)]
    }
}

/// Transfer duration for logs: milliseconds above 10 ms, microseconds below
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed > Duration::from_millis(10) {
        format!("{} ms", elapsed.as_millis())
    } else {
        format!("{} µs", elapsed.as_micros())
    }
}
