// Authentication types

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Seconds a freshly minted access token stays usable
pub const TOKEN_LIFETIME_SECS: f64 = 500.0;

/// Hex digits of the credential digest kept in the partition key
const PARTITION_DIGEST_LEN: usize = 16;

/// Credentials used to log in to Preservica
///
/// Also identifies the token cache partition. The partition key carries a
/// digest of all three fields, so the password never reaches disk in clear.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    username: String,
    password: String,
    tenant: String,
}

impl CredentialSet {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            tenant: tenant.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Stable key naming this credential set's cache partition
    ///
    /// `<user>@<tenant>-<digest>`: the readable prefix is lossy, the digest
    /// over the full (username, password, tenant) tuple keeps keys distinct.
    pub fn partition_key(&self) -> String {
        format!(
            "{}@{}-{}",
            sanitize_component(&self.username),
            sanitize_component(&self.tenant),
            self.digest()
        )
    }

    /// Truncated SHA-256 over the length-prefixed fields
    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [&self.username, &self.password, &self.tenant] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let hex = format!("{:x}", hasher.finalize());
        hex[..PARTITION_DIGEST_LEN].to_string()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// Replace anything that is not safe inside a file name
fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Access token together with the time it was issued
#[derive(Debug, Clone, PartialEq)]
pub struct CachedToken {
    /// Issue time in seconds since the Unix epoch
    pub issued_at: f64,
    pub value: String,
}

impl CachedToken {
    pub fn new(issued_at: f64, value: impl Into<String>) -> Self {
        Self {
            issued_at,
            value: value.into(),
        }
    }

    /// Usable strictly before `TOKEN_LIFETIME_SECS` have elapsed
    pub fn is_valid_at(&self, now: f64) -> bool {
        now - self.issued_at < TOKEN_LIFETIME_SECS
    }

    /// Serialize to the two-line cache record
    pub fn to_record(&self) -> String {
        format!("{}\n{}", self.issued_at, self.value)
    }

    /// Parse a two-line cache record, `None` if either field is missing
    pub fn from_record(record: &str) -> Option<Self> {
        let (issued_at, value) = record.split_once('\n')?;
        let issued_at: f64 = issued_at.trim().parse().ok()?;
        if !issued_at.is_finite() {
            return None;
        }

        let value = value.trim_end_matches(['\r', '\n']);
        if value.is_empty() {
            return None;
        }

        Some(Self::new(issued_at, value))
    }
}

/// Login endpoint response
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}
