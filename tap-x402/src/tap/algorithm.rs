//! Signature algorithms supported by the TAP profile.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// TAP signature algorithm.
///
/// Each variant pairs with its own key material type in
/// [`SigningSecret`](crate::tap::SigningSecret) and [`KeyMaterial`](crate::tap::KeyMaterial).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Ed25519 detached signatures over the UTF-8 signature base.
    #[serde(rename = "ed25519")]
    Ed25519,
    /// RSASSA-PSS with SHA-256, MGF1-SHA256 and maximum salt length.
    #[serde(rename = "rsa-pss-sha256")]
    RsaPssSha256,
}

impl Algorithm {
    /// Wire name used in the `alg` attribute.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::RsaPssSha256 => "rsa-pss-sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = BridgeError;

    /// Parses an algorithm name, ignoring ASCII case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.eq_ignore_ascii_case("ed25519") {
            Ok(Self::Ed25519)
        } else if name.eq_ignore_ascii_case("rsa-pss-sha256") {
            Ok(Self::RsaPssSha256)
        } else {
            Err(BridgeError::UnsupportedAlgorithm(name.to_owned()))
        }
    }
}
