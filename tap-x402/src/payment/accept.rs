//! Accept specs: what a resource will take as payment.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Payment scheme. Only exact-amount payments are defined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// The payer transfers exactly the required amount.
    #[default]
    Exact,
}

/// Network tag understood by facilitators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum NetworkTag {
    /// Solana mainnet.
    Solana,
    /// Solana devnet.
    SolanaDevnet,
    /// Any other tag, passed through verbatim.
    Other(String),
}

impl NetworkTag {
    /// Maps a cluster name to its network tag.
    ///
    /// `mainnet` and `mainnet-beta` (any case) map to [`Solana`](Self::Solana);
    /// every other value, including an empty one, maps to
    /// [`SolanaDevnet`](Self::SolanaDevnet).
    ///
    /// # Examples
    ///
    /// ```
    /// use tap_x402::payment::NetworkTag;
    ///
    /// assert_eq!(NetworkTag::from_cluster("Mainnet-Beta"), NetworkTag::Solana);
    /// assert_eq!(NetworkTag::from_cluster("testnet"), NetworkTag::SolanaDevnet);
    /// ```
    #[must_use]
    pub fn from_cluster(cluster: &str) -> Self {
        match cluster.to_ascii_lowercase().as_str() {
            "mainnet" | "mainnet-beta" => Self::Solana,
            _ => Self::SolanaDevnet,
        }
    }

    /// Wire name of the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Solana => "solana",
            Self::SolanaDevnet => "solana-devnet",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for NetworkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for NetworkTag {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "solana" => Self::Solana,
            "solana-devnet" => Self::SolanaDevnet,
            _ => Self::Other(tag),
        }
    }
}

impl From<NetworkTag> for String {
    fn from(tag: NetworkTag) -> Self {
        match tag {
            NetworkTag::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

/// Declaration of what a resource accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptSpec {
    /// Always [`Scheme::Exact`].
    pub scheme: Scheme,
    /// Settlement network.
    pub network: NetworkTag,
    /// Asset tag, e.g. `SOL` or `USDC`.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Required amount in base units.
    pub max_amount_required: String,
    /// Resource being paid for.
    pub resource: String,
    /// SPL token mint, for token payments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
    /// Token decimals, for token payments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl AcceptSpec {
    /// Creates an exact-scheme spec; `cluster` is mapped through
    /// [`NetworkTag::from_cluster`].
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn new(
        cluster: &str,
        asset: impl Into<String>,
        pay_to: impl Into<String>,
        max_amount_required: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            scheme: Scheme::Exact,
            network: NetworkTag::from_cluster(cluster),
            asset: asset.into(),
            pay_to: pay_to.into(),
            max_amount_required: max_amount_required.into(),
            resource: resource.into(),
            token_mint: None,
            decimals: None,
        }
    }

    /// Sets the SPL token mint and decimals.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn with_token(mut self, mint: impl Into<String>, decimals: u8) -> Self {
        self.token_mint = Some(mint.into());
        self.decimals = Some(decimals);
        self
    }
}
