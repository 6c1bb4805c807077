//! Wire types for the Cosmos SDK REST and Tendermint RPC responses we read.

use serde::{Deserialize, Deserializer, Serialize};

/// A scheduled software upgrade as reported by `x/upgrade`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePlan {
    pub name: String,
    #[serde(deserialize_with = "de_height")]
    pub height: u64,
    #[serde(default)]
    pub info: Option<String>,
}

impl UpgradePlan {
    /// Some chains answer with a zero-valued plan instead of `null`.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.height == 0
    }

    pub fn info(&self) -> Option<&str> {
        self.info.as_deref().filter(|i| !i.trim().is_empty())
    }

    /// Blocks left until `height`, zero once it has been reached.
    pub fn blocks_remaining(&self, current_height: u64) -> u64 {
        self.height.saturating_sub(current_height)
    }
}

/// Heights are int64 in protobuf and therefore JSON strings over REST.
fn de_height<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Height {
        Str(String),
        Num(u64),
    }

    match Height::deserialize(deserializer)? {
        Height::Num(n) => Ok(n),
        Height::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// `GET <rpc>/status` (subset).
#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    pub result: StatusResult,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResult {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncInfo {
    #[serde(deserialize_with = "de_height")]
    pub latest_block_height: u64,
}

/// `GET <rest>/cosmos/base/tendermint/v1beta1/blocks/latest` (subset).
#[derive(Debug, Deserialize)]
pub(crate) struct LatestBlockResponse {
    pub block: Block,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Block {
    pub header: BlockHeader,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockHeader {
    #[serde(deserialize_with = "de_height")]
    pub height: u64,
}
