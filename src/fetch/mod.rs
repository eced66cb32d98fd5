pub mod nse;

use anyhow::Result;
use async_trait::async_trait;

use crate::chain::Snapshot;

pub use nse::NseClient;

/// Anything that can produce the current option-chain snapshot for a symbol.
///
/// An empty snapshot means the upstream has not published data yet; that is
/// not an error. Transport failures are.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<Snapshot>;
}
