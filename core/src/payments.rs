//! The settlement seam. The broker client implements this trait; tests use
//! an in-memory dummy.

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PaymentsT: Send + Sync {
    /// Whether the broker connection is authenticated with an open funded
    /// channel. When false, [`transfer`](Self::transfer) fails with
    /// [`Error::NotReady`](crate::error::Error::NotReady).
    fn ready(&self) -> bool;

    /// Move `amount` of the configured asset from the server's channel
    /// allocation to `to`'s unified balance. Returns only after the broker
    /// acknowledged the transfer.
    async fn transfer(&self, to: &str, amount: u64) -> Result<()>;
}
