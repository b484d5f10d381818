//! The per-room wager book. The broker owns the funds; the ledger's
//! guarantee is that every room which collected stakes settles exactly
//! once, either a payout to the winner or a refund of every record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cove_core::error::{Error, Result};
use cove_core::payments::PaymentsT;
use cove_core::types::WagerRecord;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const TRANSFER_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

pub struct WagerLedger {
    payments: Arc<dyn PaymentsT>,
    books: Mutex<HashMap<String, Vec<WagerRecord>>>,
}

impl WagerLedger {
    pub fn new(payments: Arc<dyn PaymentsT>) -> Self {
        Self {
            payments,
            books: Mutex::new(HashMap::new()),
        }
    }

    /// Append a record. Idempotent per player: a second confirmation in
    /// the same room is a no-op. Returns whether the record was fresh.
    pub async fn record(&self, room: &str, rec: WagerRecord) -> bool {
        let mut books = self.books.lock().await;
        let book = books.entry(room.to_owned()).or_default();
        if book.iter().any(|r| r.player_id == rec.player_id) {
            return false;
        }
        info!("[{}] Wager recorded: {} stakes {}", room, rec.player_id, rec.amount);
        book.push(rec);
        true
    }

    pub async fn all_staked(&self, room: &str, player_ids: &[String]) -> bool {
        let books = self.books.lock().await;
        let Some(book) = books.get(room) else {
            return false;
        };
        player_ids
            .iter()
            .all(|id| book.iter().any(|r| &r.player_id == id))
    }

    pub async fn pot(&self, room: &str) -> u64 {
        let books = self.books.lock().await;
        books
            .get(room)
            .map(|book| book.iter().map(|r| r.amount).sum())
            .unwrap_or(0)
    }

    /// Transfer the whole pot to the winner and clear the book. The pot is
    /// returned even when the transfer exhausted its retry budget; the
    /// failure is left to operator reconciliation.
    pub async fn payout(&self, room: &str, winner_address: &str) -> u64 {
        let records = self.drain(room).await;
        let pot: u64 = records.iter().map(|r| r.amount).sum();
        if pot == 0 {
            return 0;
        }
        match self.transfer_with_retry(winner_address, pot).await {
            Ok(()) => info!("[{}] Paid out {} to {}", room, pot, winner_address),
            Err(e) => error!(
                "[{}] Payout of {} to {} failed, left for reconciliation: {}",
                room, pot, winner_address, e
            ),
        }
        pot
    }

    /// Return every stake to its owner, continuing past individual
    /// failures, then clear the book.
    pub async fn refund_all(&self, room: &str) {
        let records = self.drain(room).await;
        for rec in records {
            match self.transfer_with_retry(&rec.address, rec.amount).await {
                Ok(()) => info!("[{}] Refunded {} to {}", room, rec.amount, rec.player_id),
                Err(e) => error!(
                    "[{}] Refund of {} to {} failed, left for reconciliation: {}",
                    room, rec.amount, rec.address, e
                ),
            }
        }
    }

    /// Refund and remove a single player's stake, used when a player backs
    /// out of a lobby before the game starts.
    pub async fn refund_player(&self, room: &str, player_id: &str) {
        let rec = {
            let mut books = self.books.lock().await;
            books.get_mut(room).and_then(|book| {
                book.iter()
                    .position(|r| r.player_id == player_id)
                    .map(|i| book.remove(i))
            })
        };
        if let Some(rec) = rec {
            match self.transfer_with_retry(&rec.address, rec.amount).await {
                Ok(()) => info!("[{}] Refunded {} to leaving {}", room, rec.amount, player_id),
                Err(e) => error!(
                    "[{}] Refund of {} to {} failed, left for reconciliation: {}",
                    room, rec.amount, rec.address, e
                ),
            }
        }
    }

    async fn drain(&self, room: &str) -> Vec<WagerRecord> {
        self.books.lock().await.remove(room).unwrap_or_default()
    }

    async fn transfer_with_retry(&self, to: &str, amount: u64) -> Result<()> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last = Error::NotReady;
        for attempt in 1..=TRANSFER_ATTEMPTS {
            match self.payments.transfer(to, amount).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Transfer attempt {}/{} of {} to {} failed: {}",
                        attempt, TRANSFER_ATTEMPTS, amount, to, e
                    );
                    last = e;
                }
            }
            if attempt < TRANSFER_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Records transfers instead of talking to a broker; addresses in
    /// `failing` always error.
    #[derive(Default)]
    pub struct DummyPayments {
        pub transfers: std::sync::Mutex<Vec<(String, u64)>>,
        pub failing: std::sync::Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl PaymentsT for DummyPayments {
        fn ready(&self) -> bool {
            true
        }

        async fn transfer(&self, to: &str, amount: u64) -> Result<()> {
            if self.failing.lock().unwrap().contains(to) {
                return Err(Error::TransferFailed(to.to_owned()));
            }
            self.transfers.lock().unwrap().push((to.to_owned(), amount));
            Ok(())
        }
    }
}
