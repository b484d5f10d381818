//! Single-shot action timers. Each session has at most one outstanding
//! action; starting a new one supersedes the old, and a per-session
//! sequence number lets the room discard fires from superseded timers.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frame::RoomFrame;

pub struct ActionScheduler {
    frame_tx: mpsc::Sender<RoomFrame>,
    timers: HashMap<String, JoinHandle<()>>,
}

impl ActionScheduler {
    pub fn new(frame_tx: mpsc::Sender<RoomFrame>) -> Self {
        Self {
            frame_tx,
            timers: HashMap::new(),
        }
    }

    /// Schedule an [`RoomFrame::ActionCompleted`] after `duration`,
    /// cancelling any timer already running for the session.
    pub fn start(&mut self, session_id: &str, seq: u64, duration: Duration) {
        self.cancel(session_id);
        let tx = self.frame_tx.clone();
        let sid = session_id.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx
                .send(RoomFrame::ActionCompleted {
                    session_id: sid,
                    seq,
                })
                .await;
        });
        self.timers.insert(session_id.to_owned(), handle);
    }

    pub fn cancel(&mut self, session_id: &str) {
        if let Some(handle) = self.timers.remove(session_id) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_fires_with_seq() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = ActionScheduler::new(tx);
        scheduler.start("p1", 3, Duration::from_millis(10));
        match rx.recv().await.unwrap() {
            RoomFrame::ActionCompleted { session_id, seq } => {
                assert_eq!(session_id, "p1");
                assert_eq!(seq, 3);
            }
            other => panic!("unexpected frame: {}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_suppresses_fire() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = ActionScheduler::new(tx);
        scheduler.start("p1", 1, Duration::from_millis(20));
        scheduler.cancel("p1");
        let got = tokio::time::timeout(Duration::from_millis(80), rx.recv()).await;
        assert!(got.is_err(), "cancelled timer still fired");
    }

    #[tokio::test]
    async fn test_restart_supersedes_previous_timer() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = ActionScheduler::new(tx);
        scheduler.start("p1", 1, Duration::from_millis(15));
        scheduler.start("p1", 2, Duration::from_millis(15));
        match rx.recv().await.unwrap() {
            RoomFrame::ActionCompleted { seq, .. } => assert_eq!(seq, 2),
            other => panic!("unexpected frame: {}", other),
        }
        let extra = tokio::time::timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(extra.is_err(), "superseded timer also fired");
    }
}
