use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use cove_core::error::{Error, Result};
use cove_core::payments::PaymentsT;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::auth::{
    authorization_hash, sig_to_hex, SESSION_SCOPE, SESSION_TTL_SECS,
};
use crate::rpc::{Envelope, Request};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub ws_url: String,
    /// Wallet private key, hex with optional 0x prefix.
    pub private_key: String,
    /// Asset symbol the channel is funded with.
    pub asset: String,
    pub custody: Option<String>,
    pub adjudicator: Option<String>,
    /// Collateral allocated when a fresh channel has to be created.
    pub channel_collateral: u64,
}

/// One persistent, authenticated connection to the broker. Cheap to clone;
/// all clones share the connection.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: BrokerConfig,
    wallet: PrivateKeySigner,
    session: PrivateKeySigner,
    next_id: AtomicU64,
    ready: AtomicBool,
    reconnecting: AtomicBool,
    conn: Mutex<Option<mpsc::Sender<Message>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    channel_id: Mutex<Option<String>>,
}

impl BrokerClient {
    /// Dial the broker, authenticate the session key and make sure a funded
    /// channel exists. Errors here are fatal for the caller; later
    /// disconnects are handled by an internal reconnect loop.
    pub async fn connect(cfg: BrokerConfig) -> Result<Self> {
        let key = cfg.private_key.trim_start_matches("0x");
        let wallet = PrivateKeySigner::from_str(key)
            .map_err(|e| Error::AuthFailed(format!("invalid private key: {}", e)))?;
        let session = PrivateKeySigner::random();

        info!(
            "Broker wallet address: {}, session key: {}",
            wallet.address(),
            session.address()
        );

        let client = Self {
            inner: Arc::new(Inner {
                cfg,
                wallet,
                session,
                next_id: AtomicU64::new(1),
                ready: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                conn: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                channel_id: Mutex::new(None),
            }),
        };

        client.open_connection().await?;
        Ok(client)
    }

    /// The server's wallet address, given to clients as the wager
    /// destination.
    pub fn address(&self) -> String {
        format!("{:?}", self.inner.wallet.address())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    fn open_connection(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.open_connection_inner())
    }

    async fn open_connection_inner(&self) -> Result<()> {
        let (ws, _) = connect_async(self.inner.cfg.ws_url.as_str())
            .await
            .map_err(|e| Error::RpcError(format!("broker dial failed: {}", e)))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        *self.inner.conn.lock().await = Some(out_tx);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => this.dispatch(&text).await,
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => (),
                }
            }
            this.on_disconnect().await;
        });

        if let Err(e) = self.authenticate().await {
            self.teardown().await;
            return Err(e);
        }
        if let Err(e) = self.ensure_channel().await {
            self.teardown().await;
            return Err(e);
        }

        self.inner.ready.store(true, Ordering::SeqCst);
        info!("Broker connection ready");
        Ok(())
    }

    async fn dispatch(&self, text: &str) {
        let env: Envelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                warn!("Unparseable broker frame: {}", e);
                return;
            }
        };
        if let Some(id) = env.id {
            let tx = self.inner.pending.lock().await.remove(&id);
            if let Some(tx) = tx {
                let outcome = match env.error {
                    Some(err) => Err(Error::RpcError(format!("{}: {}", err.code, err.message))),
                    None => Ok(env.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
        } else if let Some(method) = env.method {
            // Balance and channel updates pushed by the broker; the channel
            // state is re-read on reconnect, so observing them is enough.
            debug!("Broker push: {} {:?}", method, env.params);
        }
    }

    async fn on_disconnect(&self) {
        self.inner.ready.store(false, Ordering::SeqCst);
        *self.inner.conn.lock().await = None;

        let in_flight = {
            let mut pending = self.inner.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        if in_flight > 0 {
            warn!("Broker connection lost with {} outbound in flight", in_flight);
        } else {
            warn!("Broker connection lost");
        }

        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let mut delay = Duration::from_secs(1);
            loop {
                tokio::time::sleep(delay).await;
                match this.open_connection().await {
                    Ok(()) => {
                        this.inner.reconnecting.store(false, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        warn!("Broker reconnect failed: {}", e);
                        delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                    }
                }
            }
        });
    }

    async fn teardown(&self) {
        *self.inner.conn.lock().await = None;
        self.inner.pending.lock().await.clear();
    }

    async fn request_inner(
        &self,
        method: &str,
        params: Value,
        sig: Option<String>,
    ) -> Result<Value> {
        let out_tx = self
            .inner
            .conn
            .lock()
            .await
            .clone()
            .ok_or(Error::NotReady)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&Request {
            id,
            method,
            params,
            sig,
        })
        .map_err(|e| Error::InternalError(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        if out_tx.send(Message::Text(frame.into())).await.is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(Error::NotReady);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            // The reader drained the pending map on disconnect.
            Ok(Err(_)) => Err(Error::NotReady),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                Err(Error::RpcError(format!("{} timed out", method)))
            }
        }
    }

    /// A request signed by the session key, proving key ownership.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let payload = serde_json::to_string(&params)
            .map_err(|e| Error::InternalError(e.to_string()))?;
        let sig = self
            .inner
            .session
            .sign_message(payload.as_bytes())
            .await
            .map_err(|e| Error::RpcError(format!("session signing failed: {}", e)))?;
        self.request_inner(method, params, Some(sig_to_hex(&sig)))
            .await
    }

    async fn authenticate(&self) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let expires_at = now + SESSION_TTL_SECS;

        let wallet_addr = self.inner.wallet.address();
        let session_addr = self.inner.session.address();
        let hash = authorization_hash(wallet_addr, session_addr, expires_at);
        let sig = self
            .inner
            .wallet
            .sign_hash(&hash)
            .await
            .map_err(|e| Error::AuthFailed(e.to_string()))?;

        let result = self
            .request_inner(
                "auth_request",
                json!({
                    "wallet": format!("{:?}", wallet_addr),
                    "sessionKey": format!("{:?}", session_addr),
                    "scope": SESSION_SCOPE,
                    "expiresAt": expires_at,
                    "signature": sig_to_hex(&sig),
                }),
                None,
            )
            .await
            .map_err(|e| Error::AuthFailed(e.to_string()))?;

        let challenge = result
            .get("challenge")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::AuthFailed("missing challenge".into()))?
            .to_owned();

        let challenge_sig = self
            .inner
            .session
            .sign_message(challenge.as_bytes())
            .await
            .map_err(|e| Error::AuthFailed(e.to_string()))?;

        let verified = self
            .request_inner(
                "auth_verify",
                json!({
                    "challenge": challenge,
                    "signature": sig_to_hex(&challenge_sig),
                }),
                None,
            )
            .await
            .map_err(|e| Error::AuthFailed(e.to_string()))?;

        if verified.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(Error::AuthFailed("broker rejected session key".into()));
        }

        info!("Broker session authenticated");
        Ok(())
    }

    /// Make sure exactly one open funded channel exists for the configured
    /// asset, creating and resizing one when needed.
    async fn ensure_channel(&self) -> Result<()> {
        let result = self
            .request(
                "get_channels",
                json!({ "participant": format!("{:?}", self.inner.wallet.address()) }),
            )
            .await
            .map_err(|e| Error::ChannelUnavailable(e.to_string()))?;

        let asset = self.inner.cfg.asset.as_str();
        let existing = result
            .get("channels")
            .and_then(Value::as_array)
            .and_then(|channels| {
                channels.iter().find(|c| {
                    c.get("status").and_then(Value::as_str) == Some("open")
                        && c.get("asset").and_then(Value::as_str) == Some(asset)
                })
            })
            .and_then(|c| c.get("channelId"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let channel_id = match existing {
            Some(id) => {
                info!("Reusing open channel {}", id);
                id
            }
            None => {
                let created = self
                    .request(
                        "create_channel",
                        json!({
                            "asset": asset,
                            "custody": self.inner.cfg.custody,
                            "adjudicator": self.inner.cfg.adjudicator,
                        }),
                    )
                    .await
                    .map_err(|e| Error::ChannelUnavailable(e.to_string()))?;
                let id = created
                    .get("channelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::ChannelUnavailable("missing channelId".into()))?
                    .to_owned();

                self.request(
                    "resize_channel",
                    json!({
                        "channelId": id,
                        "allocateAmount": self.inner.cfg.channel_collateral,
                    }),
                )
                .await
                .map_err(|e| Error::ChannelUnavailable(e.to_string()))?;

                info!("Created and funded channel {}", id);
                id
            }
        };

        *self.inner.channel_id.lock().await = Some(channel_id);
        Ok(())
    }

    pub async fn transfer(&self, to: &str, amount: u64) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        let channel_id = self.inner.channel_id.lock().await.clone();
        let result = self
            .request(
                "transfer",
                json!({
                    "channelId": channel_id,
                    "destination": to,
                    "asset": self.inner.cfg.asset,
                    "amount": amount,
                }),
            )
            .await?;

        if result.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(Error::TransferFailed(result.to_string()));
        }
        debug!("Transferred {} {} to {}", amount, self.inner.cfg.asset, to);
        Ok(())
    }
}

#[async_trait]
impl PaymentsT for BrokerClient {
    fn ready(&self) -> bool {
        self.is_ready()
    }

    async fn transfer(&self, to: &str, amount: u64) -> Result<()> {
        BrokerClient::transfer(self, to, amount).await
    }
}
