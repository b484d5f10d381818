//! The room state machine. A room owns its members and rules and processes
//! every input (client messages, timer fires, action completions, the
//! settlement outcome) in FIFO order on a single task, so no lock is held
//! across gameplay logic and no broker call ever blocks a turn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cove_core::error::{Error, Result};
use cove_core::protocol::{ClientMessage, ServerMessage};
use cove_core::types::{
    CurrentAction, EndReason, Phase, PlayerSnapshot, Resource, UpgradeKind, Upgrades, Vec3,
    WagerRecord, MAP_REVEAL_RADIUS,
};
use cove_mapgen::{chest_position, generate_resources, is_on_island, RESOURCE_COUNT};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::frame::RoomFrame;
use crate::game::ledger::WagerLedger;
use crate::game::scheduler::ActionScheduler;
use crate::session::{PlayerSession, SessionInfo};

const FRAME_BUFFER: usize = 128;
const MIN_DIG_MS: u64 = 10;

/// Routing handle held by the matchmaker and the gateway.
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub frame_tx: mpsc::Sender<RoomFrame>,
    pub joinable: Arc<AtomicBool>,
}

pub struct GameRoom {
    id: String,
    cfg: Arc<Config>,
    ledger: Arc<WagerLedger>,
    server_address: String,
    asset: String,
    seed: u32,
    phase: Phase,
    members: HashMap<String, PlayerSession>,
    member_order: Vec<String>,
    resources: Vec<Resource>,
    chest: Vec3,
    frame_tx: mpsc::Sender<RoomFrame>,
    joinable: Arc<AtomicBool>,
    scheduler: ActionScheduler,
    countdown_gen: u64,
    countdown: Option<JoinHandle<()>>,
    sync_task: Option<JoinHandle<()>>,
    timeout_task: Option<JoinHandle<()>>,
    end: Option<(Option<String>, EndReason)>,
    payout_done: bool,
    grace_elapsed: bool,
    lobby_closed: bool,
}

impl GameRoom {
    pub fn spawn(
        cfg: Arc<Config>,
        ledger: Arc<WagerLedger>,
        seed: u32,
        server_address: String,
        asset: String,
    ) -> (RoomHandle, JoinHandle<()>) {
        let id = format!("room-{}", Uuid::new_v4());
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let joinable = Arc::new(AtomicBool::new(true));

        let room = GameRoom {
            id: id.clone(),
            cfg,
            ledger,
            server_address,
            asset,
            seed,
            phase: Phase::Lobby,
            members: HashMap::new(),
            member_order: Vec::new(),
            resources: Vec::new(),
            chest: Vec3::default(),
            frame_tx: frame_tx.clone(),
            joinable: joinable.clone(),
            scheduler: ActionScheduler::new(frame_tx.clone()),
            countdown_gen: 0,
            countdown: None,
            sync_task: None,
            timeout_task: None,
            end: None,
            payout_done: false,
            grace_elapsed: false,
            lobby_closed: false,
        };

        let handle = RoomHandle {
            id,
            frame_tx,
            joinable,
        };
        let join = tokio::spawn(room.run(frame_rx));
        (handle, join)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RoomFrame>) {
        info!("[{}] Room created, seed = {}", self.id, self.seed);
        while let Some(frame) = rx.recv().await {
            match frame {
                RoomFrame::Shutdown => break,
                frame => self.handle_frame(frame).await,
            }
            if self.should_close() {
                break;
            }
        }
        self.scheduler.cancel_all();
        self.abort_timers();
        self.joinable.store(false, Ordering::SeqCst);
        info!("[{}] Room retired", self.id);
    }

    async fn handle_frame(&mut self, frame: RoomFrame) {
        match frame {
            RoomFrame::ClientMsg { session_id, msg } => {
                self.handle_client_msg(&session_id, msg).await;
            }
            RoomFrame::PlayerJoining { session, reply } => {
                let outcome = self.add_member(session);
                let _ = reply.send(outcome);
            }
            RoomFrame::PlayerLeaving { session_id } => {
                self.remove_member(&session_id).await;
            }
            RoomFrame::ActionCompleted { session_id, seq } => {
                self.on_action_completed(&session_id, seq).await;
            }
            RoomFrame::CountdownFired { gen } => {
                if self.phase == Phase::Lobby && self.countdown.is_some() && gen == self.countdown_gen
                {
                    self.countdown = None;
                    self.start_game();
                }
            }
            RoomFrame::TimeoutFired => {
                if self.phase == Phase::Playing {
                    info!("[{}] Game timed out", self.id);
                    self.end_game(None, EndReason::Timeout);
                }
            }
            RoomFrame::SyncTick => {
                if self.phase == Phase::Playing {
                    self.broadcast(&ServerMessage::PlayersSync {
                        players: self.snapshots(),
                    });
                }
            }
            RoomFrame::PayoutDone { winner_id, amount } => {
                self.broadcast(&ServerMessage::PayoutComplete { winner_id, amount });
                self.payout_done = true;
            }
            RoomFrame::DestroyFired => {
                self.grace_elapsed = true;
            }
            RoomFrame::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    // ─── membership ─────────────────────────────────────────────────────

    fn add_member(&mut self, info: SessionInfo) -> Result<()> {
        if self.phase != Phase::Lobby || self.countdown.is_some() {
            return Err(Error::WrongPhase);
        }
        if self.members.len() >= self.cfg.max_players {
            return Err(Error::RoomIsFull(self.cfg.max_players as u32));
        }

        let player_id = info.id.clone();
        self.members.insert(player_id.clone(), PlayerSession::new(info));
        self.member_order.push(player_id.clone());
        self.update_joinable();

        let snapshots = self.snapshots();
        let member = &self.members[&player_id];
        member.send(ServerMessage::RoomJoined {
            room_id: self.id.clone(),
            player_id: player_id.clone(),
            phase: self.phase,
            players: snapshots,
        });
        member.send(ServerMessage::WagerRequired {
            amount: self.cfg.wager_amount,
            server_address: self.server_address.clone(),
            asset: self.asset.clone(),
        });

        info!(
            "[{}] {} joined ({}/{})",
            self.id,
            player_id,
            self.members.len(),
            self.cfg.max_players
        );
        Ok(())
    }

    async fn remove_member(&mut self, session_id: &str) {
        let Some(member) = self.members.remove(session_id) else {
            return;
        };
        self.member_order.retain(|id| id != session_id);
        self.scheduler.cancel(session_id);
        self.update_joinable();

        info!("[{}] {} left", self.id, session_id);
        self.broadcast(&ServerMessage::PlayerLeft {
            player_id: session_id.to_owned(),
        });

        match self.phase {
            Phase::Lobby => {
                if member.wagered {
                    // Their stake must not end up in someone else's pot.
                    let ledger = self.ledger.clone();
                    let room_id = self.id.clone();
                    let player_id = session_id.to_owned();
                    tokio::spawn(async move {
                        ledger.refund_player(&room_id, &player_id).await;
                    });
                }
                if self.countdown.is_some() && self.members.len() < self.cfg.min_players {
                    self.abort_countdown_and_refund();
                } else {
                    self.maybe_start_countdown().await;
                }
                if self.members.is_empty() {
                    self.lobby_closed = true;
                }
            }
            Phase::Playing => {
                // The leaver forfeits; their record stays in the book.
                if self.members.is_empty() {
                    self.end_game(None, EndReason::Abandoned);
                }
            }
            Phase::Ended => (),
        }
    }

    fn update_joinable(&self) {
        let joinable = self.phase == Phase::Lobby
            && self.countdown.is_none()
            && self.members.len() < self.cfg.max_players;
        self.joinable.store(joinable, Ordering::SeqCst);
    }

    fn snapshots(&self) -> Vec<PlayerSnapshot> {
        self.member_order
            .iter()
            .filter_map(|id| self.members.get(id))
            .map(PlayerSession::snapshot)
            .collect()
    }

    fn broadcast(&self, msg: &ServerMessage) {
        for member in self.members.values() {
            member.send(msg.clone());
        }
    }

    // ─── client messages ────────────────────────────────────────────────

    async fn handle_client_msg(&mut self, session_id: &str, msg: ClientMessage) {
        if !self.members.contains_key(session_id) {
            return;
        }
        match msg {
            ClientMessage::WagerConfirmed => self.on_wager_confirmed(session_id).await,
            ClientMessage::Ready => {
                // Resync for late-loading clients.
                let snapshots = self.snapshots();
                self.send_to(session_id, ServerMessage::PlayersSync { players: snapshots });
            }
            ClientMessage::LeaveRoom => self.remove_member(session_id).await,
            ClientMessage::PositionUpdate { position } => {
                self.on_position_update(session_id, position);
            }
            ClientMessage::StartHarvest { resource_id } => {
                self.on_start_harvest(session_id, &resource_id);
            }
            ClientMessage::StartDig { position } => self.on_start_dig(session_id, position),
            ClientMessage::CancelHarvest => self.on_cancel(session_id, CurrentAction::Harvesting),
            ClientMessage::CancelDig => self.on_cancel(session_id, CurrentAction::Digging),
            ClientMessage::Ping { t } => self.send_to(session_id, ServerMessage::Pong { t }),
            ClientMessage::JoinRoom { .. } => {
                self.send_to(session_id, ServerMessage::error(Error::AlreadyInRoom.to_string()));
            }
        }
    }

    fn send_to(&self, session_id: &str, msg: ServerMessage) {
        if let Some(member) = self.members.get(session_id) {
            member.send(msg);
        }
    }

    fn send_error(&self, session_id: &str, err: Error) {
        self.send_to(session_id, ServerMessage::error(err.to_string()));
    }

    // ─── wagers and countdown ───────────────────────────────────────────

    async fn on_wager_confirmed(&mut self, session_id: &str) {
        if self.phase != Phase::Lobby {
            self.send_error(session_id, Error::WrongPhase);
            return;
        }
        let Some(member) = self.members.get_mut(session_id) else {
            return;
        };
        // The client's confirmation is taken at face value; the stake
        // lands on the broker asynchronously.
        let rec = WagerRecord {
            player_id: member.id.clone(),
            address: member.address.clone(),
            amount: self.cfg.wager_amount,
            timestamp: now_ms(),
        };
        member.wagered = true;
        let fresh = self.ledger.record(&self.id, rec).await;
        if fresh {
            self.broadcast(&ServerMessage::WagerAccepted {
                player_id: session_id.to_owned(),
            });
        }
        self.maybe_start_countdown().await;
    }

    async fn maybe_start_countdown(&mut self) {
        if self.phase != Phase::Lobby
            || self.countdown.is_some()
            || self.members.len() < self.cfg.min_players
        {
            return;
        }
        let ids: Vec<String> = self.member_order.clone();
        if !self.ledger.all_staked(&self.id, &ids).await {
            return;
        }

        self.countdown_gen += 1;
        let gen = self.countdown_gen;
        let tx = self.frame_tx.clone();
        let countdown_ms = self.cfg.countdown_ms;
        self.countdown = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(countdown_ms)).await;
            let _ = tx.send(RoomFrame::CountdownFired { gen }).await;
        }));
        self.update_joinable();

        info!("[{}] All staked, countdown {} ms", self.id, countdown_ms);
        self.broadcast(&ServerMessage::GameStarting {
            countdown: countdown_ms,
        });
    }

    fn abort_countdown_and_refund(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
        self.countdown_gen += 1;
        self.update_joinable();

        info!("[{}] Countdown aborted, refunding stakes", self.id);
        let ledger = self.ledger.clone();
        let room_id = self.id.clone();
        tokio::spawn(async move {
            ledger.refund_all(&room_id).await;
        });

        for member in self.members.values_mut() {
            member.wagered = false;
        }
        let wager_required = ServerMessage::WagerRequired {
            amount: self.cfg.wager_amount,
            server_address: self.server_address.clone(),
            asset: self.asset.clone(),
        };
        self.broadcast(&wager_required);
    }

    // ─── playing ────────────────────────────────────────────────────────

    fn start_game(&mut self) {
        self.phase = Phase::Playing;
        self.update_joinable();
        self.resources = generate_resources(self.seed, RESOURCE_COUNT);
        self.chest = chest_position(self.seed);

        let started = now_ms();
        for member in self.members.values_mut() {
            member.last_position_ms = started;
        }

        info!(
            "[{}] Game started, {} resources, {} players",
            self.id,
            self.resources.len(),
            self.members.len()
        );
        self.broadcast(&ServerMessage::GameStarted {
            seed: self.seed,
            resources: self.resources.clone(),
        });

        let tx = self.frame_tx.clone();
        let rate = Duration::from_millis(self.cfg.sync_broadcast_rate_ms);
        self.sync_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rate);
            ticker.tick().await; // the first tick is immediate
            loop {
                ticker.tick().await;
                if tx.send(RoomFrame::SyncTick).await.is_err() {
                    break;
                }
            }
        }));

        let tx = self.frame_tx.clone();
        let timeout = Duration::from_millis(self.cfg.game_timeout_ms);
        self.timeout_task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(RoomFrame::TimeoutFired).await;
        }));
    }

    fn on_position_update(&mut self, session_id: &str, position: Vec3) {
        if self.phase != Phase::Playing {
            self.send_error(session_id, Error::WrongPhase);
            return;
        }
        let now = now_ms();
        let Some(member) = self.members.get_mut(session_id) else {
            return;
        };
        if member.current_action != CurrentAction::Idle {
            // Rooted while harvesting or digging.
            let msg = ServerMessage::error(Error::PlayerBusy.to_string());
            member.send(msg);
            return;
        }
        let dt_ms = now.saturating_sub(member.last_position_ms);
        if dt_ms < self.cfg.position_min_interval_ms {
            return;
        }
        let distance = member.position.horizontal_distance(&position);
        let dt = dt_ms as f64 / 1000.0;
        let allowed =
            self.cfg.max_speed * member.upgrades.speed_multiplier * self.cfg.speed_tolerance;
        if dt > 0.0 && distance / dt > allowed {
            let msg = ServerMessage::error(Error::MovingTooFast.to_string());
            member.send(msg);
            return;
        }
        member.position = position;
        member.last_position_ms = now;
        self.broadcast(&ServerMessage::PlayerMoved {
            player_id: session_id.to_owned(),
            position,
        });
    }

    fn on_start_harvest(&mut self, session_id: &str, resource_id: &str) {
        if self.phase != Phase::Playing {
            self.send_error(session_id, Error::WrongPhase);
            return;
        }
        let Some(member) = self.members.get_mut(session_id) else {
            return;
        };
        if member.current_action != CurrentAction::Idle {
            let msg = ServerMessage::error(Error::PlayerBusy.to_string());
            member.send(msg);
            return;
        }
        let Some(resource) = self.resources.iter().find(|r| r.id == resource_id) else {
            let msg = ServerMessage::error(Error::InvalidResource.to_string());
            member.send(msg);
            return;
        };
        if resource.harvested {
            let msg = ServerMessage::error(Error::InvalidResource.to_string());
            member.send(msg);
            return;
        }
        if member.position.horizontal_distance(&resource.position) > self.cfg.harvest_proximity {
            let msg = ServerMessage::error(Error::TooFarAway.to_string());
            member.send(msg);
            return;
        }

        member.current_action = CurrentAction::Harvesting;
        member.action_seq += 1;
        member.pending_harvest = Some(resource_id.to_owned());
        let seq = member.action_seq;

        self.broadcast(&ServerMessage::HarvestStarted {
            player_id: session_id.to_owned(),
            resource_id: resource_id.to_owned(),
        });
        self.scheduler.start(
            session_id,
            seq,
            Duration::from_millis(self.cfg.harvest_duration_ms),
        );
    }

    fn on_start_dig(&mut self, session_id: &str, position: Vec3) {
        if self.phase != Phase::Playing {
            self.send_error(session_id, Error::WrongPhase);
            return;
        }
        let Some(member) = self.members.get_mut(session_id) else {
            return;
        };
        if member.current_action != CurrentAction::Idle {
            let msg = ServerMessage::error(Error::PlayerBusy.to_string());
            member.send(msg);
            return;
        }
        // The dig position is trusted from the client; digging costs time
        // and excludes movement, so only the island check applies.
        if !is_on_island(position.x, position.z, self.seed, false) {
            let msg = ServerMessage::error(Error::InvalidDigPosition.to_string());
            member.send(msg);
            return;
        }

        member.current_action = CurrentAction::Digging;
        member.action_seq += 1;
        member.pending_dig = Some(position);
        let seq = member.action_seq;
        let duration = ((self.cfg.dig_duration_ms as f64 * member.upgrades.dig_multiplier).floor()
            as u64)
            .max(MIN_DIG_MS);

        self.broadcast(&ServerMessage::DigStarted {
            player_id: session_id.to_owned(),
            position,
        });
        self.scheduler
            .start(session_id, seq, Duration::from_millis(duration));
    }

    fn on_cancel(&mut self, session_id: &str, kind: CurrentAction) {
        let Some(member) = self.members.get_mut(session_id) else {
            return;
        };
        if member.current_action != kind {
            return;
        }
        member.current_action = CurrentAction::Idle;
        member.action_seq += 1;
        member.pending_harvest = None;
        member.pending_dig = None;
        self.scheduler.cancel(session_id);
    }

    async fn on_action_completed(&mut self, session_id: &str, seq: u64) {
        if self.phase != Phase::Playing {
            return;
        }
        let Some(member) = self.members.get_mut(session_id) else {
            return;
        };
        if member.action_seq != seq || member.current_action == CurrentAction::Idle {
            return; // superseded or cancelled
        }
        let kind = member.current_action;
        member.current_action = CurrentAction::Idle;
        match kind {
            CurrentAction::Harvesting => self.resolve_harvest(session_id),
            CurrentAction::Digging => self.resolve_dig(session_id),
            CurrentAction::Idle => (),
        }
    }

    fn resolve_harvest(&mut self, session_id: &str) {
        let Some(resource_id) = self
            .members
            .get_mut(session_id)
            .and_then(|m| m.pending_harvest.take())
        else {
            return;
        };
        let Some(idx) = self.resources.iter().position(|r| r.id == resource_id) else {
            return;
        };
        if self.resources[idx].harvested {
            // Someone else finished first.
            self.send_error(session_id, Error::InvalidResource);
            return;
        }
        self.resources[idx].harvested = true;
        let kind = self.resources[idx].kind;

        let Some(member) = self.members.get_mut(session_id) else {
            return;
        };
        member.inventory.add(kind);
        let old = member.upgrades;
        member.upgrades = Upgrades::derive(&member.inventory, &old);
        let new = member.upgrades;
        let inventory = member.inventory;

        let mut unlocked: Vec<UpgradeKind> = Vec::new();
        if new.speed_multiplier > old.speed_multiplier {
            unlocked.push(UpgradeKind::Speed);
        }
        if new.dig_upgrades_taken > old.dig_upgrades_taken {
            unlocked.push(UpgradeKind::DigSpeed);
        }
        if new.has_map && !old.has_map {
            unlocked.push(UpgradeKind::Map);
            // Only the unlocking player learns the hint.
            let center = map_hint(&self.chest);
            member.send(ServerMessage::MapRevealed {
                center,
                radius: MAP_REVEAL_RADIUS,
            });
        }

        for upgrade in unlocked {
            self.broadcast(&ServerMessage::UpgradeUnlocked {
                player_id: session_id.to_owned(),
                upgrade,
            });
        }
        self.broadcast(&ServerMessage::HarvestComplete {
            player_id: session_id.to_owned(),
            resource_id,
            resource_type: kind,
            inventory,
            upgrades: new,
        });
    }

    fn resolve_dig(&mut self, session_id: &str) {
        let Some(position) = self
            .members
            .get_mut(session_id)
            .and_then(|m| m.pending_dig.take())
        else {
            return;
        };
        if position.horizontal_distance(&self.chest) <= self.cfg.chest_find_radius {
            info!("[{}] {} found the chest", self.id, session_id);
            self.broadcast(&ServerMessage::ChestFound {
                player_id: session_id.to_owned(),
                position: self.chest,
            });
            self.end_game(Some(session_id.to_owned()), EndReason::ChestFound);
        } else {
            self.broadcast(&ServerMessage::DigComplete {
                player_id: session_id.to_owned(),
                found: false,
            });
        }
    }

    // ─── end of game ────────────────────────────────────────────────────

    fn end_game(&mut self, winner: Option<String>, reason: EndReason) {
        if self.end.is_some() {
            return;
        }
        self.phase = Phase::Ended;
        self.update_joinable();
        self.abort_timers();
        self.scheduler.cancel_all();
        for member in self.members.values_mut() {
            member.current_action = CurrentAction::Idle;
            member.pending_harvest = None;
            member.pending_dig = None;
        }
        self.end = Some((winner.clone(), reason));

        info!("[{}] Game ended: {:?}, winner = {:?}", self.id, reason, winner);
        self.broadcast(&ServerMessage::GameEnded {
            winner_id: winner.clone(),
            reason,
        });

        // Settlement happens off this task; the outcome comes back as a
        // PayoutDone frame so PayoutComplete follows GameEnded.
        let winner_address = winner
            .as_ref()
            .and_then(|id| self.members.get(id))
            .map(|m| m.address.clone());
        let ledger = self.ledger.clone();
        let room_id = self.id.clone();
        let tx = self.frame_tx.clone();
        tokio::spawn(async move {
            let (winner_id, amount) = match (winner, winner_address, reason) {
                (Some(id), Some(address), EndReason::ChestFound) => {
                    let pot = ledger.payout(&room_id, &address).await;
                    (Some(id), pot)
                }
                _ => {
                    ledger.refund_all(&room_id).await;
                    (None, 0)
                }
            };
            let _ = tx.send(RoomFrame::PayoutDone { winner_id, amount }).await;
        });

        let tx = self.frame_tx.clone();
        let grace = Duration::from_millis(self.cfg.end_grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(RoomFrame::DestroyFired).await;
        });
    }

    fn abort_timers(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
        if let Some(handle) = self.sync_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.timeout_task.take() {
            handle.abort();
        }
    }

    fn should_close(&self) -> bool {
        self.lobby_closed || (self.end.is_some() && self.payout_done && self.grace_elapsed)
    }
}

/// A hint point offset from the chest by a uniform random radius of at
/// most half the disclosed radius.
fn map_hint(chest: &Vec3) -> Vec3 {
    let mut rng = rand::thread_rng();
    let angle = rng.gen::<f64>() * std::f64::consts::TAU;
    let offset = rng.gen::<f64>() * MAP_REVEAL_RADIUS / 2.0;
    Vec3::new(
        chest.x + angle.cos() * offset,
        0.0,
        chest.z + angle.sin() * offset,
    )
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
