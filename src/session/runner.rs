//! The single processing path of a peer.
//!
//! `SessionRunner` owns the replica and serializes bus deliveries, UI commands, GC ticks and the
//! typing debounce timer through one `select!` loop, so no locking is needed around `Session`.
//! UI code talks to it through a cloneable `SessionHandle`.

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::common::{
    ChatMessage, CounterState, Delivery, SessionAction, SessionCommand, SessionSnapshot, User,
};
use crate::config::SessionTimings;
use crate::error::{SessionError, SessionResult};
use crate::network::BusEndpoint;

use super::identity::Identity;
use super::state::Session;

const COMMAND_QUEUE: usize = 100;

/// Wall-clock milliseconds that advance with tokio's clock, so timers and timestamps agree.
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    epoch_ms: i64,
    origin: Instant,
}

impl SessionClock {
    fn new() -> Self {
        Self {
            epoch_ms: Utc::now().timestamp_millis(),
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as i64
    }
}

struct PendingCommand {
    command: SessionCommand,
    done: oneshot::Sender<()>,
}

pub struct SessionRunner {
    session: Session,
    timings: SessionTimings,
    clock: SessionClock,
    command_receiver: mpsc::Receiver<PendingCommand>,
    bus: BusEndpoint,
    state_sender: watch::Sender<SessionSnapshot>,
    typing_deadline: Option<Instant>,
}

impl SessionRunner {
    pub fn new(
        identity: Identity,
        timings: SessionTimings,
        bus: BusEndpoint,
    ) -> (Self, SessionHandle) {
        let (command_sender, command_receiver) = mpsc::channel(COMMAND_QUEUE);
        let (state_sender, state_receiver) = watch::channel(SessionSnapshot::default());

        let handle = SessionHandle {
            identity: identity.clone(),
            command_sender,
            state_receiver,
        };
        let runner = Self {
            session: Session::new(identity),
            timings,
            clock: SessionClock::new(),
            command_receiver,
            bus,
            state_sender,
            typing_deadline: None,
        };
        (runner, handle)
    }

    /// Joins the session and processes events until `Shutdown` or until every handle is dropped.
    /// Departure is announced with a best-effort LEAVE either way.
    pub async fn run(mut self) -> SessionResult<()> {
        let mut user_sweep = time::interval(self.timings.user_sweep_interval());
        user_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut message_sweep = time::interval(self.timings.message_sweep_interval());
        message_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let joined = self.session.start(self.clock.now_ms());
        for action in joined {
            self.broadcast(action);
        }
        self.publish_state();
        log::info!("Session event loop started");

        let mut bus_open = true;
        loop {
            tokio::select! {
                pending = self.command_receiver.recv() => {
                    match pending {
                        Some(PendingCommand { command: SessionCommand::Shutdown, done }) => {
                            self.leave();
                            let _ = done.send(());
                            return Ok(());
                        }
                        Some(PendingCommand { command, done }) => {
                            self.handle_command(command);
                            let _ = done.send(());
                        }
                        None => break,
                    }
                }
                delivery = self.bus.inbound.recv(), if bus_open => {
                    match delivery {
                        Some(delivery) => self.handle_delivery(delivery),
                        None => {
                            log::warn!("Bus closed; continuing with the local replica only");
                            bus_open = false;
                        }
                    }
                }
                _ = user_sweep.tick() => {
                    let evicted = self
                        .session
                        .sweep_users(self.clock.now_ms(), self.timings.user_inactive_threshold_ms);
                    if !evicted.is_empty() {
                        self.publish_state();
                    }
                }
                _ = message_sweep.tick() => {
                    let now = self.clock.now_ms();
                    let removed = self.session.sweep_messages(now)
                        + self.session.sweep_typing(now, self.timings.typing_expiry_ms);
                    if removed > 0 {
                        self.publish_state();
                    }
                }
                _ = wait_for(self.typing_deadline) => {
                    self.typing_deadline = None;
                    log::debug!("Typing went quiet; withdrawing indicator");
                    let action = self.session.set_typing(false, self.clock.now_ms());
                    self.broadcast(action);
                    self.publish_state();
                }
            }
        }

        self.leave();
        Ok(())
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let now = self.clock.now_ms();
        let action = match command {
            SessionCommand::SendMessage {
                content,
                expires_in_secs,
            } => {
                let action = self.session.send_message(&content, expires_in_secs, now);
                if action.is_some() {
                    self.typing_deadline = None;
                }
                action
            }
            SessionCommand::DeleteMessage { message_id } => {
                self.session.delete_message(&message_id)
            }
            SessionCommand::AdjustCounter { increment } => {
                Some(self.session.adjust_counter(increment, now))
            }
            SessionCommand::SetTyping(is_typing) => {
                self.typing_deadline =
                    is_typing.then(|| Instant::now() + self.timings.typing_timeout());
                Some(self.session.set_typing(is_typing, now))
            }
            SessionCommand::Touch => Some(self.session.touch(now)),
            SessionCommand::Shutdown => None,
        };

        if let Some(action) = action {
            self.broadcast(action);
        }
        self.publish_state();
    }

    fn handle_delivery(&mut self, delivery: Delivery) {
        if let Some(reply) = self.session.apply(delivery, self.clock.now_ms()) {
            self.broadcast(reply);
        }
        self.publish_state();
    }

    fn leave(&mut self) {
        self.typing_deadline = None;
        let action = self.session.leave();
        self.broadcast(action);
        log::info!("Left session as {}", self.session.identity().username);
    }

    fn broadcast(&self, action: SessionAction) {
        let name = action.name();
        if self.bus.outbound.send(action).is_err() {
            log::warn!("Bus is gone; dropped outgoing {name}");
        }
    }

    fn publish_state(&self) {
        self.state_sender.send_replace(self.session.snapshot());
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The UI's view of a running session: four read accessors and the side-effecting commands.
///
/// Commands resolve once the runner has applied them, so a read right after a command observes
/// its effect.
#[derive(Clone)]
pub struct SessionHandle {
    identity: Identity,
    command_sender: mpsc::Sender<PendingCommand>,
    state_receiver: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn peer_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn tab_id(&self) -> &str {
        &self.identity.tab_id
    }

    pub fn display_name(&self) -> &str {
        &self.identity.username
    }

    pub fn users(&self) -> Vec<User> {
        self.state_receiver.borrow().users.clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state_receiver.borrow().messages.clone()
    }

    pub fn counter(&self) -> CounterState {
        self.state_receiver.borrow().counter.clone()
    }

    pub fn typing_users(&self) -> Vec<String> {
        self.state_receiver.borrow().typing_users.clone()
    }

    /// All four fields as of one instant.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_receiver.borrow().clone()
    }

    /// Waits until the replica changes after the last observed version.
    pub async fn changed(&mut self) -> SessionResult<()> {
        self.state_receiver
            .changed()
            .await
            .map_err(|_| SessionError::RunnerStopped)
    }

    pub async fn send_message(
        &self,
        content: impl Into<String>,
        expires_in_secs: Option<u64>,
    ) -> SessionResult<()> {
        self.dispatch(SessionCommand::SendMessage {
            content: content.into(),
            expires_in_secs,
        })
        .await
    }

    pub async fn delete_message(&self, message_id: impl Into<String>) -> SessionResult<()> {
        self.dispatch(SessionCommand::DeleteMessage {
            message_id: message_id.into(),
        })
        .await
    }

    pub async fn adjust_counter(&self, increment: bool) -> SessionResult<()> {
        self.dispatch(SessionCommand::AdjustCounter { increment }).await
    }

    pub async fn set_typing(&self, is_typing: bool) -> SessionResult<()> {
        self.dispatch(SessionCommand::SetTyping(is_typing)).await
    }

    pub async fn touch(&self) -> SessionResult<()> {
        self.dispatch(SessionCommand::Touch).await
    }

    pub async fn shutdown(&self) -> SessionResult<()> {
        self.dispatch(SessionCommand::Shutdown).await
    }

    pub async fn dispatch(&self, command: SessionCommand) -> SessionResult<()> {
        let (done, applied) = oneshot::channel();
        self.command_sender
            .send(PendingCommand { command, done })
            .await
            .map_err(|_| SessionError::RunnerStopped)?;
        applied.await.map_err(|_| SessionError::RunnerStopped)
    }
}
