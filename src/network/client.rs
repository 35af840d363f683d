use std::collections::VecDeque;
use std::error::Error;
use std::time::Duration;

use futures::StreamExt;
use libp2p::gossipsub;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identity, mdns};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::common::{Delivery, SessionAction};
use crate::config::AppConfig;

use super::BusEndpoint;
use super::behavior::{SessionBehavior, SessionBehaviorEvent, build_behavior};
use super::transport::build_transport;

/// How long the swarm keeps running after the session stops, so the LEAVE notice can go out.
const FLUSH_GRACE: Duration = Duration::from_millis(500);
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
/// Frames held while nobody else is on the topic; the oldest go first past this.
const MAX_PENDING_FRAMES: usize = 256;

#[derive(Serialize)]
struct OutgoingFrame<'a> {
    source: &'a str,
    seq: u64,
    action: &'a SessionAction,
}

/// The action stays raw until the envelope itself is known to be well formed.
#[derive(Deserialize)]
struct IncomingFrame {
    source: String,
    #[serde(default)]
    seq: u64,
    action: serde_json::Value,
}

pub fn encode_frame(
    source: &str,
    seq: u64,
    action: &SessionAction,
) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&OutgoingFrame {
        source,
        seq,
        action,
    })
}

/// Malformed frames and unknown action types are dropped.
pub fn decode_frame(data: &[u8]) -> Option<Delivery> {
    let frame = match serde_json::from_slice::<IncomingFrame>(data) {
        Ok(frame) => frame,
        Err(err) => {
            log::debug!("Dropping malformed frame: {err}");
            return None;
        }
    };
    match serde_json::from_value::<SessionAction>(frame.action) {
        Ok(action) => Some(Delivery::new(frame.source, action)),
        Err(err) => {
            log::debug!(
                "Dropping unrecognized action #{} from {}: {err}",
                frame.seq,
                frame.source
            );
            None
        }
    }
}

struct PendingFrame {
    name: &'static str,
    bytes: Vec<u8>,
}

/// Encoded frames waiting for the first subscribed peer, in send order.
#[derive(Default)]
struct PendingFrames {
    frames: VecDeque<PendingFrame>,
}

impl PendingFrames {
    fn push(&mut self, frame: PendingFrame) {
        if self.frames.len() >= MAX_PENDING_FRAMES {
            if let Some(dropped) = self.frames.pop_front() {
                log::warn!("Outbound queue full; dropped {}", dropped.name);
            }
        }
        self.frames.push_back(frame);
    }

    fn pop(&mut self) -> Option<PendingFrame> {
        self.frames.pop_front()
    }

    fn put_back(&mut self, frame: PendingFrame) {
        self.frames.push_front(frame);
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Session bus over libp2p gossipsub. Peers on the local network are found by mDNS; others can be
/// dialed explicitly.
pub struct P2PBus {
    tab_id: String,
    topic: String,
    listen_addr: String,
    peers: Vec<Multiaddr>,
    inbound_sender: mpsc::UnboundedSender<Delivery>,
    outbound_receiver: mpsc::UnboundedReceiver<SessionAction>,
    seq: u64,
    pending: PendingFrames,
}

impl P2PBus {
    pub fn new(
        tab_id: impl Into<String>,
        config: &AppConfig,
        peers: Vec<Multiaddr>,
    ) -> (Self, BusEndpoint) {
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_receiver) = mpsc::unbounded_channel();

        let bus = Self {
            tab_id: tab_id.into(),
            topic: config.topic.clone(),
            listen_addr: config.listen_addr.clone(),
            peers,
            inbound_sender,
            outbound_receiver,
            seq: 0,
            pending: PendingFrames::default(),
        };
        (bus, BusEndpoint { inbound, outbound })
    }

    pub async fn run(mut self) -> Result<(), Box<dyn Error>> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id:?}");

        let transport = build_transport(&local_key)?;
        let (behavior, topic) = build_behavior(&local_key, local_peer_id, &self.topic)?;

        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor()
                .with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT),
        );

        swarm.listen_on(self.listen_addr.parse()?)?;
        for addr in &self.peers {
            log::info!("Dialing configured peer {addr}");
            if let Err(err) = swarm.dial(addr.clone()) {
                log::warn!("Failed to dial {addr}: {err}");
            }
        }
        log::info!("Bus event loop started on topic {}", self.topic);

        loop {
            tokio::select! {
                action = self.outbound_receiver.recv() => {
                    match action {
                        Some(action) => self.publish(&mut swarm, &topic, &action),
                        None => break,
                    }
                }
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event, &mut swarm, &topic);
                }
            }
        }

        let _ = tokio::time::timeout(FLUSH_GRACE, async {
            while let Some(event) = swarm.next().await {
                self.handle_swarm_event(event, &mut swarm, &topic);
            }
        })
        .await;
        if !self.pending.is_empty() {
            log::warn!("Bus stopped with {} unsent frames", self.pending.len());
        }
        log::info!("Bus stopped");
        Ok(())
    }

    fn publish(
        &mut self,
        swarm: &mut Swarm<SessionBehavior>,
        topic: &gossipsub::IdentTopic,
        action: &SessionAction,
    ) {
        self.seq += 1;
        let bytes = match encode_frame(&self.tab_id, self.seq, action) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Failed to serialize {}: {err:?}", action.name());
                return;
            }
        };

        self.pending.push(PendingFrame {
            name: action.name(),
            bytes,
        });
        self.flush(swarm, topic);
    }

    /// Publishes queued frames in order, stopping while no peer is subscribed to the topic.
    fn flush(&mut self, swarm: &mut Swarm<SessionBehavior>, topic: &gossipsub::IdentTopic) {
        while let Some(frame) = self.pending.pop() {
            match swarm
                .behaviour_mut()
                .gossipsub
                .publish(topic.clone(), frame.bytes.clone())
            {
                Ok(_) => log::trace!("Published {}", frame.name),
                Err(gossipsub::PublishError::NoPeersSubscribedToTopic) => {
                    log::debug!("No peers on the topic yet; holding {}", frame.name);
                    self.pending.put_back(frame);
                    return;
                }
                Err(err) => log::warn!("Publish of {} failed: {err:?}", frame.name),
            }
        }
    }

    fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<SessionBehaviorEvent>,
        swarm: &mut Swarm<SessionBehavior>,
        topic: &gossipsub::IdentTopic,
    ) {
        match event {
            SwarmEvent::Behaviour(SessionBehaviorEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                let Some(delivery) = decode_frame(&message.data) else {
                    return;
                };
                if delivery.source == self.tab_id {
                    return;
                }
                if self.inbound_sender.send(delivery).is_err() {
                    log::debug!("Session stopped; dropping inbound action");
                }
            }
            SwarmEvent::Behaviour(SessionBehaviorEvent::Gossipsub(
                gossipsub::Event::Subscribed {
                    peer_id,
                    topic: subscribed,
                },
            )) => {
                log::debug!("{peer_id} joined topic {subscribed}");
                if subscribed == topic.hash() {
                    self.flush(swarm, topic);
                }
            }
            SwarmEvent::Behaviour(SessionBehaviorEvent::Mdns(mdns::Event::Discovered(list))) => {
                for (peer_id, addr) in list {
                    log::debug!("mDNS discovered {peer_id} at {addr}");
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::Behaviour(SessionBehaviorEvent::Mdns(mdns::Event::Expired(list))) => {
                for (peer_id, _) in list {
                    swarm
                        .behaviour_mut()
                        .gossipsub
                        .remove_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address:?}");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                log::debug!("Connected to {peer_id}");
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                log::debug!("Disconnected from {peer_id}");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_sender_outside_the_payload() {
        let action = SessionAction::TypingStop {
            user_id: "user-tab-a".into(),
        };
        let bytes = encode_frame("tab-a", 3, &action).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["source"], "tab-a");
        assert_eq!(value["action"]["type"], "TYPING_STOP");

        assert_eq!(decode_frame(&bytes), Some(Delivery::new("tab-a", action)));
    }

    #[test]
    fn identical_actions_produce_distinct_frames() {
        let action = SessionAction::TypingStart {
            user_id: "user-tab-a".into(),
        };
        assert_ne!(
            encode_frame("tab-a", 1, &action).unwrap(),
            encode_frame("tab-a", 2, &action).unwrap()
        );
    }

    #[test]
    fn unknown_actions_and_garbage_are_dropped() {
        let unknown =
            br#"{"source": "tab-a", "seq": 1, "action": {"type": "POKE", "payload": {}}}"#;
        assert_eq!(decode_frame(unknown), None);
        assert_eq!(decode_frame(b"not json"), None);
        assert_eq!(decode_frame(br#"{"seq": 1}"#), None);
    }

    fn frame(name: &'static str) -> PendingFrame {
        PendingFrame {
            name,
            bytes: name.as_bytes().to_vec(),
        }
    }

    #[test]
    fn pending_frames_keep_send_order() {
        let mut pending = PendingFrames::default();
        pending.push(frame("JOIN"));
        pending.push(frame("REQUEST_STATE"));

        let first = pending.pop().unwrap();
        assert_eq!(first.name, "JOIN");
        pending.put_back(first);
        assert_eq!(pending.len(), 2);

        let names: Vec<_> = std::iter::from_fn(|| pending.pop()).map(|f| f.name).collect();
        assert_eq!(names, vec!["JOIN", "REQUEST_STATE"]);
    }

    #[test]
    fn pending_frames_drop_oldest_when_full() {
        let mut pending = PendingFrames::default();
        pending.push(frame("JOIN"));
        for _ in 1..MAX_PENDING_FRAMES {
            pending.push(frame("TYPING_START"));
        }
        pending.push(frame("LEAVE"));

        assert_eq!(pending.len(), MAX_PENDING_FRAMES);
        assert_eq!(pending.pop().unwrap().name, "TYPING_START");
        let last = std::iter::from_fn(|| pending.pop()).last().unwrap();
        assert_eq!(last.name, "LEAVE");
    }
}
