pub mod behavior;
pub mod client;
pub mod local;
pub mod transport;

use tokio::sync::mpsc;

use crate::common::{Delivery, SessionAction};

pub use client::P2PBus;
pub use local::LocalBus;

/// One peer's attachment to a bus. Sends are fire-and-forget.
#[derive(Debug)]
pub struct BusEndpoint {
    /// Actions from every other peer, tagged with their sender.
    pub inbound: mpsc::UnboundedReceiver<Delivery>,
    /// Actions to fan out; the bus stamps our tab handle on them.
    pub outbound: mpsc::UnboundedSender<SessionAction>,
}
