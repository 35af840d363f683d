use std::time::Duration;

use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::Boxed;
use libp2p::core::upgrade::Version;
use libp2p::{PeerId, Transport, identity, noise, tcp, yamux};

use crate::error::{SessionError, SessionResult};

const UPGRADE_TIMEOUT: Duration = Duration::from_secs(20);

/// TCP + noise + yamux on tokio.
pub fn build_transport(
    local_key: &identity::Keypair,
) -> SessionResult<Boxed<(PeerId, StreamMuxerBox)>> {
    let noise_config =
        noise::Config::new(local_key).map_err(|err| SessionError::Bus(format!("noise: {err}")))?;

    let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
        .upgrade(Version::V1)
        .authenticate(noise_config)
        .multiplex(yamux::Config::default())
        .timeout(UPGRADE_TIMEOUT)
        .boxed();

    Ok(transport)
}
