use std::error::Error;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use dotenvy::dotenv;
use libp2p::Multiaddr;
use rust_p2p_session::config::{self, AppConfig, SessionTimings};
use rust_p2p_session::network::{LocalBus, P2PBus};
use rust_p2p_session::session::{Identity, SessionHandle, SessionRunner};
use rust_p2p_session::ui::console;

#[derive(Parser)]
#[command(
    name = "rust_p2p_session",
    version,
    about = "Serverless shared session: users, chat, counter and typing over a P2P bus"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Display name instead of a generated one
    #[arg(long)]
    name: Option<String>,
    /// Gossipsub topic, overrides the config file
    #[arg(long)]
    topic: Option<String>,
    /// Extra peer to dial (multiaddr); repeatable
    #[arg(long = "peer", value_name = "MULTIADDR")]
    peers: Vec<String>,
    /// Run N peers in this process over an in-memory bus and print what each one sees
    #[arg(long, value_name = "N")]
    local_peers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    if let Some(topic) = cli.topic {
        app_config.topic = topic;
    }
    app_config.peers.extend(cli.peers);

    if let Some(count) = cli.local_peers {
        run_local_demo(count.max(1), app_config.timings).await?;
        return Ok(());
    }

    let mut identity = Identity::generate();
    if let Some(name) = cli.name {
        identity = identity.with_username(name);
    }
    run_peer(identity, app_config).await
}

async fn run_peer(identity: Identity, app_config: AppConfig) -> Result<(), Box<dyn Error>> {
    let peers = parse_peers(&app_config.peers);
    let (bus, endpoint) = P2PBus::new(identity.tab_id.clone(), &app_config, peers);
    let bus_task = tokio::spawn(async move {
        if let Err(err) = bus.run().await {
            log::error!("Bus terminated: {err}");
        }
    });

    let (runner, handle) = SessionRunner::new(identity, app_config.timings, endpoint);
    let runner_task = tokio::spawn(runner.run());

    if let Err(err) = console::run(handle).await {
        log::warn!("Console stopped: {err}");
    }
    runner_task.await??;
    bus_task.await?;
    Ok(())
}

/// Starts `count` peers one after another on a shared in-memory bus, lets each act once and
/// prints every replica.
async fn run_local_demo(count: usize, timings: SessionTimings) -> Result<(), Box<dyn Error>> {
    let bus = LocalBus::new();
    let mut handles: Vec<SessionHandle> = Vec::new();

    for index in 0..count {
        let identity = Identity::generate();
        let endpoint = bus.subscribe(identity.tab_id.clone());
        let (runner, handle) = SessionRunner::new(identity, timings, endpoint);
        tokio::spawn(async move {
            if let Err(err) = runner.run().await {
                log::error!("Peer stopped: {err}");
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let greeting = format!("hello from peer #{index}");
        handle.send_message(greeting, None).await?;
        handle.adjust_counter(index % 2 == 0).await?;
        handles.push(handle);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let now = Utc::now().timestamp_millis();
    for handle in &handles {
        println!("=== {} ===", handle.display_name());
        println!("{}\n", console::render(&handle.snapshot(), handle.peer_id(), now));
    }
    for handle in &handles {
        handle.shutdown().await?;
    }
    Ok(())
}

fn parse_peers(entries: &[String]) -> Vec<Multiaddr> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(err) => {
                log::warn!("Invalid multiaddr `{entry}`: {err}");
                None
            }
        })
        .collect()
}
