use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tapestry::config;
use tapestry::listener::Listener;
use tapestry::switch::Switch;
use tapestry::tap::TapPort;

#[derive(Parser, Debug)]
#[command(
    name = "tapestry",
    version,
    about = "User-space Ethernet switch bridging local TAP devices with UDP peers"
)]
struct Cli {
    /// Config path.
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: String,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = config::load(&cli.config)?;

    let mut listeners = Vec::new();
    for switch_config in &config.switches {
        let switch = Switch::new(&switch_config.name);
        let listener = Listener::bind(
            &switch_config.listener.hostname,
            switch_config.listener.port,
            switch_config.mtu,
            switch_config.network_mtu,
            Arc::clone(&switch) as Arc<dyn tapestry::port::PeerReceiver>,
        )
        .with_context(|| format!("failed to start listener for switch {}", switch_config.name))?;

        for port in &switch_config.ports {
            if let Some(tapnic) = &port.tapnic {
                let tap = TapPort::open(&tapnic.name, switch_config.mtu).with_context(|| {
                    format!(
                        "failed to open TAP device {} for switch {}",
                        tapnic.name, switch_config.name
                    )
                })?;
                switch.add_port(Arc::new(tap));
            } else if let Some(peer) = &port.peer {
                listener
                    .connect(&peer.hostname, peer.port)
                    .with_context(|| format!("failed to greet peer {}", peer.name))?;
                info!(
                    "greeted peer switch={} peer={} addr={}:{}",
                    switch_config.name, peer.name, peer.hostname, peer.port
                );
            }
        }

        info!(
            "started switch name={} listener={}:{} mtu={} network_mtu={}",
            switch_config.name,
            switch_config.listener.hostname,
            switch_config.listener.port,
            switch_config.mtu,
            switch_config.network_mtu
        );
        listeners.push(listener);
    }

    let mut handles = Vec::new();
    for listener in listeners {
        handles.push(thread::spawn(move || {
            if let Err(err) = listener.listen() {
                error!("listener failed: {err:#}");
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
