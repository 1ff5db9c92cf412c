use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub switches: Vec<SwitchConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    pub mtu: u16,
    pub network_mtu: u16,
    pub listener: ListenerConfig,
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    pub hostname: String,
    pub port: u16,
}

/// Exactly one of `tapnic` or `peer` must be set.
#[derive(Debug, Default, Deserialize)]
pub struct PortConfig {
    #[serde(default)]
    pub tapnic: Option<TapNicConfig>,
    #[serde(default)]
    pub peer: Option<PeerConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TapNicConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub hostname: String,
    pub port: u16,
}

pub fn load(path: &str) -> Result<Config> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config {path}"))?;
    parse(&text).with_context(|| format!("invalid config in {path}"))
}

fn parse(text: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(text).context("invalid YAML")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.switches.is_empty() {
            bail!("no switches defined");
        }
        for (index, switch) in self.switches.iter().enumerate() {
            switch
                .validate()
                .with_context(|| format!("invalid switch config at index {index}"))?;
        }
        Ok(())
    }
}

impl SwitchConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("name is empty");
        }
        if self.mtu == 0 {
            bail!("mtu is 0");
        }
        if self.network_mtu == 0 {
            bail!("network_mtu is 0");
        }
        if self.listener.hostname.is_empty() {
            bail!("listener hostname is empty");
        }
        if self.ports.is_empty() {
            bail!("no ports defined");
        }
        for (index, port) in self.ports.iter().enumerate() {
            port.validate()
                .with_context(|| format!("invalid port at index {index}"))?;
        }
        Ok(())
    }
}

impl PortConfig {
    fn validate(&self) -> Result<()> {
        match (&self.tapnic, &self.peer) {
            (Some(_), Some(_)) => bail!("both tapnic and peer defined, choose one"),
            (None, None) => bail!("neither tapnic nor peer defined"),
            (Some(tapnic), None) => {
                if tapnic.name.is_empty() {
                    bail!("tapnic name is empty");
                }
            }
            (None, Some(peer)) => {
                if peer.name.is_empty() {
                    bail!("peer name is empty");
                }
                if peer.hostname.is_empty() {
                    bail!("peer hostname is empty");
                }
                if peer.port == 0 {
                    bail!("peer port is 0");
                }
            }
        }
        Ok(())
    }
}
