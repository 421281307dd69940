//! Daemon configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [global]
//! entry_count = 25
//! log_level = "info"
//!
//! [timers]
//! update = 30
//! timeout = 180
//! garbage = 120
//!
//! [interfaces.eth0]
//! passive = false
//! key_chain = { auth_type = "md5", auth_key = "secret" }
//!
//! [neighbors."10.0.0.2"]
//! key_chain = { auth_type = "plain", auth_key = "pass" }
//! ```
//!
//! Out-of-range values are replaced by their defaults with a warning.
//! [`Config::read`] and [`Config::parse`] return those warnings to the
//! caller instead of logging them.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use crate::auth::KeyChain;
use crate::entry::KEY_SIZE;
use crate::error::{Error, Result};
use crate::packet::is_global_unicast;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ripd/ripd.toml";

pub const DEFAULT_ENTRY_COUNT: usize = 25;
pub const DEFAULT_UPDATE_TIMER: u64 = 30;
pub const DEFAULT_TIMEOUT_TIMER: u64 = 180;
pub const DEFAULT_GARBAGE_TIMER: u64 = 120;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENTRY_COUNT_RANGE: RangeInclusive<usize> = 25..=255;
const UPDATE_RANGE: RangeInclusive<u64> = 10..=60;
const TIMEOUT_RANGE: RangeInclusive<u64> = 30..=360;
const GARBAGE_RANGE: RangeInclusive<u64> = 10..=180;
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Global {
    /// Maximum route entries per message, authentication included.
    pub entry_count: usize,
    pub log_level: String,
}

impl Default for Global {
    fn default() -> Self {
        Global {
            entry_count: DEFAULT_ENTRY_COUNT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Protocol timers, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timers {
    pub update: u64,
    pub timeout: u64,
    pub garbage: u64,
}

impl Default for Timers {
    fn default() -> Self {
        Timers {
            update: DEFAULT_UPDATE_TIMER,
            timeout: DEFAULT_TIMEOUT_TIMER,
            garbage: DEFAULT_GARBAGE_TIMER,
        }
    }
}

impl Timers {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update)
    }

    pub fn timeout_interval(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn garbage_interval(&self) -> Duration {
        Duration::from_secs(self.garbage)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InterfaceConfig {
    /// Passive interfaces receive but never advertise.
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub key_chain: KeyChain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NeighborConfig {
    #[serde(default)]
    pub key_chain: KeyChain,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    global: Global,
    #[serde(default)]
    timers: Timers,
    #[serde(default)]
    interfaces: BTreeMap<String, InterfaceConfig>,
    #[serde(default)]
    neighbors: BTreeMap<String, NeighborConfig>,
}

/// Validated daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub global: Global,
    pub timers: Timers,
    pub interfaces: BTreeMap<String, InterfaceConfig>,
    pub neighbors: BTreeMap<Ipv4Addr, NeighborConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (cfg, warnings) = Self::read(path)?;
        log_warnings(&warnings);
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let (cfg, warnings) = Self::parse(text)?;
        log_warnings(&warnings);
        Ok(cfg)
    }

    /// Like [`Config::load`], but hands the validation warnings back
    /// instead of logging them. Used before logging is set up.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<String>)> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<(Self, Vec<String>)> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        let mut warnings = Vec::new();
        let cfg = Self::validate(raw, &mut warnings);
        Ok((cfg, warnings))
    }

    fn validate(raw: RawConfig, warnings: &mut Vec<String>) -> Self {
        let mut global = raw.global;
        global.entry_count = clamp(
            warnings,
            "global.entry_count",
            global.entry_count,
            ENTRY_COUNT_RANGE,
            DEFAULT_ENTRY_COUNT,
        );
        if !LOG_LEVELS.contains(&global.log_level.as_str()) {
            warnings.push(format!(
                "unknown log level {}, using {}",
                global.log_level, DEFAULT_LOG_LEVEL
            ));
            global.log_level = DEFAULT_LOG_LEVEL.to_string();
        }

        let mut timers = raw.timers;
        timers.update = clamp(
            warnings,
            "timers.update",
            timers.update,
            UPDATE_RANGE,
            DEFAULT_UPDATE_TIMER,
        );
        timers.timeout = clamp(
            warnings,
            "timers.timeout",
            timers.timeout,
            TIMEOUT_RANGE,
            DEFAULT_TIMEOUT_TIMER,
        );
        timers.garbage = clamp(
            warnings,
            "timers.garbage",
            timers.garbage,
            GARBAGE_RANGE,
            DEFAULT_GARBAGE_TIMER,
        );

        let interfaces = raw
            .interfaces
            .into_iter()
            .inspect(|(name, ifc)| check_key(warnings, name, &ifc.key_chain))
            .collect();

        let mut neighbors = BTreeMap::new();
        for (name, nbr) in raw.neighbors {
            match name.parse::<Ipv4Addr>() {
                Ok(ip) if is_global_unicast(ip) => {
                    check_key(warnings, &name, &nbr.key_chain);
                    neighbors.insert(ip, nbr);
                }
                _ => warnings.push(format!("ignoring invalid static neighbor address {}", name)),
            }
        }

        Config {
            global,
            timers,
            interfaces,
            neighbors,
        }
    }

    /// Key chain for a packet source: the static neighbor entry wins over
    /// the inbound interface. `None` when neither is configured.
    pub fn keychain_for(&self, src: Ipv4Addr, iface: &str) -> Option<&KeyChain> {
        self.neighbors
            .get(&src)
            .map(|n| &n.key_chain)
            .or_else(|| self.interfaces.get(iface).map(|i| &i.key_chain))
    }

    pub fn max_entries(&self) -> usize {
        self.global.entry_count
    }

    /// Interfaces updates are multicast on.
    pub fn active_interfaces(&self) -> impl Iterator<Item = (&String, &InterfaceConfig)> {
        self.interfaces.iter().filter(|(_, i)| !i.passive)
    }
}

pub fn log_warnings(warnings: &[String]) {
    for w in warnings {
        tracing::warn!("{}", w);
    }
}

fn clamp<T>(
    warnings: &mut Vec<String>,
    name: &str,
    value: T,
    range: RangeInclusive<T>,
    default: T,
) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if range.contains(&value) {
        value
    } else {
        warnings.push(format!(
            "{} = {} must be in range {}-{}, using {}",
            name,
            value,
            range.start(),
            range.end(),
            default
        ));
        default
    }
}

fn check_key(warnings: &mut Vec<String>, owner: &str, chain: &KeyChain) {
    if chain.auth_key.len() > KEY_SIZE {
        warnings.push(format!(
            "{}: authentication key longer than {} bytes is truncated",
            owner, KEY_SIZE
        ));
    }
}
