use std::time::Duration;

use camino::Utf8Path;
use config::Config;
use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;
use crate::gate::FetchGate;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base address of the ISG web interface, e.g. `http://192.168.1.50`.
    pub host: String,
    pub user: String,
    pub pass: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct PollConfig {
    /// Value/status poll interval in seconds.
    pub value_interval_secs: u64,
    /// Command page poll interval in seconds.
    pub command_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct FetchConfig {
    /// Concurrent fetch limit (the gate's admission cap).
    pub concurrency: usize,
    /// Per-request timeout in seconds; 0 disables the deadline.
    pub timeout_secs: u64,
}

/// Page path lists. The historical config format was one
/// semicolon-delimited string per list; a native sequence is accepted
/// too, and both are split at this boundary.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum PageList {
    Delimited(String),
    List(Vec<String>),
}

impl PageList {
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        match self {
            Self::Delimited(text) => text
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
            Self::List(list) => list.clone(),
        }
    }
}

impl Default for PageList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PagesConfig {
    #[serde(default)]
    pub status: PageList,
    #[serde(default)]
    pub values: PageList,
    #[serde(default)]
    pub commands: PageList,
    /// Additional command pages only reachable in the ISG's expert mode.
    #[serde(default)]
    pub expert_commands: PageList,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub poll: PollConfig,
    pub fetch: FetchConfig,
    #[serde(default)]
    pub avoid_umlauts: bool,
    #[serde(default)]
    pub pages: PagesConfig,
}

impl AppConfig {
    #[must_use]
    pub const fn value_interval(&self) -> Duration {
        Duration::from_secs(self.poll.value_interval_secs)
    }

    #[must_use]
    pub const fn command_interval(&self) -> Duration {
        Duration::from_secs(self.poll.command_interval_secs)
    }

    /// Per-request timeout; `None` when disabled with 0.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Option<Duration> {
        if self.fetch.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.fetch.timeout_secs))
        }
    }

    /// All command pages, regular ones first, expert pages after.
    #[must_use]
    pub fn command_pages(&self) -> Vec<String> {
        let mut pages = self.pages.commands.paths();
        pages.extend(self.pages.expert_commands.paths());
        pages
    }
}

pub fn parse(filename: &Utf8Path) -> BridgeResult<AppConfig> {
    let settings = Config::builder()
        .set_default("poll.value_interval_secs", 180)?
        .set_default("poll.command_interval_secs", 300)?
        .set_default("fetch.concurrency", FetchGate::DEFAULT_LIMIT as u64)?
        .set_default("fetch.timeout_secs", 60)?
        .add_source(config::File::with_name(filename.as_str()))
        .build()?;

    Ok(settings.try_deserialize()?)
}
