use crate::error::{Error, Result};
use crate::protocol::ProcRef;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store address, `host:port`
    pub addr: String,

    /// Connect timeout in milliseconds (0 = OS default)
    pub connect_timeout_ms: u64,

    /// Socket read timeout in milliseconds (0 = none)
    ///
    /// Blocking pops extend it by their own server-side timeout.
    pub read_timeout_ms: u64,

    /// Socket write timeout in milliseconds (0 = none)
    pub write_timeout_ms: u64,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Queue name
    pub queue: String,

    /// Wait again when a blocking pop was woken but found the queue empty
    pub rewait_on_empty: bool,

    /// Log level
    pub log_level: String,

    /// Server-side procedures
    pub scripts: Scripts,
}

/// Procedure sources for each queue operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scripts {
    pub enqueue: ScriptSource,
    pub dequeue: ScriptSource,
    pub len: ScriptSource,
    pub remove: ScriptSource,
}

/// A procedure given by digest, by path, or (digest winning) both
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ScriptSource {
    pub fn to_proc_ref(&self) -> Result<ProcRef> {
        ProcRef::from_parts(self.sha1.as_deref(), self.path.as_deref())
    }

    pub fn is_set(&self) -> bool {
        self.to_proc_ref().is_ok()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout_ms: 1500,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            tcp_nodelay: true,
            queue: "prique".to_string(),
            rewait_on_empty: true,
            log_level: "info".to_string(),
            scripts: Scripts::default(),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// `PRIQUE_ADDR` in the environment overrides the file's address.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use prique::Config;
    ///
    /// # fn main() -> prique::Result<()> {
    /// let config = Config::from_file("prique.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&contents)?;

        if let Ok(addr) = std::env::var("PRIQUE_ADDR") {
            config.addr = addr;
        }

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    ///
    /// Scripts are optional individually; operations check for their own
    /// script when they run.
    pub fn validate(&self) -> Result<()> {
        if self.addr.is_empty() {
            return Err(Error::Config("addr must not be empty".to_string()));
        }

        if self.queue.is_empty() {
            return Err(Error::Config("queue must not be empty".to_string()));
        }

        let scripts = &self.scripts;
        if ![&scripts.enqueue, &scripts.dequeue, &scripts.len, &scripts.remove]
            .iter()
            .any(|source| source.is_set())
        {
            return Err(Error::Config("no scripts configured".to_string()));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }
}
