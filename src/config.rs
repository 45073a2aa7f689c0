//! Pipeline configuration: TOML file and/or command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::types::{PriceBand, Tick};

fn default_output() -> PathBuf {
    PathBuf::from("results")
}

fn default_min_tick() -> Tick {
    1
}

fn default_max_tick() -> Tick {
    100_000
}

fn default_queue_capacity() -> usize {
    65_536
}

fn default_spin_loops() -> u32 {
    64
}

/// Everything the pipeline needs to run one replay.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Binary command stream consumed by the feed handler.
    pub input: PathBuf,
    /// Directory receiving `trades.bin` / `book_updates.bin`.
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Symbol names; position is the `symbol_id` dispatch index.
    pub symbols: Vec<String>,
    #[serde(default = "default_min_tick")]
    pub min_tick: Tick,
    #[serde(default = "default_max_tick")]
    pub max_tick: Tick,
    /// Optional pinning: `[feed, engine_0, .., engine_{K-1}, publisher]`.
    #[serde(default)]
    pub cpu_cores: Option<Vec<usize>>,
    /// Ring size for the command and event queues (power of two).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Pause-spin iterations before a waiting thread yields.
    #[serde(default = "default_spin_loops")]
    pub spin_loops_per_yield: u32,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: PipelineConfig =
            toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("symbols must not be empty");
        }
        if self.min_tick > self.max_tick {
            bail!("min_tick must not exceed max_tick");
        }
        if self.queue_capacity < 2 || !self.queue_capacity.is_power_of_two() {
            bail!("queue_capacity must be a power of two >= 2");
        }
        if let Some(cores) = &self.cpu_cores {
            let needed = self.symbols.len() + 2;
            if cores.len() != needed {
                bail!(
                    "cpu_cores must list {needed} cores (feed, {} engines, publisher), got {}",
                    self.symbols.len(),
                    cores.len()
                );
            }
        }
        Ok(())
    }

    pub fn band(&self) -> PriceBand {
        PriceBand::new(self.min_tick, self.max_tick)
    }
}
