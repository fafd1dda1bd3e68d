//! Configuration consumed by the cache and the gulper machinery
//!
//! The embedding application supplies these values; nothing here inspects
//! the host. Every field has a default so partial JSON documents work.

use crate::core::segment::SegmentKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Memory budget for the cache, either absolute or relative to a total the
/// caller provides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBudget {
    Bytes(u64),
    Fraction(f64),
}

impl MemoryBudget {
    /// Resolve to bytes. `total_bytes` is only consulted for fractions.
    pub fn resolve(&self, total_bytes: u64) -> u64 {
        match *self {
            MemoryBudget::Bytes(b) => b,
            MemoryBudget::Fraction(f) => (total_bytes as f64 * f) as u64,
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        MemoryBudget::Bytes(256 * 1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_budget: MemoryBudget,
    /// Segments untouched for this long are the first to go.
    pub idle_window_secs: u64,
    /// Single wave segments never grow past this.
    pub max_wave_bytes: usize,
    /// Duration thresholds for the "halve long waves" purge passes, applied
    /// in order.
    pub halve_thresholds_secs: Vec<f64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: MemoryBudget::default(),
            idle_window_secs: 300,
            max_wave_bytes: 4_000_000,
            halve_thresholds_secs: vec![3.0 * 3600.0, 3600.0],
        }
    }
}

impl CacheConfig {
    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }
}

/// Chunk size and pacing for one data kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkSettings {
    pub chunk_secs: f64,
    pub delay_ms: u64,
}

impl ChunkSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GulperConfig {
    pub wave: ChunkSettings,
    pub helicorder: ChunkSettings,
    pub rsam: ChunkSettings,
}

impl Default for GulperConfig {
    fn default() -> Self {
        Self {
            wave: ChunkSettings {
                chunk_secs: 600.0,
                delay_ms: 100,
            },
            helicorder: ChunkSettings {
                chunk_secs: 3600.0,
                delay_ms: 250,
            },
            rsam: ChunkSettings {
                chunk_secs: 86_400.0,
                delay_ms: 250,
            },
        }
    }
}

impl GulperConfig {
    pub fn settings(&self, kind: SegmentKind) -> ChunkSettings {
        match kind {
            SegmentKind::Wave => self.wave,
            SegmentKind::Helicorder => self.helicorder,
            SegmentKind::Rsam => self.rsam,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub gulper: GulperConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if let MemoryBudget::Fraction(f) = self.cache.memory_budget {
            if !(f > 0.0 && f <= 1.0) {
                return Err(Error::Configuration(format!(
                    "memory budget fraction {f} outside (0, 1]"
                )));
            }
        }
        if self.cache.idle_window_secs == 0 {
            return Err(Error::Configuration("idle window must be non-zero".into()));
        }
        if self.cache.max_wave_bytes == 0 {
            return Err(Error::Configuration("max wave size must be non-zero".into()));
        }
        for kind in [SegmentKind::Wave, SegmentKind::Helicorder, SegmentKind::Rsam] {
            let chunk = self.gulper.settings(kind).chunk_secs;
            if !(chunk.is_finite() && chunk > 0.0) {
                return Err(Error::Configuration(format!(
                    "{kind} chunk size must be positive, got {chunk}"
                )));
            }
        }
        Ok(())
    }
}
