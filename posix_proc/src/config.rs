//! POSIX-Proc Runtime Configuration
//!
//! Configurable parameters for the process-control layer

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::{ProcError, Result};

/// Default child table capacity
pub const DEFAULT_MAX_CHILDREN: usize = 256;

/// Default polling period for timed waits on hosts without a wait-any primitive
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 5;

/// Default bound on unexpected wait outcomes before a blocking wait gives up
pub const DEFAULT_MAX_WAIT_RETRIES: u32 = 16;

/// Environment variable read by [`ProcConfig::load_from_env`]
pub const CONFIG_ENV_VAR: &str = "POSIX_PROC_CONFIG";

/// Runtime configuration for POSIX-Proc
pub struct ProcConfig {
    /// Child table capacity for controls built from this configuration
    max_children: AtomicUsize,

    /// Polling period (milliseconds) of host-side timed waits
    poll_interval_ms: AtomicU32,

    /// Unexpected wait outcomes tolerated by a blocking wait
    max_wait_retries: AtomicU32,

    /// Reject command lines with interior NULs instead of truncating them
    strict_mode: AtomicBool,
}

impl ProcConfig {
    /// Create default configuration
    pub const fn new() -> Self {
        Self {
            max_children: AtomicUsize::new(DEFAULT_MAX_CHILDREN),
            poll_interval_ms: AtomicU32::new(DEFAULT_POLL_INTERVAL_MS),
            max_wait_retries: AtomicU32::new(DEFAULT_MAX_WAIT_RETRIES),
            strict_mode: AtomicBool::new(false),
        }
    }

    /// Set child table capacity
    pub fn set_max_children(&self, max: usize) {
        self.max_children.store(max, Ordering::Relaxed);
        log::info!("Max tracked children set to: {}", max);
    }

    /// Get child table capacity
    pub fn get_max_children(&self) -> usize {
        self.max_children.load(Ordering::Relaxed)
    }

    /// Set polling period
    pub fn set_poll_interval_ms(&self, ms: u32) {
        self.poll_interval_ms.store(ms, Ordering::Relaxed);
        log::info!("Wait poll interval set to: {} ms", ms);
    }

    /// Get polling period
    pub fn get_poll_interval_ms(&self) -> u32 {
        self.poll_interval_ms.load(Ordering::Relaxed)
    }

    /// Set unexpected-wait retry bound
    pub fn set_max_wait_retries(&self, retries: u32) {
        self.max_wait_retries.store(retries, Ordering::Relaxed);
        log::info!("Max wait retries set to: {}", retries);
    }

    /// Get unexpected-wait retry bound
    pub fn get_max_wait_retries(&self) -> u32 {
        self.max_wait_retries.load(Ordering::Relaxed)
    }

    /// Enable strict command-line checking
    pub fn set_strict_mode(&self, enabled: bool) {
        self.strict_mode.store(enabled, Ordering::Relaxed);
        log::info!(
            "POSIX-Proc strict mode: {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Check if strict mode is enabled
    pub fn is_strict_mode(&self) -> bool {
        self.strict_mode.load(Ordering::Relaxed)
    }

    /// Load configuration from a parameter line
    ///
    /// Example: `proc.max_children=64 proc.poll_ms=2 proc.strict=1`.
    /// Tokens without the `proc.` prefix are ignored; a known key with a
    /// malformed value is an error and leaves earlier tokens applied.
    pub fn load_from_cmdline(&self, cmdline: &str) -> Result<()> {
        log::debug!("Loading POSIX-Proc config from: {}", cmdline);

        for token in cmdline.split_whitespace() {
            let Some(setting) = token.strip_prefix("proc.") else {
                continue;
            };
            let Some((key, value)) = setting.split_once('=') else {
                return Err(ProcError::InvalidArgument(format!("missing value: {}", token)));
            };

            match key {
                "max_children" => self.set_max_children(parse_value(key, value)?),
                "poll_ms" => self.set_poll_interval_ms(parse_value(key, value)?),
                "wait_retries" => self.set_max_wait_retries(parse_value(key, value)?),
                "strict" => self.set_strict_mode(parse_value::<u8>(key, value)? != 0),
                _ => log::debug!("Ignoring unknown config key: {}", key),
            }
        }
        Ok(())
    }

    /// Load configuration from `POSIX_PROC_CONFIG`, if set
    pub fn load_from_env(&self) -> Result<()> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(line) => self.load_from_cmdline(&line),
            Err(_) => Ok(()),
        }
    }

    /// Export configuration as string
    pub fn export_config(&self) -> String {
        format!(
            "max_children={}, poll_ms={}, wait_retries={}, strict_mode={}",
            self.get_max_children(),
            self.get_poll_interval_ms(),
            self.get_max_wait_retries(),
            self.is_strict_mode()
        )
    }
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_value<T: core::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ProcError::InvalidArgument(format!("bad value for proc.{}: {}", key, value)))
}

/// Global POSIX-Proc configuration
pub static PROC_CONFIG: ProcConfig = ProcConfig::new();

/// Get global configuration
pub fn get_config() -> &'static ProcConfig {
    &PROC_CONFIG
}
