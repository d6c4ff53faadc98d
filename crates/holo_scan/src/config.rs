use anyhow::{Context, Result};

pub const DEFAULT_MAX_SCAN_RANGES: usize = 50_000;

/// Planner limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPlannerConfig {
    /// Largest slot-range cross product a skip scan may carry before it is
    /// widened to its leading slot.
    pub max_scan_ranges: usize,
}

impl Default for ScanPlannerConfig {
    fn default() -> Self {
        Self {
            max_scan_ranges: DEFAULT_MAX_SCAN_RANGES,
        }
    }
}

impl ScanPlannerConfig {
    /// Loads limits from `HOLO_SCAN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let max_scan_ranges = parse_usize(
            std::env::var("HOLO_SCAN_MAX_SKIP_SCAN_RANGES").ok(),
            DEFAULT_MAX_SCAN_RANGES,
        )?
        .max(1);
        Ok(Self { max_scan_ranges })
    }
}

/// Parses an optional environment value, falling back to `default_value`
/// when unset. Surrounding whitespace is ignored.
pub fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

pub fn parse_u64(value: Option<String>, default_value: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid u64 value: {raw}")),
        None => Ok(default_value),
    }
}

/// Accepts `true`/`false` in any case.
pub fn parse_bool(value: Option<String>, default_value: bool) -> Result<bool> {
    match value {
        Some(raw) => raw
            .trim()
            .to_ascii_lowercase()
            .parse::<bool>()
            .with_context(|| format!("invalid bool value: {raw}")),
        None => Ok(default_value),
    }
}
