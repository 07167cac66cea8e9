use serde::{Deserialize, Serialize};

/// Guards applied to spec documents before they are canonicalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecLimits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for SpecLimits {
    fn default() -> Self {
        Self { max_bytes: 1 << 20, max_nodes: 100_000 } // 1 MiB
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub limits: SpecLimits,
    /// Drop tracking when a Read fetch fails for a reason other than not-found.
    /// When false the failure is returned instead.
    pub untrack_on_read_error: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { limits: SpecLimits::default(), untrack_on_read_error: true }
    }
}

impl ReconcileConfig {
    /// Read `MULTIVERSE_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let max_bytes = lookup("MULTIVERSE_MAX_SPEC_BYTES").and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.limits.max_bytes);
        let max_nodes = lookup("MULTIVERSE_MAX_SPEC_NODES").and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.limits.max_nodes);
        let untrack_on_read_error = lookup("MULTIVERSE_READ_ERROR_UNTRACKS")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(d.untrack_on_read_error);
        Self { limits: SpecLimits { max_bytes, max_nodes }, untrack_on_read_error }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim() {
        "1" => Some(true),
        "0" => Some(false),
        s if s.eq_ignore_ascii_case("true") => Some(true),
        s if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset_or_garbage() {
        let env: HashMap<&str, &str> = [("MULTIVERSE_MAX_SPEC_BYTES", "lots"), ("MULTIVERSE_READ_ERROR_UNTRACKS", "maybe")].into();
        let cfg = ReconcileConfig::from_lookup(|k| env.get(k).map(|s| s.to_string()));
        assert_eq!(cfg, ReconcileConfig::default());
        assert_eq!(cfg.limits.max_bytes, 1024 * 1024);
    }

    #[test]
    fn reads_overrides() {
        let env: HashMap<&str, &str> = [
            ("MULTIVERSE_MAX_SPEC_BYTES", "64"),
            ("MULTIVERSE_MAX_SPEC_NODES", "8"),
            ("MULTIVERSE_READ_ERROR_UNTRACKS", "FALSE"),
        ]
        .into();
        let cfg = ReconcileConfig::from_lookup(|k| env.get(k).map(|s| s.to_string()));
        assert_eq!(cfg.limits, SpecLimits { max_bytes: 64, max_nodes: 8 });
        assert!(!cfg.untrack_on_read_error);
    }
}
