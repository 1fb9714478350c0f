//! Engine configuration consumed by the optimization passes and the runtime.
//!
//! Values are resolved once, up front, from a read-only key lookup and then
//! passed explicitly into each pass. Lookups never fail: a missing key falls
//! back to its documented default, an unparseable one too (with a warning).

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of files on a broadcast side above which a concatenate stage is inserted.
pub const MERGE_FILES_THRESHOLD_KEY: &str = "merge-files-threshold";
/// When true the runtime does not combine small input files into shared splits.
pub const DISABLE_SPLIT_COMBINATION_KEY: &str = "disable-split-combination";
/// Reduce-side task count for grouping stages without an explicit parallelism.
pub const DEFAULT_PARALLELISM_KEY: &str = "default-parallelism";

pub const DEFAULT_MERGE_FILES_THRESHOLD: u32 = 4;
pub const DEFAULT_PARALLELISM: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Broadcast-side file count that triggers a concatenate stage (strictly greater than).
    pub merge_files_threshold: u32,

    /// Disable the runtime's implicit combination of small input files.
    pub split_combination_disabled: bool,

    /// Reduce tasks for grouping stages that do not request a parallelism.
    pub default_parallelism: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            merge_files_threshold: DEFAULT_MERGE_FILES_THRESHOLD,
            split_combination_disabled: false,
            default_parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Read-only key/value view supplied by the configuration collaborator.
pub trait PropertySource {
    fn property(&self, key: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl PropertySource for BTreeMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Environment-backed lookup: `merge-files-threshold` → `STAGEOPT_MERGE_FILES_THRESHOLD`.
struct EnvProperties;

impl PropertySource for EnvProperties {
    fn property(&self, key: &str) -> Option<String> {
        std::env::var(env_var_for(key)).ok()
    }
}

pub fn env_var_for(key: &str) -> String {
    format!("STAGEOPT_{}", key.replace('-', "_").to_ascii_uppercase())
}

impl EngineConfig {
    /// Resolve a config from a property lookup, falling back to defaults.
    pub fn from_properties(props: &dyn PropertySource) -> Self {
        let defaults = Self::default();
        Self {
            merge_files_threshold: lookup(
                props,
                MERGE_FILES_THRESHOLD_KEY,
                defaults.merge_files_threshold,
                |s| s.parse::<u32>().ok(),
            ),
            split_combination_disabled: lookup(
                props,
                DISABLE_SPLIT_COMBINATION_KEY,
                defaults.split_combination_disabled,
                parse_bool,
            ),
            default_parallelism: lookup(
                props,
                DEFAULT_PARALLELISM_KEY,
                defaults.default_parallelism,
                |s| u32::from_str(s).ok().filter(|v| *v > 0),
            ),
        }
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `STAGEOPT_MERGE_FILES_THRESHOLD`
    /// - `STAGEOPT_DISABLE_SPLIT_COMBINATION`
    /// - `STAGEOPT_DEFAULT_PARALLELISM`
    pub fn from_env() -> Self {
        Self::from_properties(&EnvProperties)
    }

    pub fn with_merge_files_threshold(mut self, threshold: u32) -> Self {
        self.merge_files_threshold = threshold;
        self
    }

    pub fn with_split_combination_disabled(mut self, disabled: bool) -> Self {
        self.split_combination_disabled = disabled;
        self
    }
}

fn lookup<T: std::fmt::Debug>(
    props: &dyn PropertySource,
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> T {
    match props.property(key) {
        None => {
            tracing::debug!(key, ?default, "configuration key missing; using default");
            default
        }
        Some(raw) => match parse(raw.trim()) {
            Some(v) => v,
            None => {
                tracing::warn!(key, value = %raw, ?default, "unparseable configuration value; using default");
                default
            }
        },
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_keys_resolve_to_defaults() {
        let cfg = EngineConfig::from_properties(&HashMap::<String, String>::new());
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.merge_files_threshold, 4);
        assert!(!cfg.split_combination_disabled);
    }

    #[test]
    fn present_keys_override_defaults() {
        let cfg = EngineConfig::from_properties(&props(&[
            (MERGE_FILES_THRESHOLD_KEY, "5"),
            (DISABLE_SPLIT_COMBINATION_KEY, "TRUE"),
            (DEFAULT_PARALLELISM_KEY, "3"),
        ]));
        assert_eq!(cfg.merge_files_threshold, 5);
        assert!(cfg.split_combination_disabled);
        assert_eq!(cfg.default_parallelism, 3);
    }

    #[test]
    fn garbage_values_fall_back_without_failing() {
        let cfg = EngineConfig::from_properties(&props(&[
            (MERGE_FILES_THRESHOLD_KEY, "many"),
            (DISABLE_SPLIT_COMBINATION_KEY, "maybe"),
            (DEFAULT_PARALLELISM_KEY, "0"),
        ]));
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn env_var_names_are_derived_from_keys() {
        assert_eq!(
            env_var_for(MERGE_FILES_THRESHOLD_KEY),
            "STAGEOPT_MERGE_FILES_THRESHOLD"
        );
        assert_eq!(
            env_var_for(DISABLE_SPLIT_COMBINATION_KEY),
            "STAGEOPT_DISABLE_SPLIT_COMBINATION"
        );
    }
}
