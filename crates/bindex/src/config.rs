//
// config.rs
//
// Bundle index settings
//

use serde_json::Value;

/// Tunables for the bundle index. Defaults match the common workspace
/// layout of one `manifest.json` per bundle directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleIndexConfig {
    /// Glob selecting manifest files during a rebuild.
    pub files_glob: String,
    /// Path fragments excluded from workspace scans.
    pub exclusion_globs: Vec<String>,
    /// Pause between background reconciliation runs, in milliseconds.
    pub reconcile_delay_ms: u64,
    /// How long assert_clean waits for a forced reconciliation.
    pub assert_clean_timeout_ms: u64,
}

impl Default for BundleIndexConfig {
    fn default() -> Self {
        Self {
            files_glob: "**/manifest.json".to_string(),
            exclusion_globs: Vec::new(),
            reconcile_delay_ms: 2000,
            assert_clean_timeout_ms: 2000,
        }
    }
}

/// Read a `BundleIndexConfig` out of a settings document. Returns `None`
/// when the document has no `bundles` section; unknown keys and wrongly
/// typed values fall back to defaults.
pub fn parse_bundle_index_config(settings: &Value) -> Option<BundleIndexConfig> {
    let section = settings.get("bundles")?;
    let mut config = BundleIndexConfig::default();

    if let Some(glob) = section.get("filesGlob").and_then(Value::as_str) {
        config.files_glob = glob.to_string();
    }
    if let Some(paths) = section.get("ignorePaths").and_then(Value::as_array) {
        config.exclusion_globs = paths
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    if let Some(delay) = section.get("reconcileDelayMs").and_then(Value::as_u64) {
        config.reconcile_delay_ms = delay;
    }
    if let Some(timeout) = section.get("assertCleanTimeoutMs").and_then(Value::as_u64) {
        config.assert_clean_timeout_ms = timeout;
    }

    Some(config)
}
