//! Compiler configuration resolved from environment variables.
//!
//! Resolved once at the start of a compilation job; the passes read plain
//! fields without further lookups.

use std::env;

// =============================================================================
// Defaults
// =============================================================================

/// Default hotness counter reset value after an underflow.
pub const DEFAULT_HOTNESS_THRESHOLD: i16 = 1000;

/// Default young-space size in bytes.
pub const DEFAULT_YOUNG_SPACE: u64 = 4 * 1024 * 1024;

// =============================================================================
// Compiler Configuration
// =============================================================================

/// Settings shared by every lowering pass and the execution model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Dump circuits before and after each pass (`KILN_LOG_COMPILER`).
    pub log_compiler: bool,

    /// Trace every bytecode lowered by the slow path (`KILN_TRACE_BYTECODE`).
    pub trace_bytecode: bool,

    /// Run TSTypeLowering and TypeLowering (`KILN_TYPE_LOWERING`).
    pub type_lowering: bool,

    /// Inline recognized builtins (`KILN_BUILTIN_LOWERING`).
    pub builtin_lowering: bool,

    /// Verify the circuit between passes (`KILN_VERIFY`).
    pub verify: bool,

    /// Emit a profiling call ahead of specialized bytecodes (`KILN_PROFILING`).
    pub profiling: bool,

    /// Young space size in bytes (`KILN_YOUNG_SPACE`).
    pub young_space: u64,

    /// Hotness counter reset value (`KILN_HOTNESS_THRESHOLD`).
    pub hotness_threshold: i16,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            log_compiler: false,
            trace_bytecode: false,
            type_lowering: true,
            builtin_lowering: true,
            verify: cfg!(debug_assertions),
            profiling: false,
            young_space: DEFAULT_YOUNG_SPACE,
            hotness_threshold: DEFAULT_HOTNESS_THRESHOLD,
        }
    }
}

impl CompilerConfig {
    /// Resolve configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary lookup function.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| lookup(key).map_or(default, |v| parse_bool(&v, default));

        Self {
            log_compiler: flag("KILN_LOG_COMPILER", defaults.log_compiler),
            trace_bytecode: flag("KILN_TRACE_BYTECODE", defaults.trace_bytecode),
            type_lowering: flag("KILN_TYPE_LOWERING", defaults.type_lowering),
            builtin_lowering: flag("KILN_BUILTIN_LOWERING", defaults.builtin_lowering),
            verify: flag("KILN_VERIFY", defaults.verify),
            profiling: flag("KILN_PROFILING", defaults.profiling),
            young_space: lookup("KILN_YOUNG_SPACE")
                .and_then(|v| parse_size(&v))
                .unwrap_or(defaults.young_space),
            hotness_threshold: lookup("KILN_HOTNESS_THRESHOLD")
                .and_then(|v| v.trim().parse::<i16>().ok())
                .filter(|&t| t > 0)
                .unwrap_or(defaults.hotness_threshold),
        }
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

/// Interpret a boolean environment value.
///
/// Empty strings count as set, following the usual `FOO=` convention.
fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a byte count with an optional `k`/`m` suffix.
fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, scale) = if let Some(rest) = value.strip_suffix('k') {
        (rest, 1024)
    } else if let Some(rest) = value.strip_suffix('m') {
        (rest, 1024 * 1024)
    } else {
        (value.as_str(), 1)
    };
    digits.parse::<u64>().ok()?.checked_mul(scale).filter(|&n| n > 0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> CompilerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CompilerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = config_with(&[]);
        assert_eq!(config, CompilerConfig::default());
        assert!(config.type_lowering);
        assert_eq!(config.hotness_threshold, DEFAULT_HOTNESS_THRESHOLD);
    }

    #[test]
    fn test_bool_flags() {
        let config = config_with(&[
            ("KILN_LOG_COMPILER", "1"),
            ("KILN_TYPE_LOWERING", "off"),
            ("KILN_PROFILING", ""),
            ("KILN_VERIFY", "garbage"),
        ]);
        assert!(config.log_compiler);
        assert!(!config.type_lowering);
        assert!(config.profiling);
        assert_eq!(config.verify, CompilerConfig::default().verify);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(config_with(&[("KILN_YOUNG_SPACE", "64k")]).young_space, 64 * 1024);
        assert_eq!(config_with(&[("KILN_YOUNG_SPACE", "2M")]).young_space, 2 * 1024 * 1024);
        assert_eq!(
            config_with(&[("KILN_YOUNG_SPACE", "0")]).young_space,
            DEFAULT_YOUNG_SPACE
        );
    }

    #[test]
    fn test_hotness_threshold() {
        assert_eq!(config_with(&[("KILN_HOTNESS_THRESHOLD", "50")]).hotness_threshold, 50);
        assert_eq!(
            config_with(&[("KILN_HOTNESS_THRESHOLD", "-4")]).hotness_threshold,
            DEFAULT_HOTNESS_THRESHOLD
        );
    }
}
