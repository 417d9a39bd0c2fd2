//! Agent environment settings.
//!
//! The host exposes a small set of knobs through the environment. Lookup
//! is injected so tests never mutate process-global state.

use std::path::PathBuf;

/// Knobs the acquisition core reads from the agent environment.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Directory for short-lived helper files (askpass scripts).
    pub temp_dir: PathBuf,
    /// Resolve git from PATH even on platforms that bundle a binary.
    pub prefer_git_from_path: bool,
    /// Caller manages git credentials itself; skip every credential path.
    pub self_manage_credentials: bool,
}

impl AgentSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`. `RBA_`-prefixed variables override
    /// the well-known agent knob names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let temp_dir = lookup("RBA_TEMP_DIR")
            .or_else(|| lookup("AGENT_TEMPDIRECTORY"))
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let prefer_git_from_path = lookup("RBA_PREFER_GIT_FROM_PATH")
            .or_else(|| lookup("SYSTEM_PREFERGITFROMPATH"))
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let self_manage_credentials = lookup("RBA_SELF_MANAGE_GIT_CREDS")
            .or_else(|| lookup("SYSTEM_SELFMANAGEGITCREDS"))
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Self {
            temp_dir,
            prefer_git_from_path,
            self_manage_credentials,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            prefer_git_from_path: false,
            self_manage_credentials: false,
        }
    }
}

/// Accepts 1/true/yes/on; everything else is false.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let settings = AgentSettings::from_lookup(|_| None);
        assert!(!settings.prefer_git_from_path);
        assert!(!settings.self_manage_credentials);
        assert_eq!(settings.temp_dir, std::env::temp_dir());
    }

    #[test]
    fn test_well_known_knobs() {
        let settings = AgentSettings::from_lookup(lookup_from(&[
            ("AGENT_TEMPDIRECTORY", "/agent/_temp"),
            ("SYSTEM_PREFERGITFROMPATH", "true"),
            ("SYSTEM_SELFMANAGEGITCREDS", "1"),
        ]));
        assert_eq!(settings.temp_dir, PathBuf::from("/agent/_temp"));
        assert!(settings.prefer_git_from_path);
        assert!(settings.self_manage_credentials);
    }

    #[test]
    fn test_rba_prefix_overrides_well_known() {
        let settings = AgentSettings::from_lookup(lookup_from(&[
            ("AGENT_TEMPDIRECTORY", "/agent/_temp"),
            ("RBA_TEMP_DIR", "/rba/tmp"),
            ("SYSTEM_PREFERGITFROMPATH", "true"),
            ("RBA_PREFER_GIT_FROM_PATH", "off"),
        ]));
        assert_eq!(settings.temp_dir, PathBuf::from("/rba/tmp"));
        assert!(!settings.prefer_git_from_path);
    }

    #[test]
    fn test_parse_bool_values() {
        for v in ["1", "true", "YES", "On"] {
            assert!(parse_bool(v), "expected true for '{v}'");
        }
        for v in ["0", "false", "no", "off", "", "maybe"] {
            assert!(!parse_bool(v), "expected false for '{v}'");
        }
    }
}
