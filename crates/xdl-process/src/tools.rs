//! Tool availability checking
//!
//! Locates the external tools a session shells out to: `node` for the
//! packager, `adb` for port forwarding, `watchman` for recrawl recovery and
//! `ngrok` for tunnels. Missing tools are not errors here; callers decide.

use std::path::PathBuf;

use xdl_core::prelude::*;

/// Resolved paths of external tools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolAvailability {
    pub node: Option<PathBuf>,
    pub adb: Option<PathBuf>,
    pub watchman: Option<PathBuf>,
    pub ngrok: Option<PathBuf>,
}

impl ToolAvailability {
    /// Check tool availability (run once per session start)
    pub fn check() -> Self {
        let availability = Self {
            node: find_in_path("node"),
            adb: find_adb(),
            watchman: find_in_path("watchman"),
            ngrok: find_in_path("ngrok"),
        };
        debug!("Tool availability: {:?}", availability);
        availability
    }

    /// Get user-friendly message for a missing Node.js
    pub fn node_unavailable_message(&self) -> Option<&'static str> {
        if self.node.is_some() {
            None
        } else {
            Some("Node.js not found. Install Node.js to run the packager.")
        }
    }

    /// Get user-friendly message for a missing adb
    pub fn adb_unavailable_message(&self) -> Option<&'static str> {
        if self.adb.is_some() {
            None
        } else {
            Some("adb not found. Set ANDROID_HOME or install Android platform-tools.")
        }
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    which::which(name)
        .ok()
        .map(|p| dunce::canonicalize(&p).unwrap_or(p))
}

fn find_adb() -> Option<PathBuf> {
    find_in_path("adb").or_else(|| {
        adb_sdk_paths()
            .into_iter()
            .find(|p| p.is_file())
    })
}

/// Candidate adb locations under the Android SDK env vars
fn adb_sdk_paths() -> Vec<PathBuf> {
    let exe = if cfg!(windows) { "adb.exe" } else { "adb" };
    ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(|root| PathBuf::from(root).join("platform-tools").join(exe))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_reports_missing_tools() {
        let availability = ToolAvailability::default();
        assert!(availability.node_unavailable_message().is_some());
        assert!(availability.adb_unavailable_message().is_some());
    }

    #[test]
    fn test_present_tools_have_no_message() {
        let availability = ToolAvailability {
            node: Some(PathBuf::from("/usr/bin/node")),
            adb: Some(PathBuf::from("/sdk/platform-tools/adb")),
            ..Default::default()
        };
        assert!(availability.node_unavailable_message().is_none());
        assert!(availability.adb_unavailable_message().is_none());
    }

    #[test]
    #[serial]
    fn test_adb_sdk_paths_include_env_vars() {
        std::env::set_var("ANDROID_HOME", "/test/android");
        let paths = adb_sdk_paths();
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/test/android/platform-tools")));
        std::env::remove_var("ANDROID_HOME");
    }

    #[test]
    fn test_sh_is_found() {
        assert!(find_in_path("sh").is_some());
    }
}
