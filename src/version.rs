//! Build information embedded at compile time

use std::fmt;

use serde::Serialize;

/// Build information embedded at compile time
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short git commit hash
    pub git_hash: &'static str,
    /// "true", "false" or "unknown"
    pub git_dirty: &'static str,
    pub build_timestamp: &'static str,
    /// Target triple (e.g., x86_64-unknown-linux-gnu)
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("FANOUT_GIT_HASH"),
            git_dirty: env!("FANOUT_GIT_DIRTY"),
            build_timestamp: env!("FANOUT_BUILD_TIMESTAMP"),
            target: env!("FANOUT_TARGET"),
            profile: env!("FANOUT_PROFILE"),
            rustc_version: env!("FANOUT_RUSTC_VERSION"),
        }
    }

    /// Version with git hash (e.g., "0.1.0-abc1234")
    pub fn full_version(&self) -> String {
        if self.git_dirty == "true" {
            format!("{}-{}-dirty", self.version, self.git_hash)
        } else {
            format!("{}-{}", self.version, self.git_hash)
        }
    }

    /// Version line shown by `--version`
    pub fn short_version(&self) -> String {
        format!("{} ({})", self.version, self.git_hash)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f, "  Built:    {} ({})", self.build_timestamp, self.profile)?;
        writeln!(f, "  Target:   {}", self.target)?;
        writeln!(f, "  Compiler: {}", self.rustc_version)
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_contains_hash() {
        let info = build_info();
        assert!(!info.version.is_empty());
        assert!(info.full_version().starts_with(info.version));
        assert!(info.full_version().contains(info.git_hash));
    }

    #[test]
    fn test_display_and_json() {
        let info = build_info();
        assert!(info.to_string().contains("Target:"));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "fanout");
    }
}
