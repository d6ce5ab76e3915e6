//! Build metadata embedded by the build script, reported by `GET /health`
//! and `GET /status`.

/// Short git commit hash at build time, or `"unknown"` outside a checkout.
pub const GIT_HASH: &str = env!("PLCWARDEN_GIT_HASH");

/// The cargo profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("PLCWARDEN_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string including git hash and profile, e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_mentions_version() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.contains(GIT_HASH));
    }

    #[test]
    fn test_build_profile() {
        assert_eq!(BUILD_PROFILE, "debug");
    }
}
