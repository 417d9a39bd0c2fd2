//! Version probing for git and the git-lfs extension.

use rba_common::AcquireError;
use std::sync::OnceLock;

/// Minimum git version with `-c http.extraheader` support.
pub const MIN_AUTH_HEADER: GitVersion = GitVersion::new(2, 9, 0);
/// Minimum git version able to override the TLS backend on platforms whose
/// default stack is not OpenSSL.
pub const MIN_SSL_BACKEND: GitVersion = GitVersion::new(2, 14, 2);
/// Minimum git-lfs version honoring `http.<url>.extraheader`.
pub const MIN_LFS_AUTH_HEADER: GitVersion = GitVersion::new(2, 1, 0);

/// Parsed `major.minor.patch` of an external binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl GitVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the first `major.minor[.patch]` group from probe output.
    ///
    /// Tolerates platform suffixes (`git version 2.39.2.windows.1`) and the
    /// LFS banner shape (`git-lfs/2.13.3 (GitHub; ...)`).
    pub fn parse(output: &str) -> Result<Self, AcquireError> {
        static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            regex::Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("static version pattern")
        });
        let caps = re.captures(output).ok_or_else(|| {
            AcquireError::BadInput(format!("no version number in probe output '{output}'"))
        })?;
        let part = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().parse::<u32>().unwrap_or(0))
                .unwrap_or(0)
        };
        Ok(Self::new(part(1), part(2), part(3)))
    }
}

impl std::fmt::Display for GitVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
