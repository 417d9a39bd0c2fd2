//! Core data model for source acquisition.

use crate::errors::AcquireError;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Repository provider variant. Decides authentication strategy, header
/// encoding, and minimum git version requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryKind {
    /// Externally hosted git endpoint the agent holds no policy for.
    External,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "github_enterprise")]
    GitHubEnterprise,
    Bitbucket,
    /// Cloud-hosted central service repository.
    CentralHosted,
    /// On-premises central service repository.
    CentralOnPrem,
}

impl std::fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::GitHub => write!(f, "github"),
            Self::GitHubEnterprise => write!(f, "github_enterprise"),
            Self::Bitbucket => write!(f, "bitbucket"),
            Self::CentralHosted => write!(f, "central_hosted"),
            Self::CentralOnPrem => write!(f, "central_on_prem"),
        }
    }
}

/// The requested state of one repository inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Unique name within the job.
    pub alias: String,
    pub kind: RepositoryKind,
    /// Absolute fetch URL.
    pub url: Url,
    /// Symbolic ref or full ref path to fetch.
    #[serde(default)]
    pub branch: String,
    /// Optional 40-hex commit; overrides `branch` for checkout when set.
    #[serde(default)]
    pub commit: String,
    /// Absolute local directory for the working tree.
    pub target_path: PathBuf,
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub submodules: bool,
    #[serde(default)]
    pub nested_submodules: bool,
    #[serde(default)]
    pub accept_untrusted_certs: bool,
    /// 0 means fetch the full history (unshallow).
    #[serde(default)]
    pub fetch_depth: u32,
    #[serde(default)]
    pub lfs: bool,
    /// Leave injected credentials on disk after checkout.
    #[serde(default)]
    pub expose_credentials: bool,
    /// Marks a central-hosted repository as served on-premises.
    #[serde(default)]
    pub on_prem_hosted: bool,
}

impl RepositoryDescriptor {
    /// Validate the descriptor invariants before an acquisition starts.
    pub fn validate(&self) -> Result<(), AcquireError> {
        if self.url.cannot_be_a_base() || self.url.host_str().is_none() {
            return Err(AcquireError::BadInput(format!(
                "repository url '{}' is not an absolute http(s) url",
                self.url
            )));
        }
        match self.url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(AcquireError::BadInput(format!(
                    "unsupported url scheme '{other}' for repository '{}'",
                    self.alias
                )));
            }
        }
        if !self.commit.is_empty()
            && (self.commit.len() != 40 || !self.commit.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(AcquireError::BadInput(format!(
                "commit '{}' is not a 40-character hex revision",
                self.commit
            )));
        }
        if !self.target_path.is_absolute() {
            return Err(AcquireError::BadInput(format!(
                "target path '{}' is not absolute",
                self.target_path.display()
            )));
        }
        Ok(())
    }
}

/// Credential supplied with a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scheme")]
pub enum Credential {
    /// Caller manages credentials itself; the orchestrator skips every
    /// auth-header, URL-embedding, and config-cleanup path.
    #[default]
    None,
    /// Opaque token rendered as `Authorization: bearer <t>`.
    Bearer { token: String },
    /// Username + password rendered as `Authorization: basic base64(u:p)`.
    Basic { username: String, password: String },
    /// Access token with literal username `OAuth`, encoded as Basic.
    OAuth { token: String },
}

impl Credential {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Username/password pair for URL embedding, if this credential has
    /// one.
    pub fn userinfo(&self) -> Option<(&str, &str)> {
        match self {
            Self::None => None,
            Self::Bearer { .. } => None,
            Self::Basic { username, password } => Some((username.as_str(), password.as_str())),
            Self::OAuth { token } => Some(("OAuth", token.as_str())),
        }
    }

    /// The secret component to register before any use.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Bearer { token } | Self::OAuth { token } => Some(token),
            Self::Basic { password, .. } => Some(password),
        }
    }
}

/// Mutual-TLS material configured on the agent. Relevant only when the
/// repository shares scheme and host with the control-plane endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCertificateBundle {
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub client_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub client_key_file: Option<PathBuf>,
    #[serde(default)]
    pub client_key_password: Option<String>,
    #[serde(default)]
    pub skip_server_validation: bool,
}

impl AgentCertificateBundle {
    /// Whether this bundle applies to `repository`: same scheme and host
    /// as the control-plane endpoint.
    pub fn applies_to(&self, repository: &Url, control_plane: &Url) -> bool {
        repository.scheme() == control_plane.scheme()
            && repository.host_str() == control_plane.host_str()
    }
}

/// Web proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Proxy URL, or empty when no proxy is configured.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Regular expressions matched case-insensitively against the absolute
    /// repository URL.
    #[serde(default)]
    pub bypass_list: Vec<String>,
}

impl ProxySettings {
    pub fn is_configured(&self) -> bool {
        !self.address.is_empty()
    }

    /// Pure predicate: whether `url` is excluded from proxying.
    ///
    /// Invalid bypass patterns are skipped rather than failing the
    /// acquisition.
    pub fn is_bypassed(&self, url: &Url) -> bool {
        let target = url.as_str();
        self.bypass_list.iter().any(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(target))
                .unwrap_or(false)
        })
    }
}

/// Control-plane endpoint and the credential the agent holds for it.
#[derive(Debug, Clone)]
pub struct SystemConnection {
    pub url: Url,
    pub credential: Credential,
}

/// Derived state of the on-disk target directory. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingCopyState {
    /// Directory missing or empty.
    Absent,
    /// Directory exists but the recorded origin does not match the
    /// descriptor URL.
    Foreign,
    /// Origin matches; clean state assumed.
    Local,
    /// Origin matches but an index lock file is present.
    Locked,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str) -> RepositoryDescriptor {
        RepositoryDescriptor {
            alias: "src".into(),
            kind: RepositoryKind::GitHub,
            url: Url::parse(url).unwrap(),
            branch: "refs/heads/main".into(),
            commit: String::new(),
            target_path: PathBuf::from("/work/1/src"),
            clean: false,
            submodules: false,
            nested_submodules: false,
            accept_untrusted_certs: false,
            fetch_depth: 0,
            lfs: false,
            expose_credentials: false,
            on_prem_hosted: false,
        }
    }

    #[test]
    fn test_descriptor_validates() {
        descriptor("https://github.com/acme/w.git").validate().unwrap();
    }

    #[test]
    fn test_descriptor_rejects_non_http_scheme() {
        let d = descriptor("ssh://git@github.com/acme/w.git");
        assert!(matches!(d.validate(), Err(AcquireError::BadInput(_))));
    }

    #[test]
    fn test_descriptor_rejects_short_commit() {
        let mut d = descriptor("https://github.com/acme/w.git");
        d.commit = "abc123".into();
        assert!(matches!(d.validate(), Err(AcquireError::BadInput(_))));
    }

    #[test]
    fn test_descriptor_accepts_full_commit() {
        let mut d = descriptor("https://github.com/acme/w.git");
        d.commit = "0123456789abcdef0123456789abcdef01234567".into();
        d.validate().unwrap();
    }

    #[test]
    fn test_descriptor_rejects_relative_target() {
        let mut d = descriptor("https://github.com/acme/w.git");
        d.target_path = PathBuf::from("work/src");
        assert!(matches!(d.validate(), Err(AcquireError::BadInput(_))));
    }

    #[test]
    fn test_oauth_userinfo_uses_literal_username() {
        let cred = Credential::OAuth {
            token: "tok".into(),
        };
        assert_eq!(cred.userinfo(), Some(("OAuth", "tok")));
    }

    #[test]
    fn test_proxy_bypass_case_insensitive() {
        let proxy = ProxySettings {
            address: "http://proxy:8080".into(),
            bypass_list: vec![r"GITHUB\.com".into()],
            ..Default::default()
        };
        let url = Url::parse("https://github.com/acme/w.git").unwrap();
        assert!(proxy.is_bypassed(&url));
    }

    #[test]
    fn test_proxy_bypass_invalid_pattern_ignored() {
        let proxy = ProxySettings {
            address: "http://proxy:8080".into(),
            bypass_list: vec!["[".into()],
            ..Default::default()
        };
        let url = Url::parse("https://github.com/acme/w.git").unwrap();
        assert!(!proxy.is_bypassed(&url));
    }

    #[test]
    fn test_cert_bundle_scope() {
        let bundle = AgentCertificateBundle::default();
        let control = Url::parse("https://ci.example.com/").unwrap();
        let same = Url::parse("https://ci.example.com/org/repo.git").unwrap();
        let other = Url::parse("https://github.com/acme/w.git").unwrap();
        assert!(bundle.applies_to(&same, &control));
        assert!(!bundle.applies_to(&other, &control));
    }
}
