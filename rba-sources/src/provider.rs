//! Per-provider authentication policy.
//!
//! A small table keyed by the repository kind, not an inheritance tree:
//! each variant decides whether the cmdline auth header is available,
//! whether it is mandatory, and how the header value is rendered.

use rba_common::secrets::SecretRegistry;
use rba_common::types::{Credential, RepositoryDescriptor, RepositoryKind};
use rba_common::urlcred;

use crate::version::{GitVersion, MIN_AUTH_HEADER, MIN_LFS_AUTH_HEADER};

/// Resolved authentication policy for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPolicy {
    kind: RepositoryKind,
    on_prem: bool,
}

impl ProviderPolicy {
    pub fn for_descriptor(descriptor: &RepositoryDescriptor) -> Self {
        let on_prem = matches!(descriptor.kind, RepositoryKind::CentralOnPrem)
            || (matches!(descriptor.kind, RepositoryKind::CentralHosted)
                && descriptor.on_prem_hosted);
        Self {
            kind: descriptor.kind,
            on_prem,
        }
    }

    pub fn kind(&self) -> RepositoryKind {
        self.kind
    }

    /// Whether `-c http.extraheader` may be used with the probed binary.
    pub fn supports_auth_header(&self, git_version: GitVersion) -> bool {
        match self.kind {
            RepositoryKind::External => false,
            RepositoryKind::GitHub
            | RepositoryKind::GitHubEnterprise
            | RepositoryKind::Bitbucket
            | RepositoryKind::CentralHosted
            | RepositoryKind::CentralOnPrem => git_version >= MIN_AUTH_HEADER,
        }
    }

    /// Whether the LFS extension honors the auth header for this provider.
    pub fn supports_lfs_auth_header(&self, lfs_version: Option<GitVersion>) -> bool {
        if matches!(self.kind, RepositoryKind::External) {
            return false;
        }
        lfs_version.is_some_and(|v| v >= MIN_LFS_AUTH_HEADER)
    }

    /// On-prem central-hosted repositories refuse to fall back to URL
    /// embedding; the binary must meet the auth-header minimum.
    pub fn requires_auth_header(&self) -> bool {
        self.on_prem
    }

    /// Render the authorization header value for `credential`, registering
    /// its secret component. `None` when the provider takes no header or
    /// the credential carries nothing to render.
    pub fn auth_header(&self, credential: &Credential, secrets: &SecretRegistry) -> Option<String> {
        if matches!(self.kind, RepositoryKind::External) {
            return None;
        }
        if self.on_prem {
            // The password/token field carries a JWT minted by the system
            // connection; rendered as a bearer header.
            return match credential {
                Credential::None => None,
                Credential::Bearer { token } | Credential::OAuth { token } => {
                    Some(urlcred::bearer_header(token, secrets))
                }
                Credential::Basic { password, .. } => {
                    Some(urlcred::bearer_header(password, secrets))
                }
            };
        }
        match credential {
            Credential::None => None,
            Credential::Bearer { token } => Some(urlcred::bearer_header(token, secrets)),
            Credential::Basic { username, password } => {
                Some(urlcred::basic_header(username, password, secrets))
            }
            Credential::OAuth { token } => Some(urlcred::basic_header("OAuth", token, secrets)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use url::Url;

    fn descriptor(kind: RepositoryKind, on_prem_hosted: bool) -> RepositoryDescriptor {
        RepositoryDescriptor {
            alias: "src".into(),
            kind,
            url: Url::parse("https://host/acme/w.git").unwrap(),
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
            on_prem_hosted,
        }
    }

    #[test]
    fn test_external_never_uses_header() {
        let policy = ProviderPolicy::for_descriptor(&descriptor(RepositoryKind::External, false));
        assert!(!policy.supports_auth_header(GitVersion::new(2, 40, 0)));
        assert!(!policy.requires_auth_header());
        let secrets = SecretRegistry::new();
        let cred = Credential::Basic {
            username: "u".into(),
            password: "pw".into(),
        };
        assert_eq!(policy.auth_header(&cred, &secrets), None);
    }

    #[test]
    fn test_github_header_gated_on_version() {
        let policy = ProviderPolicy::for_descriptor(&descriptor(RepositoryKind::GitHub, false));
        assert!(policy.supports_auth_header(GitVersion::new(2, 9, 0)));
        assert!(!policy.supports_auth_header(GitVersion::new(2, 8, 4)));
        assert!(!policy.requires_auth_header());
    }

    #[test]
    fn test_github_renders_basic_header() {
        let policy = ProviderPolicy::for_descriptor(&descriptor(RepositoryKind::GitHub, false));
        let secrets = SecretRegistry::new();
        let header = policy
            .auth_header(
                &Credential::Basic {
                    username: "x".into(),
                    password: "tok".into(),
                },
                &secrets,
            )
            .unwrap();
        assert_eq!(header, "basic eDp0b2s=");
    }

    #[test]
    fn test_oauth_encodes_as_basic_with_literal_username() {
        let policy =
            ProviderPolicy::for_descriptor(&descriptor(RepositoryKind::CentralHosted, false));
        let secrets = SecretRegistry::new();
        let header = policy
            .auth_header(&Credential::OAuth { token: "tok".into() }, &secrets)
            .unwrap();
        let expected = urlcred::basic_header("OAuth", "tok", &SecretRegistry::new());
        assert_eq!(header, expected);
    }

    #[test]
    fn test_on_prem_requires_header_and_renders_bearer() {
        let policy =
            ProviderPolicy::for_descriptor(&descriptor(RepositoryKind::CentralOnPrem, false));
        assert!(policy.requires_auth_header());
        let secrets = SecretRegistry::new();
        let header = policy
            .auth_header(&Credential::Bearer { token: "jwt".into() }, &secrets)
            .unwrap();
        assert_eq!(header, "bearer jwt");
    }

    #[test]
    fn test_central_hosted_on_prem_flag_promotes_to_strict() {
        let policy =
            ProviderPolicy::for_descriptor(&descriptor(RepositoryKind::CentralHosted, true));
        assert!(policy.requires_auth_header());
    }

    #[test]
    fn test_lfs_header_gated_on_extension_version() {
        let policy = ProviderPolicy::for_descriptor(&descriptor(RepositoryKind::GitHub, false));
        assert!(policy.supports_lfs_auth_header(Some(GitVersion::new(2, 1, 0))));
        assert!(!policy.supports_lfs_auth_header(Some(GitVersion::new(2, 0, 2))));
        assert!(!policy.supports_lfs_auth_header(None));
    }
}
