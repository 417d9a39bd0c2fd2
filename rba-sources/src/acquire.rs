//! The source-acquisition orchestrator.
//!
//! Reconciles the on-disk state of a target directory with a repository
//! descriptor: probe the existing tree, fast-path an incremental clean or
//! recreate from scratch, inject credentials per invocation, fetch,
//! position the checkout, update submodules, and leave no credential
//! material behind unless explicitly asked to.
//!
//! Each phase resolves to an explicit outcome the state machine branches
//! on; non-zero exit codes never unwind except where no recovery path
//! exists.

use rba_common::cancel::CancelToken;
use rba_common::errors::AcquireError;
use rba_common::logsink::BuildLog;
use rba_common::secrets::SecretRegistry;
use rba_common::settings::AgentSettings;
use rba_common::types::{
    AgentCertificateBundle, Credential, ProxySettings, RepositoryDescriptor, SystemConnection,
    WorkingCopyState,
};
use rba_common::urlcred;
use std::path::Path;
use std::sync::Arc;

use crate::askpass::AskpassHelper;
use crate::config_state::{self, ConfigModifications};
use crate::git::Git;
use crate::provider::ProviderPolicy;
use crate::version::{MIN_AUTH_HEADER, MIN_SSL_BACKEND};

// ── Ref normalization ──────────────────────────────────────────────────────

/// Normalize a requested branch to the remote-tracking form used for
/// checkout. Idempotent: already-normalized refs pass through unchanged.
pub fn to_remote_ref(branch: &str) -> String {
    if branch.is_empty() || branch == "master" {
        "refs/remotes/origin/master".to_string()
    } else if let Some(name) = branch.strip_prefix("refs/heads/") {
        format!("refs/remotes/origin/{name}")
    } else if let Some(name) = branch.strip_prefix("refs/pull/") {
        format!("refs/remotes/pull/{name}")
    } else {
        branch.to_string()
    }
}

/// Whether `branch` is a server-synthesized pull-request ref.
pub fn is_pull_request_ref(branch: &str) -> bool {
    branch.starts_with("refs/pull/") || branch.starts_with("refs/remotes/pull/")
}

/// Render `-c key=value` pairs into the prefix string spliced before the
/// subcommand verb. Values are quoted; embedded quotes are escaped.
fn render_config_prefix(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| {
            let escaped = value.replace('\\', r"\\").replace('"', r#"\""#);
            format!(r#"-c {key}="{escaped}""#)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compare a recorded origin URL with the requested one. Credentials a
/// previous (possibly cancelled) run left embedded do not make the tree
/// foreign.
fn urls_match(recorded: &str, requested: &str) -> bool {
    let sanitized = urlcred::strip_credentials(recorded).unwrap_or_else(|_| recorded.to_string());
    let trim = |s: &str| s.trim_end_matches('/').to_ascii_lowercase();
    trim(&sanitized) == trim(requested)
}

// ── Context ────────────────────────────────────────────────────────────────

/// Everything the orchestrator needs from its host, bundled explicitly;
/// there is no ambient state.
pub struct AcquireContext {
    pub settings: AgentSettings,
    pub system: SystemConnection,
    pub log: Arc<dyn BuildLog>,
    pub secrets: SecretRegistry,
}

/// Drives acquisitions against one git adapter.
pub struct SourceAcquirer<G: Git> {
    git: G,
    ctx: AcquireContext,
}

impl<G: Git> SourceAcquirer<G> {
    pub fn new(git: G, ctx: AcquireContext) -> Self {
        Self { git, ctx }
    }

    pub fn context(&self) -> &AcquireContext {
        &self.ctx
    }

    /// Surrender the adapter, discarding the context.
    pub fn into_git(self) -> G {
        self.git
    }

    /// Produce a working tree at `descriptor.target_path` positioned at
    /// the requested revision, submodules updated when requested, injected
    /// credentials removed unless exposure was asked for.
    pub async fn acquire(
        &self,
        descriptor: &RepositoryDescriptor,
        credential: &Credential,
        certs: &AgentCertificateBundle,
        proxy: &ProxySettings,
        cancel: &CancelToken,
    ) -> Result<(), AcquireError> {
        descriptor.validate()?;
        if let Some(secret) = credential.secret() {
            self.ctx.log.set_secret(secret);
        }

        let policy = ProviderPolicy::for_descriptor(descriptor);
        // Strict gate before any filesystem mutation.
        if policy.requires_auth_header() {
            self.git.ensure_version(MIN_AUTH_HEADER, true)?;
        }

        let mut acquisition = Acquisition {
            git: &self.git,
            ctx: &self.ctx,
            descriptor,
            credential,
            certs,
            proxy,
            policy,
            cancel,
            mods: ConfigModifications::new(),
            askpass: None,
            fetch_prefix: String::new(),
            lfs_prefix: String::new(),
            submodule_prefix: String::new(),
            persist_pairs: Vec::new(),
        };

        match acquisition.run().await {
            Ok(()) => Ok(()),
            Err(err) => {
                // The passphrase helper never survives a failed
                // acquisition. Config scrubbing stays with the caller's
                // post-job cleanup.
                if let Some(helper) = acquisition.askpass.take() {
                    helper.remove();
                }
                Err(err)
            }
        }
    }
}

// ── Per-acquisition state machine ──────────────────────────────────────────

struct Acquisition<'a, G: Git> {
    git: &'a G,
    ctx: &'a AcquireContext,
    descriptor: &'a RepositoryDescriptor,
    credential: &'a Credential,
    certs: &'a AgentCertificateBundle,
    proxy: &'a ProxySettings,
    policy: ProviderPolicy,
    cancel: &'a CancelToken,
    mods: ConfigModifications,
    askpass: Option<AskpassHelper>,
    fetch_prefix: String,
    lfs_prefix: String,
    submodule_prefix: String,
    persist_pairs: Vec<(String, String)>,
}

impl<'a, G: Git> Acquisition<'a, G> {
    fn checkpoint(&self) -> Result<(), AcquireError> {
        if self.cancel.is_cancelled() {
            Err(AcquireError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn work(&self) -> &Path {
        &self.descriptor.target_path
    }

    async fn run(&mut self) -> Result<(), AcquireError> {
        self.checkpoint()?;
        let state = self.probe().await?;
        self.ctx
            .log
            .debug(&format!("target directory state: {state:?}"));

        match state {
            WorkingCopyState::Local | WorkingCopyState::Locked => {
                let keep = self
                    .reconcile(matches!(state, WorkingCopyState::Locked))
                    .await?;
                if !keep {
                    self.purge_and_initialize().await?;
                }
            }
            WorkingCopyState::Foreign | WorkingCopyState::Absent => {
                self.purge_and_initialize().await?;
            }
        }

        self.checkpoint()?;
        self.prepare().await?;
        self.checkpoint()?;
        self.fetch().await?;
        self.checkpoint()?;
        self.resolve_checkout().await?;
        self.checkpoint()?;
        if self.descriptor.submodules {
            self.update_submodules().await?;
            self.checkpoint()?;
        }
        self.finalize().await
    }

    // ── Probe ──────────────────────────────────────────────────────────

    async fn probe(&self) -> Result<WorkingCopyState, AcquireError> {
        let target = self.work();
        if !target.exists() {
            return Ok(WorkingCopyState::Absent);
        }
        let mut entries = std::fs::read_dir(target)
            .map_err(|e| AcquireError::fs(target.to_path_buf(), e))?;
        if entries.next().is_none() {
            return Ok(WorkingCopyState::Absent);
        }
        if !target.join(".git").exists() {
            return Ok(WorkingCopyState::Foreign);
        }
        match self.git.get_fetch_url(target, self.cancel).await? {
            Some(recorded) if urls_match(&recorded, self.descriptor.url.as_str()) => {
                if target.join(".git").join("index.lock").exists() {
                    Ok(WorkingCopyState::Locked)
                } else {
                    Ok(WorkingCopyState::Local)
                }
            }
            _ => Ok(WorkingCopyState::Foreign),
        }
    }

    // ── Reconcile / soft clean ─────────────────────────────────────────

    /// Returns `false` when the existing tree could not be brought back to
    /// a usable state and must be recreated.
    async fn reconcile(&mut self, locked: bool) -> Result<bool, AcquireError> {
        if locked {
            let lock = self.work().join(".git").join("index.lock");
            match std::fs::remove_file(&lock) {
                Ok(()) => self
                    .ctx
                    .log
                    .output(&format!("deleted stale index lock {}", lock.display())),
                Err(e) => self
                    .ctx
                    .log
                    .output(&format!("unable to delete index lock {}: {e}", lock.display())),
            }
        }
        if self.descriptor.clean {
            if !self.soft_clean().await? {
                self.ctx
                    .log
                    .warning("unable to clean the existing working tree, recreating it");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn soft_clean(&self) -> Result<bool, AcquireError> {
        let work = self.work();
        if self.git.clean(work, self.cancel).await? != 0 {
            return Ok(false);
        }
        if self.git.reset_hard(work, self.cancel).await? != 0 {
            return Ok(false);
        }
        if self.descriptor.submodules {
            if self.git.submodule_foreach_clean(work, self.cancel).await? != 0 {
                return Ok(false);
            }
            if self.git.submodule_foreach_reset(work, self.cancel).await? != 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Purge / initialize ─────────────────────────────────────────────

    async fn purge_and_initialize(&self) -> Result<(), AcquireError> {
        let target = self.work();
        if target.exists() {
            self.ctx
                .log
                .output(&format!("deleting {}", target.display()));
            remove_tree(target, self.cancel)?;
        }
        std::fs::create_dir_all(target).map_err(|e| AcquireError::fs(target.to_path_buf(), e))?;

        let code = self.git.init(target, self.cancel).await?;
        if code != 0 {
            return Err(AcquireError::binary("init", code));
        }
        let code = self
            .git
            .remote_add(target, "origin", self.descriptor.url.as_str(), self.cancel)
            .await?;
        if code != 0 {
            return Err(AcquireError::binary("remote add", code));
        }
        Ok(())
    }

    // ── Prepare ────────────────────────────────────────────────────────

    async fn prepare(&mut self) -> Result<(), AcquireError> {
        let work = self.work().to_path_buf();

        match self.git.disable_auto_gc(&work, self.cancel).await {
            Ok(0) => {}
            Ok(code) => self.ctx.log.warning(&format!(
                "unable to disable automatic garbage collection (exit code {code})"
            )),
            Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
            Err(e) => self
                .ctx
                .log
                .warning(&format!("unable to disable automatic garbage collection: {e}")),
        }

        // Scrub credential keys a previous run may have left behind.
        let stale_keys = [
            format!("http.{}.extraheader", self.descriptor.url.as_str()),
            "http.proxy".to_string(),
        ];
        for key in stale_keys {
            if self.git.config_exists(&work, &key, self.cancel).await? {
                let code = self.git.config_unset(&work, &key, self.cancel).await?;
                if code != 0 {
                    config_state::scrub_config_key(&config_state::config_file(&work), &key)?;
                }
            }
        }

        let self_managed = self.ctx.settings.self_manage_credentials;
        let authority = urlcred::authority_prefix(&self.descriptor.url);
        let url_literal = self.descriptor.url.as_str().to_string();

        let mut fetch_pairs: Vec<(String, String)> = Vec::new();
        let mut submodule_pairs: Vec<(String, String)> = Vec::new();
        let mut lfs_pairs: Vec<(String, String)> = Vec::new();
        let mut persist: Vec<(String, String)> = Vec::new();

        if !self_managed && !self.credential.is_none() {
            if self.policy.supports_auth_header(self.git.version()) {
                if let Some(header) = self.policy.auth_header(self.credential, &self.ctx.secrets) {
                    let value = format!("AUTHORIZATION: {header}");
                    fetch_pairs.push(("http.extraheader".to_string(), value.clone()));
                    submodule_pairs
                        .push((format!("http.{authority}/.extraheader"), value.clone()));
                    persist.push((format!("http.{url_literal}.extraheader"), value.clone()));

                    if self.descriptor.lfs {
                        let lfs_endpoint = urlcred::lfs_url(&url_literal);
                        if self.policy.supports_lfs_auth_header(self.git.lfs_version()) {
                            lfs_pairs.push((format!("http.{lfs_endpoint}.extraheader"), value));
                        } else {
                            self.configure_embedded_lfs_urls(&work, &lfs_endpoint).await?;
                        }
                    }
                }
            } else {
                match self.credential.userinfo() {
                    Some((username, password)) => {
                        let embedded =
                            urlcred::embed_credentials(&url_literal, username, password)?;
                        let code = self
                            .git
                            .remote_set_url(&work, &embedded, self.cancel)
                            .await?;
                        if code != 0 {
                            return Err(AcquireError::binary("remote set-url", code));
                        }
                        if self.descriptor.lfs {
                            let lfs_endpoint = urlcred::lfs_url(&url_literal);
                            self.configure_embedded_lfs_urls(&work, &lfs_endpoint).await?;
                        }
                    }
                    None => {
                        // Treated as no-credential rather than failing.
                        self.ctx.log.warning(&format!(
                            "the supplied credential scheme cannot be used for {} repositories \
                             with git {}; continuing without credentials",
                            self.policy.kind(),
                            self.git.version()
                        ));
                    }
                }
            }
        }

        if self.proxy.is_configured() && !self.proxy.is_bypassed(&self.descriptor.url) {
            let proxy_url = if self.proxy.username.is_empty() {
                self.proxy.address.clone()
            } else {
                self.ctx.log.set_secret(&self.proxy.password);
                urlcred::embed_credentials(
                    &self.proxy.address,
                    &self.proxy.username,
                    &self.proxy.password,
                )?
            };
            fetch_pairs.push(("http.proxy".to_string(), proxy_url.clone()));
            // Proxying is host-independent; the submodule phase reuses the
            // unscoped key.
            submodule_pairs.push(("http.proxy".to_string(), proxy_url.clone()));
            persist.push(("http.proxy".to_string(), proxy_url));
        }

        let certs_apply = self
            .certs
            .applies_to(&self.descriptor.url, &self.ctx.system.url);

        if self.descriptor.accept_untrusted_certs
            || (certs_apply && self.certs.skip_server_validation)
        {
            fetch_pairs.push(("http.sslVerify".to_string(), "false".to_string()));
            submodule_pairs.push((format!("http.{authority}/.sslVerify"), "false".to_string()));
            persist.push(("http.sslVerify".to_string(), "false".to_string()));
        }

        if certs_apply {
            if let Some(ca) = &self.certs.ca_file {
                let ca = ca.display().to_string();
                fetch_pairs.push(("http.sslcainfo".to_string(), ca.clone()));
                submodule_pairs.push((format!("http.{authority}/.sslcainfo"), ca.clone()));
                persist.push(("http.sslcainfo".to_string(), ca));
            }
            if let Some(cert) = &self.certs.client_cert_file {
                let cert = cert.display().to_string();
                fetch_pairs.push(("http.sslcert".to_string(), cert.clone()));
                submodule_pairs.push((format!("http.{authority}/.sslcert"), cert.clone()));
                persist.push(("http.sslcert".to_string(), cert));

                if let Some(key) = &self.certs.client_key_file {
                    let key = key.display().to_string();
                    fetch_pairs.push(("http.sslkey".to_string(), key.clone()));
                    submodule_pairs.push((format!("http.{authority}/.sslkey"), key.clone()));
                    persist.push(("http.sslkey".to_string(), key));
                }
                if let Some(passphrase) = &self.certs.client_key_password {
                    self.ctx.log.set_secret(passphrase);
                    let helper =
                        AskpassHelper::create(&self.ctx.settings.temp_dir, passphrase)?;
                    let helper_path = helper.path().display().to_string();
                    self.askpass = Some(helper);

                    for pairs in [&mut fetch_pairs, &mut submodule_pairs, &mut persist] {
                        pairs.push((
                            "http.sslCertPasswordProtected".to_string(),
                            "true".to_string(),
                        ));
                        pairs.push(("core.askpass".to_string(), helper_path.clone()));
                    }
                }
            }
        }

        if cfg!(windows) && self.git.ensure_version(MIN_SSL_BACKEND, false)? {
            for pairs in [&mut fetch_pairs, &mut submodule_pairs, &mut persist] {
                pairs.push(("http.sslbackend".to_string(), "schannel".to_string()));
            }
        }

        if self.descriptor.lfs {
            let code = self.git.lfs_install(&work, self.cancel).await?;
            if code != 0 {
                return Err(AcquireError::binary("lfs install", code));
            }
        }

        let mut combined_lfs = fetch_pairs.clone();
        combined_lfs.extend(lfs_pairs);
        self.fetch_prefix = render_config_prefix(&fetch_pairs);
        self.lfs_prefix = render_config_prefix(&combined_lfs);
        self.submodule_prefix = render_config_prefix(&submodule_pairs);
        self.persist_pairs = persist;
        Ok(())
    }

    /// Header auth is unavailable for LFS here: point the LFS URL keys at
    /// a credential-embedded endpoint instead, recorded for cleanup.
    async fn configure_embedded_lfs_urls(
        &mut self,
        work: &Path,
        lfs_endpoint: &str,
    ) -> Result<(), AcquireError> {
        let Some((username, password)) = self.credential.userinfo() else {
            self.ctx.log.warning(
                "large-file support was requested but the credential cannot be applied to \
                 the LFS endpoint; continuing without LFS credentials",
            );
            return Ok(());
        };
        let embedded = urlcred::embed_credentials(lfs_endpoint, username, password)?;
        for key in ["remote.origin.lfsurl", "remote.origin.lfspushurl"] {
            let code = self.git.config_set(work, key, &embedded, self.cancel).await?;
            if code != 0 {
                return Err(AcquireError::binary("config", code));
            }
            self.mods.record(key, &embedded);
        }
        Ok(())
    }

    // ── Fetch ──────────────────────────────────────────────────────────

    async fn fetch(&mut self) -> Result<(), AcquireError> {
        self.ctx.log.progress(0, "fetching repository");

        let branch = self.descriptor.branch.as_str();
        let mut refspecs = Vec::new();
        if is_pull_request_ref(branch) {
            // Pull-request refs are not covered by the default refspec.
            refspecs.push("+refs/heads/*:refs/remotes/origin/*".to_string());
            refspecs.push(format!("+{branch}:{}", to_remote_ref(branch)));
        }

        let unshallow =
            self.descriptor.fetch_depth == 0 && self.work().join(".git").join("shallow").exists();
        let code = self
            .git
            .fetch(
                self.work(),
                &self.fetch_prefix,
                &refspecs,
                self.descriptor.fetch_depth,
                unshallow,
                self.cancel,
            )
            .await?;
        if code != 0 {
            return Err(AcquireError::binary("fetch", code));
        }
        Ok(())
    }

    // ── Checkout ───────────────────────────────────────────────────────

    async fn resolve_checkout(&mut self) -> Result<(), AcquireError> {
        let descriptor = self.descriptor;
        let target_rev = if is_pull_request_ref(&descriptor.branch) || descriptor.commit.is_empty()
        {
            to_remote_ref(&descriptor.branch)
        } else {
            descriptor.commit.clone()
        };

        if descriptor.lfs {
            let code = self
                .git
                .lfs_fetch(self.work(), &self.lfs_prefix, &target_rev, self.cancel)
                .await?;
            if code != 0 {
                let logs_code = match self.git.lfs_logs(self.work(), self.cancel).await {
                    Ok(logs_code) => logs_code,
                    Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
                    Err(_) => -1,
                };
                self.ctx.log.error(&format!(
                    "git lfs fetch exited with code {code}; git lfs logs last exited with code \
                     {logs_code}"
                ));
                return Err(AcquireError::binary("lfs fetch", code));
            }
        }

        self.ctx
            .log
            .progress(80, &format!("checking out {target_rev}"));
        let code = self
            .git
            .checkout(self.work(), &target_rev, self.cancel)
            .await?;
        if code != 0 {
            if descriptor.fetch_depth > 0 {
                self.ctx.log.warning(&format!(
                    "checkout failed; the shallow fetch depth of {} may not contain the \
                     requested revision",
                    descriptor.fetch_depth
                ));
            }
            return Err(AcquireError::binary("checkout", code));
        }
        Ok(())
    }

    // ── Submodules ─────────────────────────────────────────────────────

    async fn update_submodules(&mut self) -> Result<(), AcquireError> {
        self.ctx.log.progress(90, "updating submodules");
        let recursive = self.descriptor.nested_submodules;

        let code = self
            .git
            .submodule_sync(self.work(), recursive, self.cancel)
            .await?;
        if code != 0 {
            return Err(AcquireError::binary("submodule sync", code));
        }
        let code = self
            .git
            .submodule_update(self.work(), &self.submodule_prefix, recursive, self.cancel)
            .await?;
        if code != 0 {
            return Err(AcquireError::binary("submodule update", code));
        }
        Ok(())
    }

    // ── Finalize ───────────────────────────────────────────────────────

    async fn finalize(&mut self) -> Result<(), AcquireError> {
        if self.ctx.settings.self_manage_credentials {
            return Ok(());
        }

        let work = self.work().to_path_buf();
        if self.descriptor.expose_credentials {
            for (key, value) in std::mem::take(&mut self.persist_pairs) {
                let code = self.git.config_set(&work, &key, &value, self.cancel).await?;
                if code != 0 {
                    return Err(AcquireError::binary("config", code));
                }
                self.mods.record(&key, &value);
            }
            // The askpass helper stays behind deliberately; core.askpass
            // points at it.
            return Ok(());
        }

        config_state::remove_embedded_url(self.git, &work, self.ctx.log.as_ref(), self.cancel)
            .await?;
        self.mods
            .remove_all(self.git, &work, self.ctx.log.as_ref(), self.cancel)
            .await?;
        if let Some(helper) = self.askpass.take() {
            helper.remove();
        }
        Ok(())
    }
}

/// Recursive delete honoring cancellation at each directory level.
fn remove_tree(path: &Path, cancel: &CancelToken) -> Result<(), AcquireError> {
    if cancel.is_cancelled() {
        return Err(AcquireError::Cancelled);
    }
    let entries =
        std::fs::read_dir(path).map_err(|e| AcquireError::fs(path.to_path_buf(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| AcquireError::fs(path.to_path_buf(), e))?;
        let entry_path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| AcquireError::fs(entry_path.clone(), e))?;
        if file_type.is_dir() && !file_type.is_symlink() {
            remove_tree(&entry_path, cancel)?;
        } else {
            std::fs::remove_file(&entry_path)
                .map_err(|e| AcquireError::fs(entry_path.clone(), e))?;
        }
    }
    std::fs::remove_dir(path).map_err(|e| AcquireError::fs(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_remote_ref_normalizes_heads() {
        assert_eq!(to_remote_ref("refs/heads/main"), "refs/remotes/origin/main");
    }

    #[test]
    fn test_to_remote_ref_normalizes_pull() {
        assert_eq!(
            to_remote_ref("refs/pull/7/merge"),
            "refs/remotes/pull/7/merge"
        );
    }

    #[test]
    fn test_to_remote_ref_defaults_empty_and_master() {
        assert_eq!(to_remote_ref(""), "refs/remotes/origin/master");
        assert_eq!(to_remote_ref("master"), "refs/remotes/origin/master");
    }

    #[test]
    fn test_to_remote_ref_leaves_other_refs() {
        assert_eq!(to_remote_ref("refs/tags/v1.0"), "refs/tags/v1.0");
        assert_eq!(to_remote_ref("feature/x"), "feature/x");
    }

    #[test]
    fn test_to_remote_ref_is_idempotent() {
        for branch in [
            "",
            "master",
            "refs/heads/main",
            "refs/pull/7/merge",
            "refs/remotes/origin/main",
            "refs/tags/v1.0",
            "feature/x",
        ] {
            let once = to_remote_ref(branch);
            assert_eq!(to_remote_ref(&once), once, "not idempotent for '{branch}'");
        }
    }

    #[test]
    fn test_pull_request_ref_detection() {
        assert!(is_pull_request_ref("refs/pull/7/merge"));
        assert!(is_pull_request_ref("refs/remotes/pull/7/merge"));
        assert!(!is_pull_request_ref("refs/heads/pull-things"));
    }

    #[test]
    fn test_render_config_prefix_quotes_values() {
        let pairs = vec![(
            "http.extraheader".to_string(),
            "AUTHORIZATION: basic eDp0b2s=".to_string(),
        )];
        assert_eq!(
            render_config_prefix(&pairs),
            r#"-c http.extraheader="AUTHORIZATION: basic eDp0b2s=""#
        );
    }

    #[test]
    fn test_render_config_prefix_escapes_quotes() {
        let pairs = vec![("k".to_string(), r#"a"b"#.to_string())];
        assert_eq!(render_config_prefix(&pairs), r#"-c k="a\"b""#);
    }

    #[test]
    fn test_urls_match_ignores_embedded_credentials() {
        assert!(urls_match(
            "https://u:p@github.com/acme/w.git",
            "https://github.com/acme/w.git"
        ));
    }

    #[test]
    fn test_urls_match_ignores_case_and_trailing_slash() {
        assert!(urls_match(
            "https://GitHub.com/Acme/W.git/",
            "https://github.com/acme/w.git"
        ));
        assert!(!urls_match(
            "https://github.com/acme/old.git",
            "https://github.com/acme/w.git"
        ));
    }

    #[test]
    fn test_remove_tree_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = remove_tree(dir.path(), &cancel).unwrap_err();
        assert!(matches!(err, AcquireError::Cancelled));
        assert!(dir.path().exists());
    }

    #[test]
    fn test_remove_tree_deletes_nested() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("x/y")).unwrap();
        std::fs::write(root.join("x/file"), b"data").unwrap();
        remove_tree(&root, &CancelToken::new()).unwrap();
        assert!(!root.exists());
    }
}
