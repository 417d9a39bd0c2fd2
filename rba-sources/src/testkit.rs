//! Test doubles for acquisition scenarios.
//!
//! [`ScriptedGit`] stands in for the real binary: it records every
//! invocation, keeps an in-memory config store the way a working tree's
//! `.git/config` would, and can be scripted to fail specific operations or
//! trip a cancellation token after one completes.

use rba_common::cancel::CancelToken;
use rba_common::errors::AcquireError;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use crate::git::Git;
use crate::version::GitVersion;

#[derive(Default)]
struct ScriptState {
    config: BTreeMap<String, String>,
    calls: Vec<String>,
    fail: HashMap<String, i32>,
    cancel_after: Option<(String, CancelToken)>,
}

/// Scripted implementation of the [`Git`] seam.
pub struct ScriptedGit {
    version: GitVersion,
    lfs_version: Option<GitVersion>,
    state: Mutex<ScriptState>,
}

impl Default for ScriptedGit {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGit {
    pub fn new() -> Self {
        Self {
            version: GitVersion::new(2, 30, 1),
            lfs_version: Some(GitVersion::new(2, 13, 3)),
            state: Mutex::new(ScriptState::default()),
        }
    }

    pub fn with_version(mut self, version: GitVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_lfs_version(mut self, version: Option<GitVersion>) -> Self {
        self.lfs_version = version;
        self
    }

    /// Make every subsequent `operation` exit with `code`.
    pub fn fail_on(&self, operation: &str, code: i32) {
        self.state
            .lock()
            .unwrap()
            .fail
            .insert(operation.to_string(), code);
    }

    /// Trip `token` after the next completion of `operation`.
    pub fn cancel_after(&self, operation: &str, token: CancelToken) {
        self.state.lock().unwrap().cancel_after = Some((operation.to_string(), token));
    }

    /// Pre-seed a config entry, as a prior run would have left it.
    pub fn seed_config(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .config
            .insert(key.to_string(), value.to_string());
    }

    pub fn config_value(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().config.get(key).cloned()
    }

    pub fn config_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().config.keys().cloned().collect()
    }

    /// Every recorded invocation, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(operation))
            .collect()
    }

    fn record(
        &self,
        operation: &str,
        detail: String,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        let mut state = self.state.lock().unwrap();
        if detail.is_empty() {
            state.calls.push(operation.to_string());
        } else {
            state.calls.push(format!("{operation} {detail}"));
        }
        let code = state.fail.get(operation).copied().unwrap_or(0);
        if let Some((after, token)) = &state.cancel_after
            && after.as_str() == operation
        {
            token.cancel();
        }
        Ok(code)
    }
}

impl Git for ScriptedGit {
    fn version(&self) -> GitVersion {
        self.version
    }

    fn lfs_version(&self) -> Option<GitVersion> {
        self.lfs_version
    }

    async fn init(&self, _work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.record("init", String::new(), cancel)
    }

    async fn remote_add(
        &self,
        _work: &Path,
        name: &str,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let code = self.record("remote_add", format!("{name} {url}"), cancel)?;
        if code == 0 {
            self.state
                .lock()
                .unwrap()
                .config
                .insert("remote.origin.url".to_string(), url.to_string());
        }
        Ok(code)
    }

    async fn remote_set_url(
        &self,
        _work: &Path,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let code = self.record("remote_set_url", url.to_string(), cancel)?;
        if code == 0 {
            self.state
                .lock()
                .unwrap()
                .config
                .insert("remote.origin.url".to_string(), url.to_string());
        }
        Ok(code)
    }

    async fn remote_set_push_url(
        &self,
        _work: &Path,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let code = self.record("remote_set_push_url", url.to_string(), cancel)?;
        if code == 0 {
            self.state
                .lock()
                .unwrap()
                .config
                .insert("remote.origin.pushurl".to_string(), url.to_string());
        }
        Ok(code)
    }

    async fn get_fetch_url(
        &self,
        _work: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<String>, AcquireError> {
        self.record("get_fetch_url", String::new(), cancel)?;
        Ok(self.config_value("remote.origin.url"))
    }

    async fn config_get(
        &self,
        _work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>, AcquireError> {
        self.record("config_get", key.to_string(), cancel)?;
        Ok(self.config_value(key))
    }

    async fn config_set(
        &self,
        _work: &Path,
        key: &str,
        value: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let code = self.record("config_set", format!("{key}={value}"), cancel)?;
        if code == 0 {
            self.state
                .lock()
                .unwrap()
                .config
                .insert(key.to_string(), value.to_string());
        }
        Ok(code)
    }

    async fn config_unset(
        &self,
        _work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let code = self.record("config_unset", key.to_string(), cancel)?;
        if code != 0 {
            return Ok(code);
        }
        let removed = self.state.lock().unwrap().config.remove(key).is_some();
        Ok(if removed { 0 } else { 5 })
    }

    async fn config_exists(
        &self,
        _work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<bool, AcquireError> {
        self.record("config_exists", key.to_string(), cancel)?;
        Ok(self.config_value(key).is_some())
    }

    async fn disable_auto_gc(
        &self,
        _work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let code = self.record("disable_auto_gc", String::new(), cancel)?;
        if code == 0 {
            self.state
                .lock()
                .unwrap()
                .config
                .insert("gc.auto".to_string(), "0".to_string());
        }
        Ok(code)
    }

    async fn fetch(
        &self,
        _work: &Path,
        extra_config: &str,
        refspecs: &[String],
        depth: u32,
        unshallow: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.record(
            "fetch",
            format!("extra=[{extra_config}] refspecs={refspecs:?} depth={depth} unshallow={unshallow}"),
            cancel,
        )
    }

    async fn lfs_install(&self, _work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.record("lfs_install", String::new(), cancel)
    }

    async fn lfs_fetch(
        &self,
        _work: &Path,
        extra_config: &str,
        target: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.record("lfs_fetch", format!("extra=[{extra_config}] {target}"), cancel)
    }

    async fn lfs_logs(&self, _work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.record("lfs_logs", String::new(), cancel)
    }

    async fn checkout(
        &self,
        _work: &Path,
        target: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.record("checkout", target.to_string(), cancel)
    }

    async fn clean(&self, _work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.record("clean", String::new(), cancel)
    }

    async fn reset_hard(&self, _work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.record("reset_hard", String::new(), cancel)
    }

    async fn submodule_sync(
        &self,
        _work: &Path,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.record("submodule_sync", format!("recursive={recursive}"), cancel)
    }

    async fn submodule_update(
        &self,
        _work: &Path,
        extra_config: &str,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.record(
            "submodule_update",
            format!("extra=[{extra_config}] recursive={recursive}"),
            cancel,
        )
    }

    async fn submodule_foreach_clean(
        &self,
        _work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.record("submodule_foreach_clean", String::new(), cancel)
    }

    async fn submodule_foreach_reset(
        &self,
        _work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.record("submodule_foreach_reset", String::new(), cancel)
    }
}
