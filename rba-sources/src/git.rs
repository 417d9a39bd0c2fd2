//! External-binary adapter for git and the git-lfs extension.
//!
//! [`Git`] is the seam the orchestrator drives; [`GitCli`] is the
//! production implementation that locates the binary, probes versions, and
//! invokes subcommands with streamed, secret-masked output. Credentials
//! are injected per invocation through a `-c key=value` prefix spliced
//! before the subcommand verb, never persisted by the adapter itself.

use rba_common::cancel::CancelToken;
use rba_common::errors::AcquireError;
use rba_common::logsink::BuildLog;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::version::GitVersion;

/// Operations the acquisition orchestrator needs from the git binary.
///
/// All subcommand operations stream output to the log sink and resolve to
/// the child's exit code; the orchestrator branches on codes rather than
/// unwinding. Cancellation terminates the child and awaits it.
#[allow(async_fn_in_trait)]
pub trait Git {
    fn version(&self) -> GitVersion;
    fn lfs_version(&self) -> Option<GitVersion>;

    async fn init(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError>;
    async fn remote_add(
        &self,
        work: &Path,
        name: &str,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn remote_set_url(
        &self,
        work: &Path,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn remote_set_push_url(
        &self,
        work: &Path,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    /// Recorded fetch URL of `origin`, or `None` when the directory is not
    /// a working tree (or has no origin).
    async fn get_fetch_url(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<String>, AcquireError>;
    async fn config_get(
        &self,
        work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>, AcquireError>;
    async fn config_set(
        &self,
        work: &Path,
        key: &str,
        value: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn config_unset(
        &self,
        work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn config_exists(
        &self,
        work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<bool, AcquireError>;
    async fn disable_auto_gc(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn fetch(
        &self,
        work: &Path,
        extra_config: &str,
        refspecs: &[String],
        depth: u32,
        unshallow: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn lfs_install(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError>;
    async fn lfs_fetch(
        &self,
        work: &Path,
        extra_config: &str,
        target: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn lfs_logs(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError>;
    async fn checkout(
        &self,
        work: &Path,
        target: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn clean(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError>;
    async fn reset_hard(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError>;
    async fn submodule_sync(
        &self,
        work: &Path,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn submodule_update(
        &self,
        work: &Path,
        extra_config: &str,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn submodule_foreach_clean(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;
    async fn submodule_foreach_reset(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError>;

    /// Check the probed git version against `minimum`. Lax mode reports;
    /// strict mode fails the acquisition.
    fn ensure_version(&self, minimum: GitVersion, strict: bool) -> Result<bool, AcquireError> {
        let satisfied = self.version() >= minimum;
        if !satisfied && strict {
            return Err(AcquireError::RequirementNotMet(format!(
                "git {minimum} or newer is required for this repository, found {}",
                self.version()
            )));
        }
        Ok(satisfied)
    }

    /// Check the probed git-lfs version against `minimum`; absent LFS
    /// never satisfies.
    fn ensure_lfs_version(&self, minimum: GitVersion, strict: bool) -> Result<bool, AcquireError> {
        match self.lfs_version() {
            Some(found) if found >= minimum => Ok(true),
            Some(found) if strict => Err(AcquireError::RequirementNotMet(format!(
                "git-lfs {minimum} or newer is required, found {found}"
            ))),
            None if strict => Err(AcquireError::RequirementNotMet(format!(
                "git-lfs {minimum} or newer is required, but git-lfs was not found"
            ))),
            _ => Ok(false),
        }
    }
}

/// Split an extra-config prefix string into argv entries.
///
/// Whitespace separates tokens; double or single quotes group a value with
/// spaces (`-c http.extraheader="AUTHORIZATION: basic ..."`), backslash
/// escapes the next character. Quote characters are dropped.
pub fn split_config_args(prefix: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;
    let mut escaped = false;

    for c in prefix.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            } else {
                current.push(c);
            }
            continue;
        }
        if c == '"' || c == '\'' {
            in_quote = Some(c);
            continue;
        }
        if c.is_whitespace() {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(c);
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

struct Invocation {
    code: i32,
    stdout: String,
}

/// Production adapter over the real git binary.
pub struct GitCli {
    binary: PathBuf,
    version: GitVersion,
    lfs_version: Option<GitVersion>,
    log: Arc<dyn BuildLog>,
    /// Optional per-invocation deadline. `None` waits indefinitely.
    op_timeout: Option<Duration>,
}

impl GitCli {
    /// Locate the git binary, probe `git version` and `git lfs version`,
    /// and build the adapter.
    ///
    /// On the platform whose default TLS stack is not OpenSSL the
    /// agent-bundled binary is preferred unless the settings request PATH
    /// resolution; everywhere else the PATH-resolved binary is used.
    pub async fn locate(
        settings: &rba_common::AgentSettings,
        log: Arc<dyn BuildLog>,
        cancel: &CancelToken,
    ) -> Result<Self, AcquireError> {
        let binary = resolve_binary(settings.prefer_git_from_path)?;
        log.debug(&format!("using git at {}", binary.display()));

        let mut cli = Self {
            binary,
            version: GitVersion::new(0, 0, 0),
            lfs_version: None,
            log,
            op_timeout: None,
        };

        let probe = cli.exec(None, None, &["version"], true, cancel).await?;
        if probe.code != 0 {
            return Err(AcquireError::binary("version", probe.code));
        }
        cli.version = GitVersion::parse(&probe.stdout)?;

        let lfs = cli.exec(None, None, &["lfs", "version"], true, cancel).await;
        cli.lfs_version = match lfs {
            Ok(inv) if inv.code == 0 => GitVersion::parse(&inv.stdout).ok(),
            _ => None,
        };

        Ok(cli)
    }

    /// Apply a per-invocation deadline to every subsequent operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn exec(
        &self,
        work: Option<&Path>,
        extra_config: Option<&str>,
        args: &[&str],
        capture: bool,
        cancel: &CancelToken,
    ) -> Result<Invocation, AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let mut argv: Vec<String> = Vec::new();
        if let Some(prefix) = extra_config {
            argv.extend(split_config_args(prefix));
        }
        argv.extend(args.iter().map(|s| s.to_string()));

        let operation = args.first().copied().unwrap_or("git").to_string();
        self.log.command(&format!("git {}", argv.join(" ")));

        let mut cmd = Command::new(&self.binary);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AcquireError::fs(self.binary.clone(), e))?;

        // Both pipes are drained concurrently with the wait so a chatty
        // child can never fill a pipe and deadlock.
        let stdout_task = child.stdout.take().map(|out| {
            let log = Arc::clone(&self.log);
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                let mut collected = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if capture {
                        collected.push_str(&line);
                        collected.push('\n');
                        log.debug(&line);
                    } else {
                        log.output(&line);
                    }
                }
                collected
            })
        });
        let stderr_task = child.stderr.take().map(|err| {
            let log = Arc::clone(&self.log);
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log.output(&line);
                }
            })
        });

        let status = {
            let wait = async {
                match self.op_timeout {
                    Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                        Ok(result) => result.map(Some),
                        Err(_) => Ok(None),
                    },
                    None => child.wait().await.map(Some),
                }
            };
            tokio::select! {
                result = wait => match result {
                    Ok(Some(status)) => Some(status),
                    Ok(None) => {
                        self.log.warning(&format!("git {operation} timed out, terminating"));
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        None
                    }
                    Err(e) => return Err(AcquireError::fs(self.binary.clone(), e)),
                },
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(AcquireError::Cancelled);
                }
            }
        };

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        match status {
            Some(status) => Ok(Invocation {
                code: status.code().unwrap_or(-1),
                stdout,
            }),
            None => Err(AcquireError::binary(operation, -1)),
        }
    }

    async fn run(
        &self,
        work: &Path,
        extra_config: Option<&str>,
        args: &[&str],
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        Ok(self
            .exec(Some(work), extra_config, args, false, cancel)
            .await?
            .code)
    }
}

/// Resolve the git binary path per the platform rule.
fn resolve_binary(prefer_from_path: bool) -> Result<PathBuf, AcquireError> {
    if cfg!(windows) && !prefer_from_path {
        if let Some(bundled) = bundled_binary() {
            return Ok(bundled);
        }
    }
    which::which("git")
        .map_err(|e| AcquireError::BadInput(format!("git was not found on PATH: {e}")))
}

/// Agent-bundled git, shipped beside the agent executable.
fn bundled_binary() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe
        .parent()?
        .join("externals")
        .join("git")
        .join("cmd")
        .join("git.exe");
    candidate.exists().then_some(candidate)
}

impl Git for GitCli {
    fn version(&self) -> GitVersion {
        self.version
    }

    fn lfs_version(&self) -> Option<GitVersion> {
        self.lfs_version
    }

    async fn init(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.run(work, None, &["init"], cancel).await
    }

    async fn remote_add(
        &self,
        work: &Path,
        name: &str,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(work, None, &["remote", "add", name, url], cancel)
            .await
    }

    async fn remote_set_url(
        &self,
        work: &Path,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(work, None, &["remote", "set-url", "origin", url], cancel)
            .await
    }

    async fn remote_set_push_url(
        &self,
        work: &Path,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(
            work,
            None,
            &["remote", "set-url", "--push", "origin", url],
            cancel,
        )
        .await
    }

    async fn get_fetch_url(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<String>, AcquireError> {
        let inv = self
            .exec(
                Some(work),
                None,
                &["config", "--get", "remote.origin.url"],
                true,
                cancel,
            )
            .await?;
        if inv.code != 0 {
            return Ok(None);
        }
        let url = inv.stdout.trim().to_string();
        Ok((!url.is_empty()).then_some(url))
    }

    async fn config_get(
        &self,
        work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>, AcquireError> {
        let inv = self
            .exec(Some(work), None, &["config", "--get", key], true, cancel)
            .await?;
        if inv.code != 0 {
            return Ok(None);
        }
        Ok(Some(inv.stdout.trim().to_string()))
    }

    async fn config_set(
        &self,
        work: &Path,
        key: &str,
        value: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(work, None, &["config", key, value], cancel).await
    }

    async fn config_unset(
        &self,
        work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(work, None, &["config", "--unset-all", key], cancel)
            .await
    }

    async fn config_exists(
        &self,
        work: &Path,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<bool, AcquireError> {
        let inv = self
            .exec(Some(work), None, &["config", "--get-all", key], true, cancel)
            .await?;
        Ok(inv.code == 0)
    }

    async fn disable_auto_gc(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(work, None, &["config", "gc.auto", "0"], cancel)
            .await
    }

    async fn fetch(
        &self,
        work: &Path,
        extra_config: &str,
        refspecs: &[String],
        depth: u32,
        unshallow: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let mut args: Vec<&str> = vec![
            "fetch",
            "--tags",
            "--prune",
            "--progress",
            "--no-recurse-submodules",
        ];
        let depth_arg;
        if depth > 0 {
            depth_arg = format!("--depth={depth}");
            args.push(&depth_arg);
        } else if unshallow {
            args.push("--unshallow");
        }
        args.push("origin");
        for spec in refspecs {
            args.push(spec);
        }
        self.run(work, Some(extra_config), &args, cancel).await
    }

    async fn lfs_install(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.run(work, None, &["lfs", "install", "--local"], cancel)
            .await
    }

    async fn lfs_fetch(
        &self,
        work: &Path,
        extra_config: &str,
        target: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(
            work,
            Some(extra_config),
            &["lfs", "fetch", "origin", target],
            cancel,
        )
        .await
    }

    async fn lfs_logs(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.run(work, None, &["lfs", "logs", "last"], cancel).await
    }

    async fn checkout(
        &self,
        work: &Path,
        target: &str,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(
            work,
            None,
            &["checkout", "--progress", "--force", target],
            cancel,
        )
        .await
    }

    async fn clean(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.run(work, None, &["clean", "-fdx"], cancel).await
    }

    async fn reset_hard(&self, work: &Path, cancel: &CancelToken) -> Result<i32, AcquireError> {
        self.run(work, None, &["reset", "--hard", "HEAD"], cancel)
            .await
    }

    async fn submodule_sync(
        &self,
        work: &Path,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let mut args = vec!["submodule", "sync"];
        if recursive {
            args.push("--recursive");
        }
        self.run(work, None, &args, cancel).await
    }

    async fn submodule_update(
        &self,
        work: &Path,
        extra_config: &str,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        let mut args = vec!["submodule", "update", "--init", "--force"];
        if recursive {
            args.push("--recursive");
        }
        self.run(work, Some(extra_config), &args, cancel).await
    }

    async fn submodule_foreach_clean(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(
            work,
            None,
            &["submodule", "foreach", "git clean -fdx"],
            cancel,
        )
        .await
    }

    async fn submodule_foreach_reset(
        &self,
        work: &Path,
        cancel: &CancelToken,
    ) -> Result<i32, AcquireError> {
        self.run(
            work,
            None,
            &["submodule", "foreach", "git reset --hard HEAD"],
            cancel,
        )
        .await
    }
}
