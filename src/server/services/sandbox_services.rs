// untrusted player scripts never run in this process. Each run gets its own node process with an
// empty environment and a capped heap, the payload itself runs in an isolated v8 context with fake
// browser globals and a deadline, and only its text output comes back
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use tokio::{process::Command, sync::OnceCell};
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    server::{
        error::{AppResult, Error},
        utils::{identity_utils::random_identity, script_utils::DOCUMENT_STUB},
    },
};

pub type DynScriptSandbox = Arc<dyn ScriptSandboxTrait + Send + Sync>;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// extra time past the payload limit before the whole process is killed
const HARD_KILL_GRACE: Duration = Duration::from_secs(2);

/// exit code the host script uses when the payload ran out of time
const TIMEOUT_EXIT_CODE: i32 = 124;

/// evaluated inside the fresh context, returns the collector for whatever the payload logged
const CONTEXT_SETUP: &str = r#"(userAgent) => {
  const lines = [];
  const print = (...args) => { lines.push(args.map((a) => String(a)).join(' ')); };
  globalThis.console = { log: print, info: print, warn: print, error: print };
  globalThis.window = { location: {} };
  globalThis.document = { cookie: '' };
  globalThis.DOCUMENT_STUB = globalThis.document;
  globalThis.navigator = { userAgent };
  return () => lines.join('\n');
}"#;

#[automock]
#[async_trait]
pub trait ScriptSandboxTrait {
    /// runs an already prepared script, returns stdout followed by any stderr
    async fn execute(&self, script: &str) -> AppResult<String>;

    async fn runtime_version(&self) -> anyhow::Result<String>;
}

pub struct NodeSandbox {
    node_binary: String,
    timeout: Duration,
    permissions: bool,
    max_heap_mb: u32,
    // resolved on first run, the flag name depends on the node release
    permission_flag: OnceCell<Option<&'static str>>,
}

/// node's permission model flag for a `node --version` string, none when the release has no model
pub fn permission_flag(version: &str) -> Option<&'static str> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);

    match (major, minor) {
        (23.., _) | (22, 13..) => Some("--permission"),
        (20..=22, _) => Some("--experimental-permission"),
        _ => None,
    }
}

impl NodeSandbox {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            node_binary: config.node_binary.clone(),
            timeout: config.sandbox_timeout(),
            permissions: config.sandbox_permissions,
            max_heap_mb: config.sandbox_max_heap_mb,
            permission_flag: OnceCell::new(),
        }
    }

    /// the host script. The payload runs in a separate v8 context created from a null-prototype
    /// object, every global it sees (console, window, document, navigator) is built inside that
    /// context so nothing leads back to `process` or `require`
    pub fn wrap_script(script: &str, user_agent: &str, timeout: Duration) -> String {
        let payload = serde_json::Value::String(script.to_string());
        let user_agent = serde_json::Value::String(user_agent.to_string());
        let setup = serde_json::Value::String(CONTEXT_SETUP.replace("DOCUMENT_STUB", DOCUMENT_STUB));

        format!(
            r#"'use strict';
const vm = require('vm');
for (const name of ['fetch', 'WebSocket', 'XMLHttpRequest', 'EventSource']) {{
  delete globalThis[name];
}}
const context = vm.createContext(Object.create(null), {{
  codeGeneration: {{ strings: true, wasm: false }},
  microtaskMode: 'afterEvaluate',
}});
const collect = vm.runInContext({setup}, context)({user_agent});
let failure = '';
let timedOut = false;
try {{
  vm.runInContext({payload}, context, {{ filename: 'payload.js', timeout: {timeout_ms} }});
}} catch (e) {{
  try {{
    timedOut = typeof e === 'object' && e !== null && e.code === 'ERR_SCRIPT_EXECUTION_TIMEOUT';
    failure = String(e);
  }} catch (_) {{
    failure = 'payload threw an unprintable value';
  }}
}}
const output = collect();
if (typeof output === 'string' && output.length > 0) process.stdout.write(output + '\n');
if (failure) process.stderr.write(failure + '\n');
process.exitCode = timedOut ? {timeout_exit} : 0;
"#,
            timeout_ms = timeout.as_millis(),
            timeout_exit = TIMEOUT_EXIT_CODE,
        )
    }

    // millis + random suffix, concurrent resolves never share a file
    fn temp_script_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "kwik-{}-{}.js",
            chrono::Utc::now().timestamp_millis(),
            nanoid::nanoid!(9)
        ))
    }

    async fn permission_flag(&self) -> Option<&'static str> {
        if !self.permissions {
            return None;
        }

        *self
            .permission_flag
            .get_or_init(|| async {
                match self.runtime_version().await {
                    Ok(version) => {
                        let flag = permission_flag(&version);
                        if flag.is_none() {
                            warn!("node {} has no permission model, sandbox runs without it", version);
                        }
                        flag
                    }
                    Err(e) => {
                        warn!("could not read node version, sandbox runs without permissions: {}", e);
                        None
                    }
                }
            })
            .await
    }

    fn command(&self, script_path: &Path, permission_flag: Option<&str>) -> Command {
        let mut command = Command::new(&self.node_binary);

        command
            .arg(format!("--max-old-space-size={}", self.max_heap_mb))
            .arg("--no-warnings");

        if let Some(flag) = permission_flag {
            command
                .arg(flag)
                .arg(format!("--allow-fs-read={}", script_path.display()));
        }

        command
            .arg(script_path)
            .env_clear()
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command
    }

    fn timed_out(&self, output: &str) -> Error {
        Error::resolution(
            format!("Sandbox timed out after {}s", self.timeout.as_secs()),
            output,
        )
    }

    async fn run(&self, script_path: &Path) -> AppResult<String> {
        let permission_flag = self.permission_flag().await;
        let child = self
            .command(script_path, permission_flag)
            .spawn()
            .map_err(|e| {
                error!("failed to start sandbox runtime '{}': {}", self.node_binary, e);
                Error::InternalServerErrorWithContext(format!(
                    "failed to start sandbox runtime '{}': {}",
                    self.node_binary, e
                ))
            })?;

        // the vm timeout normally fires first, this one catches a wedged runtime.
        // dropping the wait future drops the child and kill_on_drop takes it down
        let deadline = self.timeout + HARD_KILL_GRACE;
        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("sandbox process failed: {}", e);
                return Err(Error::InternalServerErrorWithContext(format!(
                    "sandbox process failed: {}",
                    e
                )));
            }
            Err(_) => {
                warn!("sandbox runtime unresponsive after {:?}, killed", deadline);
                return Err(self.timed_out(""));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            "sandbox exited with {}, {} bytes stdout, {} bytes stderr",
            output.status,
            stdout.len(),
            stderr.len()
        );

        let mut combined = stdout.into_owned();
        if !stderr.is_empty() {
            combined.push_str("\n[stderr]\n");
            combined.push_str(&stderr);
        }

        if output.status.code() == Some(TIMEOUT_EXIT_CODE) {
            warn!("sandbox payload hit the {:?} execution limit", self.timeout);
            return Err(self.timed_out(&combined));
        }

        Ok(combined)
    }
}

#[async_trait]
impl ScriptSandboxTrait for NodeSandbox {
    async fn execute(&self, script: &str) -> AppResult<String> {
        let identity = random_identity();
        let script_path = Self::temp_script_path();

        let wrapped = Self::wrap_script(script, identity.user_agent, self.timeout);
        tokio::fs::write(&script_path, wrapped).await.map_err(|e| {
            error!("failed to write sandbox script: {}", e);
            Error::InternalServerErrorWithContext(format!("failed to write sandbox script: {}", e))
        })?;

        info!("running sandbox script {}", script_path.display());
        let result = self.run(&script_path).await;

        // cleanup never fails the call
        if let Err(e) = tokio::fs::remove_file(&script_path).await {
            warn!(
                "failed to remove sandbox script {}: {}",
                script_path.display(),
                e
            );
        }

        result
    }

    async fn runtime_version(&self) -> anyhow::Result<String> {
        let output = tokio::time::timeout(
            VERSION_CHECK_TIMEOUT,
            Command::new(&self.node_binary)
                .arg("--version")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("'{} --version' timed out", self.node_binary))??;

        if !output.status.success() {
            anyhow::bail!("'{} --version' exited with {}", self.node_binary, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
