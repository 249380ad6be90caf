//! Python code execution sandbox.
//!
//! The code agent never talks to a subprocess directly; it goes through
//! [`CodeSandbox`], whose `run` never fails. Every failure (spawn error,
//! exception, timeout) comes back as a string starting with `Error:` so it
//! can be shown to the model as an observation.
//!
//! [`PythonSandbox`] keeps one `python -u -c <runner>` process alive and
//! talks line-delimited JSON-RPC to it. The runner announces itself with a
//! `ready` notification, then serves `execute`, `reset` and `shutdown`.
//! Variables persist between `execute` calls until `reset`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Observation reported when code ran cleanly but printed nothing.
pub const NO_OUTPUT: &str = "Executed successfully (no output).";

/// Runs untrusted model-written code and reports what it printed.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    /// Execute `code`, returning captured output or an `Error:` string.
    async fn run(&self, code: &str) -> String;

    /// Discard all interpreter state.
    async fn reset(&self);
}

/// Configuration for the Python sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Python executable, resolved on `PATH` when not absolute
    pub python_path: String,
    /// Per-execution timeout in milliseconds
    pub timeout_ms: u64,
    /// Timeout for the interpreter to come up in milliseconds
    pub startup_timeout_ms: u64,
    /// Captured output beyond this many characters is cut off
    pub max_output_chars: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_path: "python3".to_string(),
            timeout_ms: 10_000,
            startup_timeout_ms: 10_000,
            max_output_chars: 4_000,
        }
    }
}

impl SandboxConfig {
    pub fn with_python_path(mut self, path: impl Into<String>) -> Self {
        self.python_path = path.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_output_chars(mut self, max: usize) -> Self {
        self.max_output_chars = max;
        self
    }
}

const PYTHON_RUNNER: &str = r##"
import contextlib
import io
import json
import sys
import traceback

_IN = sys.stdin
_OUT = sys.stdout


def _send(obj):
    _OUT.write(json.dumps(obj, ensure_ascii=False) + "\n")
    _OUT.flush()


def _reply(rid, result=None, error=None):
    msg = {"jsonrpc": "2.0", "id": rid}
    if error is not None:
        msg["error"] = error
    else:
        msg["result"] = result
    _send(msg)


def _fresh():
    return {"__name__": "__main__", "__builtins__": __builtins__}


ns = _fresh()
_send({"jsonrpc": "2.0", "method": "ready"})

while True:
    line = _IN.readline()
    if not line:
        break
    line = line.strip()
    if not line:
        continue
    try:
        req = json.loads(line)
    except Exception as e:
        _reply(None, error={"code": -32700, "message": str(e)})
        continue

    rid = req.get("id")
    method = req.get("method")
    params = req.get("params") or {}

    if method == "execute":
        buf = io.StringIO()
        error = None
        sys.stdin = io.StringIO("")
        try:
            with contextlib.redirect_stdout(buf), contextlib.redirect_stderr(buf):
                exec(compile(params.get("code", ""), "<agent>", "exec"), ns)
        except SystemExit as e:
            error = "SystemExit: %s" % (e,)
        except BaseException as e:
            error = "".join(traceback.format_exception_only(type(e), e)).strip()
        finally:
            sys.stdin = _IN
        _reply(rid, {"stdout": buf.getvalue(), "error": error})
    elif method == "reset":
        ns = _fresh()
        _reply(rid, {"ok": True})
    elif method == "shutdown":
        _reply(rid, {"ok": True})
        break
    else:
        _reply(rid, error={"code": -32601, "message": "unknown method %s" % (method,)})
"##;

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// Result of one `execute` call.
#[derive(Debug, Deserialize)]
struct ExecuteResult {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    error: Option<String>,
}

/// A running interpreter process.
struct PythonProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl PythonProcess {
    async fn spawn(config: &SandboxConfig) -> Result<Self> {
        let python = which::which(&config.python_path).map_err(|e| {
            Error::SubprocessComm(format!(
                "Python interpreter '{}' not found: {}",
                config.python_path, e
            ))
        })?;

        let mut child = Command::new(&python)
            .arg("-u")
            .arg("-c")
            .arg(PYTHON_RUNNER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::SubprocessComm(format!("Failed to spawn {}: {}", python.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::SubprocessComm("Failed to get stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SubprocessComm("Failed to get stdout handle".to_string()))?;

        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        };

        let startup = Duration::from_millis(config.startup_timeout_ms);
        match tokio::time::timeout(startup, process.read_message()).await {
            Ok(Ok(msg)) if msg.method.as_deref() == Some("ready") => {
                debug!(python = %python.display(), "python sandbox ready");
                Ok(process)
            }
            Ok(Ok(msg)) => {
                process.kill().await;
                Err(Error::SubprocessComm(format!(
                    "Expected ready message, got {:?}",
                    msg
                )))
            }
            Ok(Err(e)) => {
                process.kill().await;
                Err(e)
            }
            Err(_) => {
                process.kill().await;
                Err(Error::timeout(config.startup_timeout_ms))
            }
        }
    }

    async fn read_message(&mut self) -> Result<JsonRpcResponse> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| Error::SubprocessComm(format!("Failed to read response: {}", e)))?;
        if read == 0 {
            return Err(Error::SubprocessComm(
                "Python process exited unexpectedly".to_string(),
            ));
        }
        serde_json::from_str(line.trim()).map_err(|e| {
            Error::SubprocessComm(format!("Invalid message: {}; payload={}", e, line.trim()))
        })
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_vec(&JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        })?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .map_err(|e| Error::SubprocessComm(format!("Failed to send request: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| Error::SubprocessComm(format!("Failed to flush stdin: {}", e)))?;

        loop {
            let response = self.read_message().await?;
            if response.id != Some(id) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(Error::SubprocessComm(format!(
                    "{}: {}",
                    error.code, error.message
                )));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Sandbox backed by a persistent Python subprocess.
///
/// The process is started lazily on first use. After a timeout or a broken
/// pipe it is killed and a fresh one is started on the next call, which
/// also means its namespace starts empty.
pub struct PythonSandbox {
    config: SandboxConfig,
    process: Mutex<Option<PythonProcess>>,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            process: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    async fn execute(&self, code: &str) -> Result<ExecuteResult> {
        let mut guard = self.process.lock().await;
        if guard.is_none() {
            *guard = Some(PythonProcess::spawn(&self.config).await?);
        }
        let Some(process) = guard.as_mut() else {
            return Err(Error::Internal("sandbox process missing".to_string()));
        };

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let outcome = tokio::time::timeout(
            timeout,
            process.request("execute", json!({ "code": code })),
        )
        .await;

        match outcome {
            Ok(Ok(value)) => Ok(serde_json::from_value(value)?),
            Ok(Err(e)) => {
                process.kill().await;
                *guard = None;
                Err(e)
            }
            Err(_) => {
                warn!(timeout_ms = self.config.timeout_ms, "python execution timed out, restarting interpreter");
                process.kill().await;
                *guard = None;
                Err(Error::timeout(self.config.timeout_ms))
            }
        }
    }

    fn truncate(&self, text: &str) -> String {
        let max = self.config.max_output_chars;
        if text.chars().count() <= max {
            return text.to_string();
        }
        let head: String = text.chars().take(max).collect();
        format!("{}\n... (output truncated)", head)
    }
}

impl Default for PythonSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl CodeSandbox for PythonSandbox {
    async fn run(&self, code: &str) -> String {
        match self.execute(code).await {
            Ok(ExecuteResult { stdout, error: None }) => {
                let stdout = stdout.trim_end();
                if stdout.trim().is_empty() {
                    NO_OUTPUT.to_string()
                } else {
                    self.truncate(stdout)
                }
            }
            Ok(ExecuteResult {
                stdout,
                error: Some(error),
            }) => {
                let stdout = stdout.trim_end();
                if stdout.is_empty() {
                    self.truncate(&format!("Error: {}", error))
                } else {
                    self.truncate(&format!("{}\nError: {}", stdout, error))
                }
            }
            Err(Error::Timeout { duration_ms }) => {
                format!("Error: execution timed out after {} ms", duration_ms)
            }
            Err(e) => format!("Error: {}", e),
        }
    }

    async fn reset(&self) {
        let mut guard = self.process.lock().await;
        let Some(process) = guard.as_mut() else {
            return;
        };

        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, process.request("reset", Value::Null)).await {
            Ok(Ok(_)) => {}
            _ => {
                // A fresh process has an empty namespace too.
                process.kill().await;
                *guard = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_interpreter_reports_error_string() {
        let sandbox = PythonSandbox::new(
            SandboxConfig::default().with_python_path("definitely-not-a-python-binary"),
        );
        let output = sandbox.run("print(1)").await;
        assert!(output.starts_with("Error:"), "got {output}");
        assert!(output.contains("not found"));

        // Reset without a process is a no-op.
        sandbox.reset().await;
    }

    #[test]
    fn test_truncate_output() {
        let sandbox = PythonSandbox::new(SandboxConfig::default().with_max_output_chars(5));
        assert_eq!(sandbox.truncate("abc"), "abc");
        assert_eq!(sandbox.truncate("abcdefgh"), "abcde\n... (output truncated)");
    }

    #[tokio::test]
    #[ignore = "requires Python 3 on PATH"]
    async fn test_run_prints_output() {
        let sandbox = PythonSandbox::default();
        assert_eq!(sandbox.run("dogs = (100 - 2 * 36) / 2\nprint(dogs)").await, "14.0");
        assert_eq!(sandbox.run("x = 1").await, NO_OUTPUT);
        assert_eq!(sandbox.run("print('Xin chào')").await, "Xin chào");
    }

    #[tokio::test]
    #[ignore = "requires Python 3 on PATH"]
    async fn test_state_persists_until_reset() {
        let sandbox = PythonSandbox::default();
        sandbox.run("total = 40").await;
        assert_eq!(sandbox.run("print(total + 2)").await, "42");

        sandbox.reset().await;
        let output = sandbox.run("print(total)").await;
        assert!(output.starts_with("Error: NameError"), "got {output}");
    }

    #[tokio::test]
    #[ignore = "requires Python 3 on PATH"]
    async fn test_exception_keeps_partial_output() {
        let sandbox = PythonSandbox::default();
        let output = sandbox.run("print('before')\n1 / 0").await;
        assert_eq!(output, "before\nError: ZeroDivisionError: division by zero");
    }

    #[tokio::test]
    #[ignore = "requires Python 3 on PATH"]
    async fn test_timeout_restarts_interpreter() {
        let sandbox = PythonSandbox::new(SandboxConfig::default().with_timeout_ms(500));
        let output = sandbox.run("while True:\n    pass").await;
        assert_eq!(output, "Error: execution timed out after 500 ms");

        assert_eq!(sandbox.run("print(7 * 6)").await, "42");
    }

    #[tokio::test]
    #[ignore = "requires Python 3 on PATH"]
    async fn test_input_does_not_read_protocol_stream() {
        let sandbox = PythonSandbox::default();
        let output = sandbox.run("input()").await;
        assert!(output.starts_with("Error: EOFError"), "got {output}");
        assert_eq!(sandbox.run("print(1)").await, "1");
    }
}
