//! Sandboxed Python payload execution.
//!
//! User code runs in a separate `python3 -I` process with a cleared
//! environment, resource limits, a restricted builtins table and an import
//! allow-list. A root interpreter drops to an unprivileged user, and an
//! optional launcher (bwrap, nsjail) can wrap the process. The static
//! denylist scan in [`check_denylist`] runs first and rejects obvious escapes
//! before any process is spawned; it is not relied on as the only barrier.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::GeneratorError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum stdout or stderr captured from the interpreter (1 MiB).
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Maximum accepted source size.
pub const MAX_CODE_BYTES: usize = 64 * 1024;

/// Modules and builtins that may not appear in user code.
pub const DENYLIST: &[&str] = &["os", "subprocess", "sys", "exec", "eval", "open", "__import__"];

const DENIED_MODULES: &[&str] = &["os", "subprocess", "sys"];

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+([\w\.\s,]+?)\s*(?:#.*)?$").expect("valid regex"));

static FROM_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+([\w\.]+)\s+import\b").expect("valid regex"));

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^|[^\w.])(exec|eval|open|compile|__import__|getattr|setattr|delattr|vars|globals|locals)\s*\(")
        .expect("valid regex")
});

static MODULE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(os|sys|subprocess)\s*\.").expect("valid regex"));

static PRIVATE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\s*_\w*").expect("valid regex"));

/// Frame and code object attributes that lead back to interpreter globals.
static INTROSPECTION_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.\s*(gi_frame|gi_code|cr_frame|cr_code|ag_frame|ag_code|tb_frame|tb_next|f_back|f_globals|f_locals|f_builtins|f_code)\b")
        .expect("valid regex")
});

/// Interpreter-side harness. Reads a JSON request on stdin and prints a
/// single JSON status object on stdout.
///
/// User code is parsed and its tree checked before it runs. Imports return
/// public views of the allowed modules with private names and nested
/// modules removed. A root interpreter drops to `nobody` before executing.
const HARNESS: &str = r#"
import ast, builtins, contextlib, io, json, os, sys, types

ALLOWED_MODULES = {"math", "random", "datetime", "time", "json", "uuid", "string",
                   "statistics", "re", "decimal", "collections", "itertools",
                   "functools", "hashlib", "base64"}
BLOCKED_BUILTINS = {"open", "exec", "eval", "compile", "input", "breakpoint", "exit",
                    "quit", "help", "globals", "locals", "vars", "memoryview", "__import__",
                    "getattr", "setattr", "delattr", "type"}
BLOCKED_CALLS = {"open", "exec", "eval", "compile", "input", "breakpoint", "globals",
                 "locals", "vars", "getattr", "setattr", "delattr"}
BLOCKED_ATTRS = {"gi_frame", "gi_code", "cr_frame", "cr_code", "ag_frame", "ag_code",
                 "tb_frame", "tb_next", "f_back", "f_globals", "f_locals", "f_builtins",
                 "f_code"}
HIDDEN_NAMES = {"Formatter"}
NOBODY = 65534

class Blocked(Exception):
    pass

def check_tree(tree):
    for node in ast.walk(tree):
        if isinstance(node, ast.Attribute):
            if node.attr.startswith("_") or node.attr in BLOCKED_ATTRS:
                raise Blocked("access to attribute '%s' is not allowed" % node.attr)
        elif isinstance(node, ast.Name):
            if node.id.startswith("__") or (
                    node.id in BLOCKED_CALLS and isinstance(node.ctx, ast.Load)):
                raise Blocked("use of '%s' is not allowed" % node.id)
        elif isinstance(node, (ast.Import, ast.ImportFrom)):
            names = [a.name for a in node.names] if isinstance(node, ast.Import) else [node.module or ""]
            for name in names:
                if getattr(node, "level", 0) or name.split(".")[0] not in ALLOWED_MODULES:
                    raise Blocked("import of '%s' is not allowed" % name)
            for alias in node.names:
                if alias.name.startswith("_"):
                    raise Blocked("import of private name '%s' is not allowed" % alias.name)

def drop_privileges():
    if os.getuid() != 0:
        return
    os.setgroups([])
    os.setgid(NOBODY)
    os.setuid(NOBODY)
    if os.getuid() == 0:
        raise PermissionError("still running as root")

def apply_limits(memory_mb):
    try:
        import resource
        if memory_mb:
            limit = int(memory_mb) * 1024 * 1024
            resource.setrlimit(resource.RLIMIT_AS, (limit, limit))
        resource.setrlimit(resource.RLIMIT_FSIZE, (0, 0))
        resource.setrlimit(resource.RLIMIT_NPROC, (0, 0))
    except Exception:
        pass

def public_view(module):
    view = types.ModuleType(module.__name__)
    for name in dir(module):
        if name.startswith("_") or name in HIDDEN_NAMES:
            continue
        value = getattr(module, name)
        if isinstance(value, types.ModuleType):
            continue
        setattr(view, name, value)
    return view

def make_builtins():
    real_import = builtins.__import__
    def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
        if level != 0 or name.split(".")[0] not in ALLOWED_MODULES:
            raise Blocked("import of '%s' is not allowed" % name)
        module = real_import(name, globals, locals, fromlist, level)
        view = public_view(module)
        if fromlist:
            return view
        parent, target = view, module
        for part in name.split(".")[1:]:
            target = getattr(target, part)
            child = public_view(target)
            setattr(parent, part, child)
            parent = child
        return view
    safe = {k: v for k, v in vars(builtins).items()
            if k not in BLOCKED_BUILTINS and (not k.startswith("__") or k == "__build_class__")}
    safe["__import__"] = guarded_import
    return safe

def main():
    request = json.loads(sys.stdin.read() or "{}")
    code = request.get("code", "")
    try:
        tree = ast.parse(code, "<payload>", "exec")
    except SyntaxError as e:
        return {"status": "syntax_error", "message": str(e.msg), "line": e.lineno}
    try:
        check_tree(tree)
    except Blocked as e:
        return {"status": "security_violation", "message": str(e)}
    compiled = compile(tree, "<payload>", "exec")
    if request.get("compile_only"):
        return {"status": "compiled"}
    try:
        drop_privileges()
    except OSError as e:
        return {"status": "sandbox_error", "message": "cannot drop privileges: %s" % e}
    apply_limits(request.get("memory_limit_mb"))
    metadata = types.MappingProxyType(dict(request.get("device_metadata") or {}))
    scope = {"__builtins__": make_builtins(), "__name__": "__payload__",
             "device_metadata": metadata}
    sink = io.StringIO()
    try:
        with contextlib.redirect_stdout(sink):
            exec(compiled, scope)
    except Blocked as e:
        return {"status": "security_violation", "message": str(e)}
    except MemoryError:
        return {"status": "runtime_error", "message": "MemoryError: memory limit exceeded"}
    except BaseException as e:
        return {"status": "runtime_error", "message": "%s: %s" % (type(e).__name__, e)}
    if "result" not in scope:
        return {"status": "missing_result", "message": "code did not assign 'result'"}
    result = scope["result"]
    if not isinstance(result, dict):
        return {"status": "missing_result",
                "message": "'result' must be a dict, got %s" % type(result).__name__}
    try:
        encoded = json.dumps(result, allow_nan=False)
    except (TypeError, ValueError) as e:
        return {"status": "serialization_error", "message": str(e)}
    return {"status": "ok", "result": json.loads(encoded)}

sys.stdout.write(json.dumps(main()))
"#;

// ---------------------------------------------------------------------------
// Static analysis
// ---------------------------------------------------------------------------

/// List every denylisted construct found in `code`.
pub fn find_violations(code: &str) -> Vec<String> {
    let mut found = Vec::new();

    for caps in IMPORT_RE.captures_iter(code) {
        for module in caps[1].split(',') {
            let root = module.trim().split(['.', ' ']).next().unwrap_or_default();
            if DENIED_MODULES.contains(&root) {
                found.push(format!("import of '{root}'"));
            }
        }
    }
    for caps in FROM_IMPORT_RE.captures_iter(code) {
        let root = caps[1].split('.').next().unwrap_or_default();
        if DENIED_MODULES.contains(&root) {
            found.push(format!("import from '{root}'"));
        }
    }
    for caps in CALL_RE.captures_iter(code) {
        found.push(format!("call to '{}'", &caps[1]));
    }
    for caps in MODULE_ATTR_RE.captures_iter(code) {
        found.push(format!("use of module '{}'", &caps[1]));
    }
    if PRIVATE_ATTR_RE.is_match(code) {
        found.push("access to private or dunder attributes".to_string());
    }
    for caps in INTROSPECTION_ATTR_RE.captures_iter(code) {
        found.push(format!("access to '{}'", &caps[1]));
    }

    found.dedup();
    found
}

/// Reject code containing denylisted imports or calls.
pub fn check_denylist(code: &str) -> Result<(), GeneratorError> {
    let violations = find_violations(code);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(GeneratorError::SecurityViolation(violations.join(", ")))
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Limits applied to each interpreter run.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter executable.
    pub python_bin: String,
    /// Wall-clock limit per run.
    pub timeout: Duration,
    /// Address-space limit in MiB (0 disables).
    pub memory_limit_mb: u64,
    /// Command prefix the interpreter runs under, such as
    /// `bwrap --ro-bind / / --unshare-all --die-with-parent --`. Empty runs
    /// the interpreter directly.
    pub launcher: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: Duration::from_secs(5),
            memory_limit_mb: 256,
            launcher: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// | Env var                   | Default   |
    /// |---------------------------|-----------|
    /// | `PYTHON_BIN`              | `python3` |
    /// | `PYTHON_TIMEOUT_SECS`     | `5`       |
    /// | `PYTHON_MEMORY_LIMIT_MB`  | `256`     |
    /// | `PYTHON_SANDBOX_LAUNCHER` | (none)    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            python_bin: std::env::var("PYTHON_BIN").unwrap_or(defaults.python_bin),
            timeout: std::env::var("PYTHON_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            memory_limit_mb: std::env::var("PYTHON_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.memory_limit_mb),
            launcher: std::env::var("PYTHON_SANDBOX_LAUNCHER")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.launcher),
        }
    }
}

/// Runs user payload code in an isolated interpreter process.
#[derive(Debug, Clone, Default)]
pub struct PythonSandbox {
    config: SandboxConfig,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Static checks plus a compile-only pass. Does not execute the code.
    pub async fn validate(&self, code: &str) -> Result<(), GeneratorError> {
        precheck(code)?;
        let status = self
            .execute(json!({ "code": code, "compile_only": true }))
            .await?;
        interpret(status).map(|_| ())
    }

    /// Execute `code` with `device_metadata` bound and return its `result`.
    pub async fn generate(
        &self,
        code: &str,
        metadata: &Map<String, Value>,
    ) -> Result<Value, GeneratorError> {
        precheck(code)?;
        let status = self
            .execute(json!({
                "code": code,
                "device_metadata": metadata,
                "memory_limit_mb": self.config.memory_limit_mb,
            }))
            .await?;
        interpret(status)
    }

    /// Spawn the interpreter, pipe the request, and parse its status line.
    async fn execute(&self, request: Value) -> Result<Value, GeneratorError> {
        let mut cmd = match self.config.launcher.split_first() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg(&self.config.python_bin);
                cmd
            }
            None => Command::new(&self.config.python_bin),
        };
        cmd.arg("-I")
            .arg("-B")
            .arg("-c")
            .arg(HARNESS)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| GeneratorError::Sandbox(format!("{}: {e}", self.config.python_bin)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = serde_json::to_vec(&request)
                .map_err(|e| GeneratorError::SerializationError(e.to_string()))?;
            // The interpreter may exit before reading everything.
            let _ = stdin.write_all(&bytes).await;
            drop(stdin);
        }

        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(Ok(exit)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let stdout = String::from_utf8_lossy(&stdout);
                match serde_json::from_str::<Value>(stdout.trim()) {
                    Ok(status) => Ok(status),
                    Err(_) => {
                        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
                        Err(GeneratorError::RuntimeFailure(if stderr.is_empty() {
                            format!("interpreter exited with code {}", exit.code().unwrap_or(-1))
                        } else {
                            stderr
                        }))
                    }
                }
            }
            Ok(Err(e)) => Err(GeneratorError::Sandbox(e.to_string())),
            // `child` is dropped here and killed via kill_on_drop.
            Err(_) => Err(GeneratorError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }
}

fn precheck(code: &str) -> Result<(), GeneratorError> {
    if code.trim().is_empty() {
        return Err(GeneratorError::MissingResult("code is empty".to_string()));
    }
    if code.len() > MAX_CODE_BYTES {
        return Err(GeneratorError::SecurityViolation(format!(
            "code exceeds {MAX_CODE_BYTES} bytes"
        )));
    }
    check_denylist(code)
}

/// Map the harness status object onto a result.
fn interpret(status: Value) -> Result<Value, GeneratorError> {
    let message = status
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match status.get("status").and_then(Value::as_str) {
        Some("ok") => match status.get("result") {
            Some(result @ Value::Object(_)) => Ok(result.clone()),
            _ => Err(GeneratorError::MissingResult("result is not an object".to_string())),
        },
        Some("compiled") => Ok(Value::Null),
        Some("syntax_error") => Err(GeneratorError::SyntaxError {
            message,
            line: status
                .get("line")
                .and_then(Value::as_u64)
                .map(|l| l as u32),
        }),
        Some("security_violation") => Err(GeneratorError::SecurityViolation(message)),
        Some("missing_result") => Err(GeneratorError::MissingResult(message)),
        Some("serialization_error") => Err(GeneratorError::SerializationError(message)),
        Some("runtime_error") => Err(GeneratorError::RuntimeFailure(message)),
        Some("sandbox_error") => Err(GeneratorError::Sandbox(message)),
        other => Err(GeneratorError::RuntimeFailure(format!(
            "unexpected sandbox status {other:?}"
        ))),
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_OUTPUT_BYTES as u64).read_to_end(&mut buf).await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
