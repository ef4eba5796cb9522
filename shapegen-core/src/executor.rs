//! # Code Executor
//!
//! Runs model-written matplotlib code and captures the figure as a PNG.
//!
//! The code is untrusted and runs unsandboxed with the privileges of the
//! current user. It runs in a child `python3` process so the figure (and any
//! state the script leaves behind) dies with that process, and so a timeout
//! or cancellation can kill it.

use crate::error::{self, Error, ErrorKind, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

/// The axes the generated code draws on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    TwoD,
    ThreeD,
}

impl Surface {
    /// 3D iff the text mentions `3d` anywhere, ignoring case.
    pub fn detect(source: &str) -> Self {
        if source.to_lowercase().contains("3d") {
            Surface::ThreeD
        } else {
            Surface::TwoD
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::TwoD => "2d",
            Surface::ThreeD => "3d",
        }
    }
}

/// Pull the code out of a model reply.
///
/// The first fenced block wins (its language tag line is dropped); a reply
/// without fences is used as-is.
pub fn extract_code(reply: &str) -> &str {
    let Some(start) = reply.find("```") else {
        return reply.trim();
    };
    let after_fence = &reply[start + 3..];
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => after_fence,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// A rendered PNG and its base64 text form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    png: Vec<u8>,
    encoded: String,
}

impl EncodedImage {
    pub fn from_png(png: Vec<u8>) -> Self {
        let encoded = STANDARD.encode(&png);
        Self { png, encoded }
    }

    pub fn as_base64(&self) -> &str {
        &self.encoded
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }
}

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Renders plotting code into PNG bytes
#[allow(async_fn_in_trait)]
pub trait CodeRunner: Send + Sync {
    async fn render(&self, code: &str, surface: Surface) -> Result<Vec<u8>>;
}

// ============================================================================
// Python runner
// ============================================================================

/// Figure setup, exec and capture. Reads the code on stdin, the surface as
/// argv[1], writes PNG bytes to stdout and always closes every figure.
const HARNESS: &str = r#"
import io
import sys
import matplotlib
matplotlib.use("Agg")
import matplotlib.pyplot as plt
from mpl_toolkits.mplot3d import Axes3D
import numpy as np

code = sys.stdin.read()
out = sys.stdout.buffer
sys.stdout = sys.stderr
fig = plt.figure()
try:
    if sys.argv[1] == "3d":
        ax = fig.add_subplot(111, projection="3d")
    else:
        ax = fig.add_subplot(111)
    scope = {"__name__": "__main__", "plt": plt, "fig": fig, "ax": ax, "np": np, "Axes3D": Axes3D}
    exec(code, scope)
    buf = io.BytesIO()
    plt.savefig(buf, format="png")
    out.write(buf.getvalue())
    out.flush()
finally:
    plt.close("all")
"#;

/// Configuration for the Python runner
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Interpreter with matplotlib and numpy installed
    pub python: String,
    /// Kill the script after this long; `None` waits forever
    pub timeout_secs: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_secs: Some(60),
        }
    }
}

pub struct PythonRunner {
    config: ExecutorConfig,
}

impl PythonRunner {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl CodeRunner for PythonRunner {
    async fn render(&self, code: &str, surface: Surface) -> Result<Vec<u8>> {
        let child = Command::new(&self.config.python)
            .arg("-c")
            .arg(HARNESS)
            .arg(surface.as_str())
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::from(e)
                    .with_operation("python::spawn")
                    .with_context("python", self.config.python.clone())
            })?;

        let output = exchange(child, code, self.config.timeout_secs).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("script exited without output")
                .trim()
                .to_string();
            return Err(error::execution_failed(reason)
                .with_operation("python::render")
                .with_context("exit_code", output.status.code().unwrap_or(-1).to_string()));
        }

        Ok(output.stdout)
    }
}

/// Feed `code` to the child and collect its output. Both happen inside the
/// timeout, so a script that never reads stdin cannot stall the caller.
async fn exchange(mut child: Child, code: &str, timeout_secs: Option<u64>) -> Result<Output> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| error::io_error("child stdin unavailable").with_operation("python::render"))?;

    let run = async move {
        let feed = async move {
            let written = stdin.write_all(code.as_bytes()).await;
            drop(stdin);
            written
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        // A failed script may exit before draining stdin; its stderr says more.
        if output.status.success() {
            written?;
        }
        Ok::<_, std::io::Error>(output)
    };

    match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
            .await
            .map_err(|_| error::execution_timeout(secs).with_operation("python::render"))?,
        None => run.await,
    }
    .map_err(|e| Error::from(e).with_operation("python::render"))
}

// ============================================================================
// Executor
// ============================================================================

/// Selects the surface, runs the code and encodes the figure.
pub struct CodeExecutor<R> {
    runner: R,
}

impl<R: CodeRunner> CodeExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Render a model reply; failures are reported and yield no image.
    pub async fn execute(&self, reply: Option<&str>) -> Option<EncodedImage> {
        let reply = reply.filter(|r| !r.trim().is_empty())?;

        match self.render(reply).await {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!(error = %e, "code execution failed");
                eprintln!("Error executing code: {}", e.message());
                None
            }
        }
    }

    /// Render a model reply, surfacing the failure.
    pub async fn render(&self, reply: &str) -> Result<EncodedImage> {
        let surface = Surface::detect(reply);
        let code = extract_code(reply);
        tracing::debug!(surface = surface.as_str(), bytes = code.len(), "executing generated code");

        let png = self
            .runner
            .render(code, surface)
            .await
            .map_err(|e| e.with_operation("executor::render"))?;

        if !png.starts_with(PNG_SIGNATURE) {
            return Err(Error::new(ErrorKind::ExecutionFailed, "script produced no PNG output")
                .with_operation("executor::render")
                .with_context("bytes", png.len().to_string()));
        }

        Ok(EncodedImage::from_png(png))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn fake_png() -> Vec<u8> {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(b"IHDR");
        png
    }

    /// Records what it was asked to render
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Surface)>>,
        fail_with: Option<&'static str>,
        output: Vec<u8>,
    }

    impl RecordingRunner {
        fn ok() -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_with: None, output: fake_png() }
        }

        fn failing(reason: &'static str) -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_with: Some(reason), output: Vec::new() }
        }
    }

    impl CodeRunner for RecordingRunner {
        async fn render(&self, code: &str, surface: Surface) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push((code.to_string(), surface));
            match self.fail_with {
                Some(reason) => Err(error::execution_failed(reason)),
                None => Ok(self.output.clone()),
            }
        }
    }

    #[test]
    fn test_surface_detection() {
        assert_eq!(Surface::detect("ax = fig.add_subplot(projection='3d')"), Surface::ThreeD);
        assert_eq!(Surface::detect("from mpl_toolkits.mplot3D import Axes3D"), Surface::ThreeD);
        assert_eq!(Surface::detect("plt.Circle((0.5, 0.5), 0.2, color='red')"), Surface::TwoD);
        assert_eq!(Surface::detect(""), Surface::TwoD);
    }

    #[test]
    fn test_extract_code_from_fence() {
        let reply = "Here you go:\n```python\nimport matplotlib.pyplot as plt\nplt.plot([1])\n```\nEnjoy!";
        assert_eq!(extract_code(reply), "import matplotlib.pyplot as plt\nplt.plot([1])");

        let reply = "```\nplt.plot([1])\n```";
        assert_eq!(extract_code(reply), "plt.plot([1])");

        let reply = "```python\nplt.plot([1])";
        assert_eq!(extract_code(reply), "plt.plot([1])");
    }

    #[test]
    fn test_extract_code_without_fence() {
        assert_eq!(extract_code("  plt.plot([1])\n"), "plt.plot([1])");
    }

    #[test]
    fn test_encoded_image() {
        let image = EncodedImage::from_png(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(image.as_base64(), "iVBORw==");
        assert_eq!(image.png_bytes(), &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_missing_code_short_circuits() {
        let executor = CodeExecutor::new(RecordingRunner::ok());
        assert!(executor.execute(None).await.is_none());
        assert!(executor.execute(Some("   ")).await.is_none());
        assert!(executor.runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_detects_surface_on_full_reply() {
        let executor = CodeExecutor::new(RecordingRunner::ok());
        let reply = "A 3D cube:\n```python\nax.voxels(filled, facecolors='red')\n```";

        let image = executor.execute(Some(reply)).await.unwrap();
        assert!(image.png_bytes().starts_with(PNG_SIGNATURE));

        let calls = executor.runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "ax.voxels(filled, facecolors='red')");
        assert_eq!(calls[0].1, Surface::ThreeD);
    }

    #[tokio::test]
    async fn test_runner_failure_yields_no_image() {
        let executor = CodeExecutor::new(RecordingRunner::failing("NameError: name 'foo' is not defined"));
        assert!(executor.execute(Some("foo()")).await.is_none());

        let err = executor.render("foo()").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert_eq!(err.operation(), "executor::render");
    }

    #[tokio::test]
    async fn test_non_png_output_is_rejected() {
        let runner = RecordingRunner {
            calls: Mutex::new(Vec::new()),
            fail_with: None,
            output: b"hello".to_vec(),
        };
        let executor = CodeExecutor::new(runner);

        let err = executor.render("print('hello')").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    }

    #[tokio::test]
    async fn test_python_runner_missing_interpreter() {
        let runner = PythonRunner::new(ExecutorConfig {
            python: "shapegen-no-such-python".to_string(),
            timeout_secs: Some(5),
        });

        let err = runner.render("pass", Surface::TwoD).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.operation(), "python::spawn");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_covers_stdin_feed() {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        // Larger than a pipe buffer, and `sleep` never reads it.
        let code = "#".repeat(1 << 20);

        let err = exchange(child, &code, Some(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
        assert_eq!(err.operation(), "python::render");
    }
}
