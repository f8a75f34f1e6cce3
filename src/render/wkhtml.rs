//! `wkhtmltoimage` as an external rasterizer.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::Rasterizer;
use crate::error::{IntakeError, Result};

/// Interval between exit checks while waiting on the renderer.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Most stderr kept in a failure message.
const STDERR_TAIL_CHARS: usize = 2000;

/// Runs the `wkhtmltoimage` binary once per message.
#[derive(Debug, Clone)]
pub struct WkHtmlToImage {
    binary: PathBuf,
    /// `None` waits forever.
    timeout: Option<Duration>,
}

impl WkHtmlToImage {
    pub fn new(binary: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn run(&self, input: &Path, width_px: u32, output: &Path) -> Result<()> {
        debug!(binary = %self.binary.display(), output = %output.display(), width_px, "Rendering HTML");
        let mut child = Command::new(&self.binary)
            .arg("--quiet")
            .args(["--width", &width_px.to_string()])
            .args(["--encoding", "UTF-8"])
            .arg("--disable-smart-width")
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                IntakeError::Render(format!("cannot start '{}': {e}", self.binary.display()))
            })?;

        // Drained concurrently so a chatty renderer never blocks on a full pipe
        let stderr = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let status = self.wait_for_exit(&mut child)?;
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(IntakeError::Render(format!(
                "'{}' exited with {status}: {}",
                self.binary.display(),
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            )));
        }
        if !stderr.trim().is_empty() {
            debug!(bytes = stderr.len(), "Renderer wrote to stderr");
        }
        if !output.exists() {
            return Err(IntakeError::Render(format!(
                "'{}' produced no image",
                self.binary.display()
            )));
        }
        Ok(())
    }

    fn wait_for_exit(&self, child: &mut std::process::Child) -> Result<std::process::ExitStatus> {
        let started = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| IntakeError::Render(format!("waiting on renderer: {e}")))?
            {
                return Ok(status);
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(timeout_secs = limit.as_secs(), "Renderer timed out, killed");
                    return Err(IntakeError::Render(format!(
                        "renderer exceeded {}s",
                        limit.as_secs()
                    )));
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Last `n` characters of `s`.
fn tail(s: &str, n: usize) -> &str {
    let skip = s.chars().count().saturating_sub(n);
    match s.char_indices().nth(skip) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

impl Rasterizer for WkHtmlToImage {
    fn rasterize(&self, html: &str, width_px: u32, output: &Path) -> Result<()> {
        let input = output.with_extension("html");
        std::fs::write(&input, html)
            .map_err(|e| IntakeError::Render(format!("cannot write renderer input: {e}")))?;

        let result = self.run(&input, width_px, output);
        if let Err(e) = std::fs::remove_file(&input) {
            debug!(path = %input.display(), error = %e, "Could not remove renderer input");
        }
        result
    }
}
