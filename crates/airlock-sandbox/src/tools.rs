//! The external tool invocations Airlock depends on, each with its exit-code
//! contract.
//!
//! | Operation | Program | Success |
//! |-----------|---------|---------|
//! | [`Toolchain::structure_dump`] | `qpdf --json` | exit 0 or warnings code, non-empty stdout |
//! | [`Toolchain::linearize`] | `qpdf --linearize --remove-metadata` | exit 0 or warnings code, output exists |
//! | [`Toolchain::render_to_raster_and_rebuild`] | `pdftoppm` + `img2pdf` | both exit 0, output exists |
//! | [`Toolchain::decode_and_reencode`] | `vips copy in[n=1] out[strip]` | exit 0, output exists |
//!
//! A timeout is always a failure, whatever the exit code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::process::{Invocation, ProcessSandbox, ToolOutput};

/// qpdf's "succeeded with warnings" exit code.
pub const QPDF_WARNINGS_EXIT: i32 = 3;

/// Program names (or absolute paths) of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub qpdf: String,
    pub pdftoppm: String,
    pub img2pdf: String,
    pub vips: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            qpdf: "qpdf".to_string(),
            pdftoppm: "pdftoppm".to_string(),
            img2pdf: "img2pdf".to_string(),
            vips: "vips".to_string(),
        }
    }
}

/// Options for [`Toolchain::decode_and_reencode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReencodeOptions {
    pub strip_metadata: bool,
    /// Number of frames to load from multi-frame inputs.
    pub frames: u32,
}

impl Default for ReencodeOptions {
    fn default() -> Self {
        Self {
            strip_metadata: true,
            frames: 1,
        }
    }
}

/// Binds a [`ProcessSandbox`] to tool paths and the success contracts above.
pub struct Toolchain<'a> {
    sandbox: &'a dyn ProcessSandbox,
    paths: &'a ToolPaths,
    qpdf_warnings_exit: i32,
}

impl<'a> Toolchain<'a> {
    pub fn new(sandbox: &'a dyn ProcessSandbox, paths: &'a ToolPaths) -> Self {
        Self {
            sandbox,
            paths,
            qpdf_warnings_exit: QPDF_WARNINGS_EXIT,
        }
    }

    /// Overrides the qpdf warnings exit code.
    pub fn with_qpdf_warnings_exit(mut self, code: i32) -> Self {
        self.qpdf_warnings_exit = code;
        self
    }

    /// Dumps the object graph of a PDF as qpdf JSON.
    ///
    /// # Errors
    ///
    /// Fails on spawn failure, timeout, an exit code other than 0 or the
    /// warnings code, empty or truncated stdout.
    pub async fn structure_dump(&self, input: &Path, timeout: Duration) -> Result<Vec<u8>> {
        let inv = Invocation::new(&self.paths.qpdf, timeout)
            .arg("--json")
            .arg(path_arg(input));
        let out = self.sandbox.run(&inv).await?;
        self.expect_exit(&inv, &out, &[0, self.qpdf_warnings_exit])?;
        if out.stdout.is_empty() || out.truncated_stdout {
            return Err(SandboxError::MissingOutput { program: inv.program });
        }
        Ok(out.stdout)
    }

    /// Rewrites a PDF into one linearized revision with metadata removed.
    ///
    /// # Errors
    ///
    /// Fails on spawn failure, timeout, an exit code other than 0 or the
    /// warnings code, or a missing output file.
    pub async fn linearize(&self, input: &Path, output: &Path, timeout: Duration) -> Result<()> {
        let inv = Invocation::new(&self.paths.qpdf, timeout)
            .args(["--linearize", "--remove-metadata"])
            .arg(path_arg(input))
            .arg(path_arg(output));
        let out = self.sandbox.run(&inv).await?;
        self.expect_exit(&inv, &out, &[0, self.qpdf_warnings_exit])?;
        if out.exit_code == Some(self.qpdf_warnings_exit) {
            info!(program = %inv.program, "Linearized with warnings");
        }
        expect_file(&inv.program, output).await
    }

    /// Renders every page to PNG in `scratch`, then rebuilds a PDF from the
    /// images. Nothing but pixels survives.
    ///
    /// # Errors
    ///
    /// Fails if either step fails, renders no pages, or leaves no output.
    pub async fn render_to_raster_and_rebuild(
        &self,
        input: &Path,
        output: &Path,
        scratch: &Path,
        timeout: Duration,
    ) -> Result<()> {
        let prefix = scratch.join("page");
        let render = Invocation::new(&self.paths.pdftoppm, timeout)
            .args(["-png", "-r", "150"])
            .arg(path_arg(input))
            .arg(path_arg(&prefix));
        let out = self.sandbox.run(&render).await?;
        self.expect_exit(&render, &out, &[0])?;

        let pages = list_pngs(scratch).await?;
        if pages.is_empty() {
            return Err(SandboxError::MissingOutput { program: render.program });
        }
        debug!(pages = pages.len(), "Rendered pages for rebuild");

        let rebuild = Invocation::new(&self.paths.img2pdf, timeout)
            .args(pages.iter().map(|p| path_arg(p)))
            .arg("-o")
            .arg(path_arg(output));
        let out = self.sandbox.run(&rebuild).await?;
        self.expect_exit(&rebuild, &out, &[0])?;
        expect_file(&rebuild.program, output).await
    }

    /// Decodes an image and writes it back out through libvips.
    ///
    /// The output format follows the output path's extension.
    ///
    /// # Errors
    ///
    /// Fails on spawn failure, timeout, non-zero exit, or missing output.
    pub async fn decode_and_reencode(
        &self,
        input: &Path,
        output: &Path,
        options: ReencodeOptions,
        timeout: Duration,
    ) -> Result<()> {
        let source = format!("{}[n={}]", path_arg(input), options.frames.max(1));
        let target = if options.strip_metadata {
            format!("{}[strip]", path_arg(output))
        } else {
            path_arg(output)
        };
        let inv = Invocation::new(&self.paths.vips, timeout)
            .arg("copy")
            .arg(source)
            .arg(target);
        let out = self.sandbox.run(&inv).await?;
        self.expect_exit(&inv, &out, &[0])?;
        expect_file(&inv.program, output).await
    }

    fn expect_exit(&self, inv: &Invocation, out: &ToolOutput, accepted: &[i32]) -> Result<()> {
        if out.timed_out {
            return Err(SandboxError::TimedOut {
                program: inv.program.clone(),
                timeout_ms: inv.timeout.as_millis() as u64,
            });
        }
        match out.exit_code {
            Some(code) if accepted.contains(&code) => Ok(()),
            code => {
                warn!(program = %inv.program, exit_code = ?code, "Tool failed");
                Err(SandboxError::ExitStatus {
                    program: inv.program.clone(),
                    code,
                })
            }
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn expect_file(program: &str, path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(SandboxError::MissingOutput {
            program: program.to_string(),
        }),
    }
}

/// PNG files in `dir`, sorted so page order is preserved.
async fn list_pngs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut pngs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("png") {
            pngs.push(path);
        }
    }
    pngs.sort();
    Ok(pngs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays a fixed output and records invocations; optionally writes the
    /// last argument (stripped of `[...]` options) as an output file.
    struct Scripted {
        output: ToolOutput,
        write_output: bool,
        calls: Mutex<Vec<Invocation>>,
    }

    impl Scripted {
        fn new(output: ToolOutput, write_output: bool) -> Self {
            Self { output, write_output, calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ProcessSandbox for Scripted {
        async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.write_output {
                if let Some(last) = invocation.args.last() {
                    let path = last.split('[').next().unwrap();
                    std::fs::write(path, b"out").unwrap();
                }
            }
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn test_structure_dump_accepts_warnings_exit() {
        let mut out = ToolOutput::success(b"{\"qpdf\": []}".to_vec());
        out.exit_code = Some(QPDF_WARNINGS_EXIT);
        let sandbox = Scripted::new(out, false);
        let paths = ToolPaths::default();
        let tools = Toolchain::new(&sandbox, &paths);

        let json = tools
            .structure_dump(Path::new("/q/in.pdf"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!json.is_empty());

        let calls = sandbox.calls.lock().unwrap();
        assert_eq!(calls[0].program, "qpdf");
        assert_eq!(calls[0].args, vec!["--json", "/q/in.pdf"]);
    }

    #[tokio::test]
    async fn test_structure_dump_rejects_other_exit_codes() {
        let sandbox = Scripted::new(ToolOutput::exited(2), false);
        let paths = ToolPaths::default();
        let err = Toolchain::new(&sandbox, &paths)
            .structure_dump(Path::new("/q/in.pdf"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ExitStatus { code: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_failure_even_with_output() {
        let mut out = ToolOutput::killed_at_deadline(Duration::from_secs(5));
        out.stdout = b"{}".to_vec();
        let sandbox = Scripted::new(out, false);
        let paths = ToolPaths::default();
        let err = Toolchain::new(&sandbox, &paths)
            .structure_dump(Path::new("/q/in.pdf"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_linearize_requires_output_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.pdf");
        let paths = ToolPaths::default();

        let silent = Scripted::new(ToolOutput::exited(0), false);
        let err = Toolchain::new(&silent, &paths)
            .linearize(Path::new("/q/in.pdf"), &output, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::MissingOutput { .. }));

        let writer = Scripted::new(ToolOutput::exited(0), true);
        Toolchain::new(&writer, &paths)
            .linearize(Path::new("/q/in.pdf"), &output, Duration::from_secs(5))
            .await
            .unwrap();
        let calls = writer.calls.lock().unwrap();
        assert!(calls[0].has_arg("--linearize"));
        assert!(calls[0].has_arg("--remove-metadata"));
    }

    #[tokio::test]
    async fn test_vips_first_frame_and_strip() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.png");
        let sandbox = Scripted::new(ToolOutput::exited(0), true);
        let paths = ToolPaths::default();
        Toolchain::new(&sandbox, &paths)
            .decode_and_reencode(
                Path::new("/q/in.gif"),
                &output,
                ReencodeOptions::default(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let calls = sandbox.calls.lock().unwrap();
        assert_eq!(calls[0].args[0], "copy");
        assert_eq!(calls[0].args[1], "/q/in.gif[n=1]");
        assert!(calls[0].args[2].ends_with("out.png[strip]"));
    }
}
