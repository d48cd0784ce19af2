//! Shared fixtures: a scripted tool sandbox and in-process file builders.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use airlock_core::{AirlockConfig, Gateway, ProcessSandbox, SledDatastore};
use airlock_sandbox::{Invocation, SandboxError, ToolOutput};
use async_trait::async_trait;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;

const CLEAN_DUMP: &str = r#"{"version":2,"qpdf":[{"jsonversion":2},{
    "obj:1 0 R":{"value":{"/Type":"/Catalog","/Pages":"2 0 R"}},
    "obj:2 0 R":{"value":{"/Type":"/Pages","/Count":1,"/Kids":["3 0 R"]}},
    "obj:3 0 R":{"value":{"/Type":"/Page","/Parent":"2 0 R","/MediaBox":[0,0,612,792]}},
    "trailer":{"value":{"/Root":"1 0 R","/Size":4}}}]}"#;

const LAUNCH_DUMP: &str = r#"{"version":2,"qpdf":[{"jsonversion":2},{
    "obj:1 0 R":{"value":{"/Type":"/Catalog","/Pages":"2 0 R","/OpenAction":"4 0 R"}},
    "obj:2 0 R":{"value":{"/Type":"/Pages","/Count":1,"/Kids":["3 0 R"]}},
    "obj:3 0 R":{"value":{"/Type":"/Page","/Parent":"2 0 R"}},
    "obj:4 0 R":{"value":{"/S":"/Launch","/F":"u:calc.exe"}},
    "trailer":{"value":{"/Root":"1 0 R","/Size":5}}}]}"#;

/// qpdf, pdftoppm and img2pdf stand-ins.
///
/// `qpdf --json` answers from the file content: anything containing
/// `/OpenAction` dumps as a document with a launch action. `--linearize`
/// copies its input unchanged, so active content survives it.
#[derive(Default)]
pub struct FakeTools {
    calls: AtomicUsize,
}

impl FakeTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn not_installed(program: &str) -> SandboxError {
    SandboxError::Spawn {
        program: program.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
    }
}

#[async_trait]
impl ProcessSandbox for FakeTools {
    async fn run(&self, inv: &Invocation) -> airlock_sandbox::Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match inv.program.as_str() {
            "qpdf" if inv.has_arg("--json") => {
                let bytes = std::fs::read(&inv.args[1])?;
                Ok(ToolOutput::success(dump_for(&bytes)))
            }
            "qpdf" if inv.has_arg("--linearize") => {
                std::fs::copy(&inv.args[2], &inv.args[3])?;
                Ok(ToolOutput::exited(0))
            }
            "pdftoppm" => {
                let prefix = inv.args.last().ok_or_else(|| not_installed("pdftoppm"))?;
                std::fs::write(format!("{}-1.png", prefix), png(16, 16))?;
                Ok(ToolOutput::exited(0))
            }
            "img2pdf" => {
                let at = inv.args.iter().position(|a| a == "-o").ok_or_else(|| not_installed("img2pdf"))?;
                std::fs::write(&inv.args[at + 1], clean_pdf())?;
                Ok(ToolOutput::exited(0))
            }
            other => Err(not_installed(other)),
        }
    }
}

pub fn dump_for(bytes: &[u8]) -> &'static str {
    if bytes.windows(11).any(|w| w == b"/OpenAction") {
        LAUNCH_DUMP
    } else {
        CLEAN_DUMP
    }
}

pub fn clean_pdf() -> Vec<u8> {
    b"%PDF-1.7\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >> endobj\n\
trailer << /Root 1 0 R /Size 4 >>\n\
startxref\n9\n%%EOF\n"
        .to_vec()
}

pub fn launch_pdf() -> Vec<u8> {
    b"%PDF-1.7\n\
1 0 obj << /Type /Catalog /Pages 2 0 R /OpenAction 4 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
4 0 obj << /S /Launch /F (calc.exe) >> endobj\n\
trailer << /Root 1 0 R /Size 5 >>\n\
startxref\n9\n%%EOF\n"
        .to_vec()
}

/// A gradient PNG, large enough to clear the minimum size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// A looping animated GIF (carries a NETSCAPE2.0 application extension).
pub fn animated_gif(frames: u32) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        for i in 0..frames {
            let img = RgbaImage::from_fn(32, 32, |x, y| {
                Rgba([((x + i * 40) % 256) as u8, (y * 8 % 256) as u8, 90, 255])
            });
            let frame = Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }
    out
}

/// Defaults pointed at `dir`, with admission control out of the way.
pub fn test_config(dir: &TempDir) -> AirlockConfig {
    let mut config = AirlockConfig::default();
    config.storage.db_path = dir.path().join("ledger.db");
    config.storage.quarantine_dir = dir.path().join("quarantine");
    config.storage.final_dir = dir.path().join("final");
    config.gateway.rate_limit_per_minute = 1_000;
    config
}

pub fn gateway(config: AirlockConfig, tools: Arc<FakeTools>) -> Gateway {
    let datastore = Arc::new(SledDatastore::temporary().unwrap());
    Gateway::with_collaborators(config, datastore, tools).unwrap()
}

/// Number of files currently in the quarantine area.
pub fn quarantine_len(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("quarantine")).unwrap().count()
}
