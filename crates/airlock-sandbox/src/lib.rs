//! # Airlock Sandbox - External Tool Boundary
//!
//! Native codecs (qpdf, poppler, libvips) parse hostile input in Airlock's
//! place. This crate is the only way Airlock runs them, and it guarantees
//! three things about every run:
//!
//! 1. **Bounded time** - each invocation has a wall-clock budget; on expiry the
//!    child is killed and the run is a failure.
//! 2. **Bounded output** - stdout and stderr are captured up to a cap.
//! 3. **Explicit contracts** - each tool's accepted exit codes are fixed in
//!    [`tools`], so a crash or a partial write is never mistaken for success.
//!
//! ```text
//!   pipeline ──► Toolchain ──► dyn ProcessSandbox ──► CommandSandbox ──► qpdf / vips / ...
//!                    │                  ▲
//!                    │                  └── scripted fakes in tests
//!                    └── exit-code contract, output-file check
//! ```

pub mod error;
pub mod process;
pub mod tools;

pub use error::{Result, SandboxError};
pub use process::{CommandSandbox, Invocation, ProcessSandbox, ToolOutput};
pub use tools::{ReencodeOptions, ToolPaths, Toolchain, QPDF_WARNINGS_EXIT};
