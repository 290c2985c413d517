//! # Warmtex
//!
//! Faster rebuilds for LaTeX documents with a stable preamble.
//!
//! A background server keeps one engine process alive that has already read
//! the document's preamble. When the next build has the same preamble, only
//! the body is fed to that process.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warmtex::{EngineCache, OutputSink};
//!
//! # async fn demo() -> warmtex::Result<()> {
//! let cache = EngineCache::locate("lualatex")?;
//! let (sink, mut output) = OutputSink::channel();
//! let status = cache
//!     .typeset(sink, "/tmp/doc".into(), vec!["--interaction=nonstopmode".into()], "main.tex".into())
//!     .await?;
//! while let Ok(chunk) = output.try_recv() {
//!     print!("{}", String::from_utf8_lossy(&chunk));
//! }
//! println!("exit status {}", status.code());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::Config;
pub use engine::{EngineCache, EngineFault, ExitStatus, OutputSink, SessionIdentity};
pub use error::{Result, WarmtexError};
