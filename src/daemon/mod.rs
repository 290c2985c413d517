//! Daemon module - the background build server and the client that finds it.
//!
//! The server keeps the engine cache in memory and serves compile requests
//! over loopback HTTP. The client starts a server on first use.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           warmtex --launch               │
//! │  - engine cache (one primed process)    │
//! │  - HTTP on 127.0.0.1:<port>             │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ GET /typeset?dir=…&args=…
//!           │ chunked output + Typeset-Status trailer
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           warmtex <file> [flags]         │
//! │  - connects, or launches and retries    │
//! │  - streams output, exits with status    │
//! └─────────────────────────────────────────┘
//! ```

pub mod client;
pub mod http;
pub mod protocol;
pub mod server;

pub use client::{launch_server, request_typeset};
pub use protocol::{CompileRequest, RequestError, StatusReport};
pub use server::{run_launched, Server};
