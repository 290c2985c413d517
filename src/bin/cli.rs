//! Warmtex CLI - fast LaTeX rebuilds through a primed engine.
//!
//! Usage:
//!   warmtex main.tex                          # Build, starting a server if needed
//!   warmtex --interaction=nonstopmode main.tex
//!   warmtex --port=4000 --nobrowser main.tex  # Options must come first
//!
//! Everything from the first unrecognized token on is passed to the engine.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use warmtex::daemon::protocol::{base_url, typeset_url, LAUNCH_FLAG};
use warmtex::daemon::{client, server};
use warmtex::{logging, Config, WarmtexError};

#[derive(Parser)]
#[command(name = "warmtex")]
#[command(about = "Warmtex - keeps a primed LaTeX engine between builds", long_about = None)]
struct Cli {
    /// Control server port (default: 59603 or the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Do not open the status page after starting a server
    #[arg(long)]
    nobrowser: bool,

    /// Config file (default: $WARMTEX_CONFIG or ~/.config/warmtex/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the server loop (used when the client starts a server)
    #[arg(long, hide = true)]
    launch: bool,

    /// Source file and flags passed through to the engine
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    if cli.launch {
        logging::init_logging(config.log_filter.as_deref().unwrap_or("info"));
        server::run_launched(&config).await?;
        return Ok(0);
    }

    logging::init_logging(config.log_filter.as_deref().unwrap_or("warn"));

    let cwd = std::env::current_dir()?;
    let url = typeset_url(config.port, &cwd, &cli.args);
    let mut stdout = tokio::io::stdout();

    match client::request_typeset(&url, &mut stdout).await {
        Err(WarmtexError::Unreachable(addr)) => debug!(%addr, "no server, launching one"),
        other => return finish(other),
    }

    let exe = std::env::current_exe()?;
    let mut launch_args = vec![LAUNCH_FLAG.to_string()];
    launch_args.extend(std::env::args().skip(1));
    client::launch_server(&exe, &launch_args, config.launch_timeout()).await?;

    if !cli.nobrowser {
        open_browser(base_url(config.port).as_str());
    }

    finish(client::request_typeset(&url, &mut stdout).await)
}

fn finish(result: warmtex::Result<i32>) -> Result<i32> {
    match result {
        Ok(code) => Ok(code),
        Err(WarmtexError::BadRequest) => {
            eprintln!("Error: expected exactly one source file among the arguments");
            Ok(2)
        }
        Err(e) => Err(e.into()),
    }
}

/// Best effort; a missing opener is not an error.
fn open_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let spawned = std::process::Command::new(opener)
        .arg(url)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        debug!(%opener, error = %e, "could not open browser");
    }
}
