//! NexusShell entry point: configuration, logging, signal handling, and a
//! minimal read-eval loop. The richer interactive line editor plugs in on
//! top of [`Kernel`]; this binary is the plain-stdin fallback.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nexus_kernel::{is_exit_request, Kernel};
use nexus_types::load_config;

/// NexusShell -- dual-mode command shell with a capability-checked core.
#[derive(Parser, Debug)]
#[command(name = "nexus", version, about)]
struct Cli {
    /// Path to a JSON configuration file
    config: Option<PathBuf>,

    /// Increase logging verbosity (same as NEXUS_DEBUG=1)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Run a single line and exit instead of reading stdin
    #[arg(long, short = 'c')]
    command: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("nexus: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;
    if cli.verbose {
        config.shell.enable_debug = true;
    }

    let filter = if config.shell.enable_debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let debug = config.shell.enable_debug;
    let kernel = Arc::new(Kernel::init(config).context("initialising kernel")?);

    {
        let kernel = Arc::clone(&kernel);
        ctrlc::set_handler(move || {
            eprintln!();
            kernel.shutdown();
            std::process::exit(130);
        })
        .context("installing SIGINT handler")?;
    }

    if let Some(line) = cli.command {
        let code = run_line(&kernel, &line, debug);
        kernel.shutdown();
        return Ok(code);
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        write!(stdout, "nexus> ")?;
        stdout.flush()?;

        let mut line = String::new();
        let read = stdin.lock().read_line(&mut line)?;
        if read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        match kernel.execute_line(&line) {
            Ok(value) => {
                if is_exit_request(&value) {
                    if let Some(message) = value.get("message").and_then(|v| v.as_str()) {
                        println!("{message}");
                    }
                    break;
                }
                let rendered = value.display_string();
                if !rendered.is_empty() {
                    println!("{rendered}");
                }
            }
            Err(e) => {
                eprintln!("{}", e.user_line());
                if debug {
                    eprintln!("{e:#?}");
                }
            }
        }
    }

    kernel.shutdown();
    Ok(0)
}

fn run_line(kernel: &Kernel, line: &str, debug: bool) -> i32 {
    match kernel.execute_line(line) {
        Ok(value) => {
            let rendered = value.display_string();
            if !rendered.is_empty() {
                println!("{rendered}");
            }
            0
        }
        Err(e) => {
            eprintln!("{}", e.user_line());
            if debug {
                eprintln!("{e:#?}");
            }
            // Per-command failures do not change the process exit code in
            // interactive mode; in -c mode the caller wants to know.
            1
        }
    }
}
