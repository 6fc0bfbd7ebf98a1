// Binary entry point for the `minikv` server.
//
// Control flow: parse the CLI, apply verbosity, load the snapshot, bind
// the listener, hook SIGINT/SIGTERM/SIGQUIT to the stop flag, run the
// event loop, and save the snapshot on the way out.  Exit code 0 means a
// clean signal-driven shutdown; anything fatal at startup exits non-zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use clap::Parser;

use minikv::display::set_display_level;
use minikv::{config, notify, Cache, Server};

#[derive(Parser)]
#[command(name = "minikv", about = "In-memory key/value server (BIN + RESP)")]
struct Args {
    /// Listening port.
    #[arg(short = 'p', long = "port", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Increase verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (repeatable).
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    quiet: u8,
}

/// Stop flag shared with the event loop; the signal handler reaches it
/// through this cell.
static STOP: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    // Plain atomic store: safe in signal context.
    if let Some(stop) = STOP.get() {
        stop.store(true, Ordering::Relaxed);
    }
}

/// Routes the termination signals to the stop flag.  SA_RESTART is left
/// off on purpose so a signal interrupts the epoll wait immediately.
fn install_signal_handlers() -> anyhow::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT] {
        unsafe { sigaction(sig, &action) }.with_context(|| format!("installing {sig:?}"))?;
    }
    Ok(())
}

fn run(args: Args) -> anyhow::Result<()> {
    let level = (2i32 + i32::from(args.verbose) - i32::from(args.quiet)).clamp(0, 4);
    set_display_level(level as u32);

    let db_path = config::db_path();
    let mut cache = Cache::new();
    if !cache.load(&db_path) {
        anyhow::bail!(
            "refusing to start on a corrupt snapshot: {}",
            db_path.display()
        );
    }

    let stop = Arc::new(AtomicBool::new(false));
    STOP.set(Arc::clone(&stop)).expect("stop flag set once");
    install_signal_handlers()?;

    let mut server = Server::bind(args.port, cache, stop)
        .with_context(|| format!("binding port {}", args.port))?;
    notify!(2, "minikv listening on port {}\n", server.local_port());
    server.run().context("event loop")?;

    notify!(2, "shutting down, saving snapshot\n");
    let cache = server.into_cache();
    if !cache.save(&db_path) {
        anyhow::bail!("final snapshot failed: {}", db_path.display());
    }
    cache.drain_destroyer();
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("minikv: {e:#}");
        std::process::exit(1);
    }
}
