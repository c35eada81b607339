use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rendezvous_core::shutdown::TERMINATION_SIGNALS;
use rendezvous_core::{AttachConfig, ProcessIdentity, RendezvousError, Signal};
use rendezvous_utils::{LogFormat, LogLevel, info, init_logging, init_logging_to_file, init_logging_with_level, warn};

/// Sample host process for the debugger attach rendezvous.
#[derive(Parser, Debug)]
#[command(name = "rendezvous")]
#[command(version)]
#[command(about = "Sample host process for the debugger attach rendezvous", long_about = None)]
struct Cli
{
    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format (pretty or json); overrides RENDEZVOUS_LOG_FORMAT
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    /// Write logs to ~/.rendezvous/ instead of the terminal
    #[arg(long, global = true, default_value_t = false)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Run the attach rendezvous, then print a heartbeat until interrupted
    Run
    {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Print the resolved identity and discovery message
    Identity,
    /// Print the effective configuration
    Config,
    /// Show how a signal spec is interpreted
    Signal
    {
        /// Signal name or number (e.g. USR1, sigterm, 15)
        spec: String,
    },
}

fn main()
{
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let result = match cli.command {
        Commands::Run { seconds } => match tokio::runtime::Runtime::new() {
            Ok(rt) => {
                let result = rt.block_on(run_host(seconds));
                // The termination listener may still be parked on a blocking thread.
                rt.shutdown_background();
                result
            }
            Err(e) => Err(RendezvousError::Io(e)),
        },
        Commands::Identity => {
            print_identity(&AttachConfig::from_env());
            Ok(())
        }
        Commands::Config => {
            println!("{:#?}", AttachConfig::from_env());
            Ok(())
        }
        Commands::Signal { spec } => {
            print_signal(&spec);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn setup_logging(cli: &Cli) -> Result<(), rendezvous_utils::LoggingError>
{
    if cli.log_to_file {
        let path = init_logging_to_file(cli.log_level)?;
        eprintln!("Logging to {}", path.display());
        return Ok(());
    }
    match (cli.log_level, cli.log_format) {
        (None, None) => init_logging(),
        (level, format) => init_logging_with_level(level.unwrap_or(LogLevel::Info), format.unwrap_or_default()),
    }
}

/// Host main loop. Runs inside a tokio runtime on purpose: the rendezvous
/// must start cleanly from async hosts as well.
async fn run_host(seconds: Option<u64>) -> Result<(), RendezvousError>
{
    let orchestrator = rendezvous_core::global()
        .ok_or_else(|| RendezvousError::Runtime("attach rendezvous could not start".to_string()))?;
    let session = orchestrator.init();
    info!(
        pid = session.identity().pid,
        waiter = %session.waiter_state(),
        "Host starting"
    );

    // The shutdown coordinator re-raises SIGINT/SIGTERM once the bus is
    // closed, but it only runs with a live session. Listening here also stops
    // the host when there is none.
    let listener = orchestrator.interrupts().listen(&TERMINATION_SIGNALS)?;
    let mut stop = tokio::task::spawn_blocking(move || listener.recv());

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));

    loop {
        tokio::select! {
            received = &mut stop => {
                match received {
                    Ok(Some(signal)) => info!(%signal, "Stopping host"),
                    Ok(None) => warn!("Interrupt source closed; stopping host"),
                    Err(e) => warn!(error = %e, "Interrupt listener failed; stopping host"),
                }
                break;
            }
            _ = ticker.tick() => {
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    info!("Run time elapsed; stopping host");
                    break;
                }
                println!("hello from pid {}", process::id());
            }
        }
    }

    // Give the shutdown coordinator its grace period to close the bus. After a
    // signal it may end the process during this wait.
    if let Some(shutdown) = session.shutdown() {
        let grace = orchestrator.config().timeouts.disconnect_grace;
        if let Some(report) = tokio::task::block_in_place(|| shutdown.wait(grace * 2)) {
            info!(?report, "Bus session closed");
        }
    }

    Ok(())
}

fn print_identity(config: &AttachConfig)
{
    let identity = ProcessIdentity::resolve(config);
    println!("Process Identity:");
    println!("  PID: {}", identity.pid);
    match identity.ip {
        Some(ip) => println!("  Address: {}", ip),
        None => println!("  Address: (none)"),
    }
    println!("  Tag: {}", identity.tag);
    println!("  Alias: {}", identity.alias);
    println!("  Fingerprint: {}", identity.fingerprint);
    match identity.discovery_message() {
        Some(message) => {
            println!("  Discovery Message: {}", message);
            if message.is_ambiguous() {
                println!("  Warning: fields contain ':' or '='; listeners will misread this message");
            }
        }
        None => println!("  Discovery Message: (not sent without an address)"),
    }
}

fn print_signal(spec: &str)
{
    match spec.parse::<Signal>() {
        Ok(signal) => println!("{} -> {}", spec, signal),
        Err(e) => println!("{} -> {} (falls back to {})", spec, e, Signal::DEFAULT),
    }
}
