// UTILGOV v0.1.0 -- UTILIZATION-DRIVEN CPU FREQUENCY GOVERNOR
// CLOSED-LOOP FREQUENCY SELECTION FOR LINUX CPUFREQ POLICIES
//
// DECISIONS HAPPEN IN THE utilgov LIBRARY (PER-CORE UPDATE PATH)
// THIS BINARY HANDLES: CONFIGURATION, SAMPLING /proc/stat, DRIVING
// scaling_setspeed, WATCHING LIMITS, MONITORING, REPORTING

mod cli;
mod daemon;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};

use utilgov::topology::DEFAULT_SYSFS_ROOT;
use utilgov::tuning;

use daemon::Daemon;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "utilgov")]
#[command(about = "UTILGOV -- UTILIZATION-DRIVEN CPU FREQUENCY GOVERNOR")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // SAMPLING PERIOD IN MICROSECONDS (10MS DEFAULT)
    #[arg(long, default_value_t = 10_000)]
    period_us: u64,

    // SCHEDULER TICK IN MICROSECONDS. STALENESS + IOWAIT EXPIRY (4MS DEFAULT)
    #[arg(long, default_value_t = 4_000)]
    tick_us: u64,

    // UP RATE LIMIT OVERRIDE IN MICROSECONDS
    #[arg(long)]
    up_rate_limit_us: Option<u32>,

    // DOWN RATE LIMIT OVERRIDE IN MICROSECONDS (DEFAULT 10X UP)
    #[arg(long)]
    down_rate_limit_us: Option<u32>,

    // ONE TUNABLE SET PER POLICY INSTEAD OF ONE GLOBAL SET
    #[arg(long)]
    per_policy_tunables: bool,

    // UTILIZATION IS FREQUENCY-INVARIANT: SCALE AGAINST POLICY MAX
    #[arg(long)]
    scale_invariant: bool,

    // PLATFORM OVERRIDE: NEVER BOOST ON IOWAIT
    #[arg(long)]
    suppress_iowait_boost: bool,

    // CPUS WITH IDLE SLACK TIMERS, KERNEL LIST FORMAT ("0-3,6")
    #[arg(long, default_value = "")]
    slack_cpus: String,

    // SLACK TIMER EXPIRY IN MILLISECONDS
    #[arg(long, default_value_t = tuning::DEFAULT_SLACK_EXPIRY_MS)]
    slack_expiry_ms: u32,

    // DECIDE BUT NEVER WRITE scaling_setspeed
    #[arg(long)]
    dry_run: bool,

    // SWITCH POLICIES TO THE userspace GOVERNOR, RESTORE ON EXIT
    #[arg(long)]
    take_over: bool,

    // CPU SYSFS ROOT
    #[arg(long, default_value = DEFAULT_SYSFS_ROOT)]
    sysfs_root: PathBuf,

    // PRINT VERBOSE OUTPUT (-v DEBUG, -vv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

#[derive(Subcommand)]
enum Command {
    // PRINT DETECTED POLICIES AND FREQUENCY TABLES
    Probe,
    // VERIFY CPUFREQ SYSFS, /proc/stat AND userspace GOVERNOR AVAILABILITY
    Check,
}

impl Cli {
    fn rate_limits_us(&self) -> Option<(u32, u32)> {
        match (self.up_rate_limit_us, self.down_rate_limit_us) {
            (Some(up), Some(down)) => Some((up, down)),
            (Some(up), None) => Some((up, up.saturating_mul(tuning::DOWN_RATE_RATIO))),
            (None, Some(down)) => Some((down / tuning::DOWN_RATE_RATIO, down)),
            (None, None) => None,
        }
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let llv = match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match &cli.command {
        Some(Command::Probe) => return cli::probe::run_probe(&cli.sysfs_root),
        Some(Command::Check) => return cli::check::run_check(&cli.sysfs_root),
        None => {}
    }

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    println!("UTILGOV v0.1.0");
    println!("SYSFS ROOT:      {}", cli.sysfs_root.display());
    println!("PERIOD:          {} us (tick {} us)", cli.period_us, cli.tick_us);
    println!("SCALE INVARIANT: {}", cli.scale_invariant);
    println!("IOWAIT BOOST:    {}", if cli.suppress_iowait_boost { "SUPPRESSED" } else { "ON" });
    println!("TUNABLES:        {}", if cli.per_policy_tunables { "PER-POLICY" } else { "GLOBAL" });
    if let Some((up, down)) = cli.rate_limits_us() {
        println!("RATE LIMITS:     UP={}us DOWN={}us (OVERRIDE)", up, down);
    }
    if !cli.slack_cpus.is_empty() {
        println!("SLACK:           CPUS {} EXPIRY {} ms", cli.slack_cpus, cli.slack_expiry_ms);
    }
    println!("DRY RUN:         {}", cli.dry_run);
    println!();

    let mut daemon = Daemon::init(&cli)?;
    let result = daemon.start().and_then(|()| {
        println!("UTILGOV IS ACTIVE (CTRL+C TO EXIT)");
        daemon.run(&SHUTDOWN)
    });

    println!("UTILGOV IS SHUTTING DOWN");
    daemon.shutdown();

    if cli.dump_log {
        daemon.log.dump();
    }
    daemon.log.summary();

    result?;
    println!("UTILGOV OUT.");
    Ok(())
}
