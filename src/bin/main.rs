use clap::{CommandFactory, Parser};
use eoka_pilot::{
    ActionEntry, BrowserSession, Error, HttpTransport, Pilot, RunReport, RunStatus, Settings,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How long a forced shutdown waits for the browser to close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "eoka-pilot")]
#[command(about = "Instruction-driven browser automation")]
#[command(version)]
struct Cli {
    /// Page to start from
    start_url: Option<String>,

    /// What to do on the page
    #[arg(trailing_var_arg = true)]
    instructions: Vec<String>,

    /// Settings file (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run the browser headless (overrides settings)
    #[arg(long, conflicts_with = "headed")]
    headless: bool,

    /// Show the browser window (overrides settings)
    #[arg(long)]
    headed: bool,

    /// Directory for the raw dump, diagnostics and summary
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Interpret and validate the action list, print it, do not execute
    #[arg(long)]
    plan_only: bool,

    /// Skip the summary pass
    #[arg(long)]
    no_summary: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if std::env::var_os("RUST_LOG").is_some() {
        builder.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        builder.with_max_level(level).init();
    }
}

fn usage_exit() -> ! {
    eprintln!("{}", Cli::command().render_usage());
    eprintln!("A start URL and instructions are required.");
    std::process::exit(1);
}

/// Print the offending model text for a fatal rejection.
fn report_fatal(err: &Error) {
    eprintln!("✗ {}", err);
    if let Some(raw) = err.raw_text() {
        eprintln!("--- model text ---");
        eprintln!("{}", raw);
        eprintln!("------------------");
    }
}

fn print_report(report: &RunReport) {
    println!();
    match report.status {
        RunStatus::Completed => println!("✓ Completed"),
        RunStatus::Aborted => println!("⚠ Aborted: run budget exceeded"),
        RunStatus::ForceTerminated => println!("✗ Force-terminated"),
    }
    println!(
        "  Actions: {} ({} succeeded, {} failed, {} skipped, {} aborted)",
        report.outcomes.len(),
        report.count("succeeded"),
        report.count("failed"),
        report.count("skipped"),
        report.count("aborted")
    );
    println!("  Duration: {}ms", report.duration.as_millis());
    if report.retries > 0 {
        println!("  Retries: {}", report.retries);
    }
    if !report.results.is_empty() {
        let keys: Vec<&str> = report.results.keys().collect();
        println!("  Results: {}", keys.join(", "));
        println!("{}", report.results);
    }
    if let Some(ref summary) = report.summary {
        println!();
        println!("{}", summary);
    }
}

async fn close(session: BrowserSession, forced: bool) {
    let result = if forced {
        match tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout("browser did not close".into())),
        }
    } else {
        session.close().await
    };
    if let Err(e) = result {
        warn!("Failed to close browser: {}", e);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eoka_pilot::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let Some(start_url) = cli.start_url.clone() else {
        usage_exit();
    };
    if cli.instructions.is_empty() {
        usage_exit();
    }
    let instructions = cli.instructions.join(" ");

    // defaults -> file -> environment -> flags
    let mut settings = match cli.config {
        Some(ref path) => Settings::load(path)?,
        None => Settings::from_env()?,
    };
    if cli.headless {
        settings.browser.headless = true;
    }
    if cli.headed {
        settings.browser.headless = false;
    }
    if let Some(dir) = cli.output_dir {
        settings.output.dir = dir;
    }
    if cli.no_summary {
        settings.run.summarize = false;
    }
    settings.validate()?;

    let transport = HttpTransport::new(&settings.model)?;
    let session = BrowserSession::launch(&settings.browser).await?;
    let pilot = Pilot::new(transport, settings);

    if cli.plan_only {
        let plan = pilot.plan(session.page(), &start_url, &instructions).await;
        close(session, false).await;
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                report_fatal(&e);
                std::process::exit(1);
            }
        };

        println!("Action list valid: {} entries", plan.actions.len());
        for (i, entry) in plan.actions.entries().iter().enumerate() {
            match entry {
                ActionEntry::Action(action) => println!("  {}. {}", i + 1, action),
                ActionEntry::Anomaly(anomaly) => println!("  {}. ! {}", i + 1, anomaly),
            }
        }
        if plan.interpretation.retries > 0 {
            println!("  Retries: {}", plan.interpretation.retries);
        }
        return Ok(());
    }

    println!("Running: {}", instructions);
    let result = pilot.run(session.page(), &start_url, &instructions).await;

    match result {
        Ok(report) => {
            let forced = report.status == RunStatus::ForceTerminated;
            print_report(&report);
            close(session, forced).await;
            if forced {
                std::process::exit(2);
            }
        }
        Err(e) => {
            close(session, false).await;
            report_fatal(&e);
            std::process::exit(1);
        }
    }

    Ok(())
}
