use clap::Parser;
use color_eyre::Result;
use rawtap::{CaptureApp, CaptureConfig, OverflowPolicy, WaitStrategy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of queue slots between the reader thread and the display loop
    #[arg(short, long, default_value_t = rawtap::queue::DEFAULT_CAPACITY)]
    capacity: usize,

    /// How often, in milliseconds, the reader re-checks for shutdown
    #[arg(short, long = "poll-timeout-ms", default_value_t = 10)]
    poll_timeout_ms: u64,

    /// What to drop when the queue is full
    #[arg(long, value_enum, default_value_t = OverflowPolicy::DropNewest)]
    overflow: OverflowPolicy,

    /// How the display loop waits for input
    #[arg(long, value_enum, default_value_t = WaitStrategy::Spin)]
    wait: WaitStrategy,

    /// Log every dropped keystroke
    #[arg(long)]
    report_drops: bool,

    /// Print bytes without color
    #[arg(long)]
    plain: bool,

    /// Leave the screen and cursor alone
    #[arg(long)]
    no_clear: bool,

    /// Do not write log files
    #[arg(long)]
    no_disk_logs: bool,

    /// Directory for log files (default: $RAWTAP_LOG_DIR, then ~/.rawtap/logs)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = CaptureConfig::builder()
        .capacity(args.capacity)
        .poll_timeout_ms(args.poll_timeout_ms)
        .overflow(args.overflow)
        .wait(args.wait)
        .report_drops(args.report_drops)
        .build()?;

    let mut app = CaptureApp::builder("rawtap")
        .config(config)
        .color(!args.plain)
        .screen_control(!args.no_clear)
        .use_disk_logs(!args.no_disk_logs)
        .log_dir(args.log_dir)
        .build();
    app.init()?;

    tracing::info!("rawtap starting");

    let result = app.run();

    if let Err(ref e) = result {
        tracing::error!("Application error: {}", e);
    }

    tracing::info!("rawtap shutting down");
    result.map(|_| ())
}
