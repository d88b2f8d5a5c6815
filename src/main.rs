//! char-pipeline CLI - encrypt a file through the five-stage pipeline
//!
//! Usage:
//!   char-pipeline <input> <output> <log> [--input-buffer N] [--output-buffer M]
//!
//! Buffer sizes that are not given on the command line are prompted for.

use anyhow::{Context, Result};
use char_pipeline::config::capacity_or_prompt;
use char_pipeline::{
    PipelineBuilder, ReaderSource, ResetTrigger, ShiftCipher, WriterLog, WriterSink,
};
use clap::error::ErrorKind;
use clap::Parser;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "char-pipeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File to read characters from
    input: PathBuf,

    /// File to write encrypted characters to
    output: PathBuf,

    /// File to append character counts to
    log: PathBuf,

    /// Input buffer capacity (prompted for when omitted or not a positive integer)
    #[arg(short = 'n', long, value_name = "N", allow_hyphen_values = true)]
    input_buffer: Option<String>,

    /// Output buffer capacity (prompted for when omitted or not a positive integer)
    #[arg(short = 'm', long, value_name = "M", allow_hyphen_values = true)]
    output_buffer: Option<String>,

    /// Initial cipher key (letters are rotated by this amount)
    #[arg(short, long, default_value_t = 1)]
    key: u8,

    /// Reset the counters and rotate the key every MS milliseconds
    #[arg(long, value_name = "MS")]
    reset_every: Option<u64>,

    /// Amount added to the key at each reset
    #[arg(long, default_value_t = 1)]
    key_step: u8,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let source = File::open(&cli.input)
        .with_context(|| format!("failed to open input file '{}'", cli.input.display()))?;
    let sink = File::create(&cli.output)
        .with_context(|| format!("failed to create output file '{}'", cli.output.display()))?;
    let log = File::options()
        .create(true)
        .append(true)
        .open(&cli.log)
        .with_context(|| format!("failed to open log file '{}'", cli.log.display()))?;

    let stdin = io::stdin();
    let mut prompt_in = stdin.lock();
    let mut prompt_out = io::stdout();
    let input_capacity = capacity_or_prompt(
        cli.input_buffer.as_deref(),
        "input",
        &mut prompt_in,
        &mut prompt_out,
    )?;
    let output_capacity = capacity_or_prompt(
        cli.output_buffer.as_deref(),
        "output",
        &mut prompt_in,
        &mut prompt_out,
    )?;
    drop(prompt_in);

    let cipher = Arc::new(ShiftCipher::new(cli.key));
    let running = PipelineBuilder::new()
        .input_capacity(input_capacity.get())
        .output_capacity(output_capacity.get())
        .build()?
        .start(
            ReaderSource::new(source),
            cipher.clone(),
            WriterSink::new(sink),
            WriterLog::new(log),
        )?;

    let trigger = match cli.reset_every {
        Some(ms) => {
            let cipher = Arc::clone(&cipher);
            let step = cli.key_step;
            Some(ResetTrigger::spawn(
                running.coordinator(),
                Duration::from_millis(ms.max(1)),
                move |snapshot| {
                    let key = cipher.rotate(step);
                    info!("Reset #{} done, new key {}", snapshot.sequence, key);
                },
            )?)
        }
        None => None,
    };

    let report = running.wait().context("pipeline failed")?;
    if let Some(trigger) = trigger {
        trigger.stop()?;
    }

    println!("\nEnd of file reached.");
    println!("{}", report.format());
    io::stdout().flush()?;
    Ok(())
}
