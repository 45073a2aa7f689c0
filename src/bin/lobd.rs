//! Pipeline entry point: replay a binary command file through per-symbol
//! matching engines and write the trade / book-update logs.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use lobcore::config::PipelineConfig;
use lobcore::pipeline;

#[derive(Parser, Debug)]
#[command(name = "lobd", about = "Sharded limit-order matching engine")]
struct Args {
    /// TOML config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input binary order file.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output directory for the binary logs.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Comma-separated symbols (e.g. BTC,ETH); position is symbol_id.
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Price band as min:max ticks for the dense level store.
    #[arg(long)]
    price_band: Option<String>,

    /// Comma-separated CPU cores: feed, one per engine, publisher.
    #[arg(long, value_delimiter = ',')]
    cpu_cores: Vec<usize>,

    /// Command/event ring size (power of two).
    #[arg(long)]
    queue_capacity: Option<usize>,
}

fn parse_band(s: &str) -> Result<(i64, i64)> {
    let Some((lo, hi)) = s.split_once(':') else {
        bail!("price band must be min:max, got {s:?}");
    };
    Ok((
        lo.trim().parse().context("price band min")?,
        hi.trim().parse().context("price band max")?,
    ))
}

fn build_config(args: Args) -> Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => {
            let Some(input) = args.input.clone() else {
                bail!("--input is required without --config");
            };
            if args.symbols.is_empty() {
                bail!("--symbols is required without --config");
            }
            PipelineConfig {
                input,
                output: PathBuf::from("results"),
                symbols: args.symbols.clone(),
                min_tick: 1,
                max_tick: 100_000,
                cpu_cores: None,
                queue_capacity: 65_536,
                spin_loops_per_yield: 64,
            }
        }
    };

    if let Some(input) = args.input {
        cfg.input = input;
    }
    if let Some(output) = args.output {
        cfg.output = output;
    }
    if !args.symbols.is_empty() {
        cfg.symbols = args.symbols;
    }
    if let Some(band) = args.price_band.as_deref() {
        let (lo, hi) = parse_band(band)?;
        cfg.min_tick = lo;
        cfg.max_tick = hi;
    }
    if !args.cpu_cores.is_empty() {
        cfg.cpu_cores = Some(args.cpu_cores);
    }
    if let Some(capacity) = args.queue_capacity {
        cfg.queue_capacity = capacity;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = build_config(Args::parse())?;
    info!(
        "replaying {} for {} symbols into {}",
        cfg.input.display(),
        cfg.symbols.len(),
        cfg.output.display()
    );

    let report = pipeline::run(&cfg)?;
    info!(
        "{} commands -> {} trades, {} book updates",
        report.commands, report.trades, report.book_updates
    );
    Ok(())
}
