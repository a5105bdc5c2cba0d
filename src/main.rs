use anyhow::{Result, bail};
use std::env;
use std::path::PathBuf;
use tracing::info;

use halotrace::config::{TrackerConfig, default_checkpoint_path, parse_snapshot_list};
use halotrace::error::TraceError;
use halotrace::runtime;
use halotrace::tracker::output::sidecar;
use halotrace::tracker::{RunOutcome, Tracker, load_particle_sample};

struct Args {
    catalogue_dir: PathBuf,
    snapshots: Vec<String>,
    sample: PathBuf,
    output: PathBuf,
    fresh: bool,
}

fn usage() -> ! {
    eprintln!(
        "usage: halotrace [--fresh] <catalogue_dir> <snapshots> <sample.npz> <output.npz>\n\
         \n\
         <snapshots>  comma list earliest first, or @file with one label per line\n\
         \n\
         env: HALOTRACE_CHECKPOINT, HALOTRACE_STEM, HALOTRACE_SPECIES,\n\
         \x20    HALOTRACE_HALO_ID_FIELD, HALOTRACE_MASS_FIELD, HALOTRACE_SHARDS,\n\
         \x20    HALOTRACE_PROGRESS, HALOTRACE_THREADS, HALOTRACE_MAX_RSS_{{BYTES,MB,GB}}"
    );
    std::process::exit(1);
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1).peekable();
    let fresh = args.next_if(|a| a == "--fresh").is_some();
    let mut next = || args.next().unwrap_or_else(|| usage());

    let catalogue_dir = PathBuf::from(next());
    let snapshots = parse_snapshot_list(&next())?;
    let sample = PathBuf::from(next());
    let output = PathBuf::from(next());
    if !sample.exists() {
        bail!("sample {:?} does not exist", sample);
    }
    Ok(Args {
        catalogue_dir,
        snapshots,
        sample,
        output,
        fresh,
    })
}

fn main() -> Result<()> {
    runtime::init_logging();
    runtime::configure_thread_pool();

    let args = parse_args()?;
    let cfg = TrackerConfig::new(
        &args.catalogue_dir,
        args.snapshots,
        default_checkpoint_path(&args.output),
    )
    .with_env()?;

    let particle_ids = load_particle_sample(&args.sample)?;
    info!(
        "[start] {} particles, {} snapshots ({} .. {}), species {}",
        particle_ids.len(),
        cfg.snapshots.len(),
        cfg.snapshots.first().map(String::as_str).unwrap_or("-"),
        cfg.snapshots.last().map(String::as_str).unwrap_or("-"),
        cfg.species.map(|s| s.name()).unwrap_or("all")
    );

    let mut tracker = if args.fresh {
        Tracker::new(cfg.snapshots.clone(), particle_ids, cfg.tracker_options())?
    } else {
        Tracker::open(cfg.snapshots.clone(), particle_ids, cfg.tracker_options())?
    };
    let mut source = cfg.source();
    let cancel = runtime::install_cancel_flag()?;

    match tracker.run(&mut source, &cancel)? {
        RunOutcome::Done(output) => {
            output.save(&args.output)?;
            tracker
                .summary()
                .save(&sidecar(&args.output, "summary.json"))?;
            info!("[done] results written to {}", args.output.display());
            Ok(())
        }
        RunOutcome::Cancelled { next_snapshot } => Err(TraceError::Cancelled {
            next_snapshot: cfg.snapshots[next_snapshot].clone(),
        }
        .into()),
    }
}
