//! Process-level plumbing: worker pool sizing, log setup, memory budget and
//! cancellation.

use anyhow::{Result, bail};
use rayon::ThreadPoolBuilder;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Once};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Variables consulted for the worker count, most specific first. Batch
/// schedulers export their allocation in the SLURM/PBS ones.
const THREAD_HINTS: [&str; 6] = [
    "HALOTRACE_THREADS",
    "RAYON_NUM_THREADS",
    "SLURM_CPUS_PER_TASK",
    "SLURM_CPUS_ON_NODE",
    "PBS_NP",
    "OMP_NUM_THREADS",
];

/// Size of the rayon pool and the variable it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCount {
    pub threads: usize,
    pub hint: &'static str,
}

impl WorkerCount {
    /// First positive integer among [`THREAD_HINTS`], else the machine's
    /// available parallelism.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        THREAD_HINTS
            .iter()
            .find_map(|&key| {
                let n = lookup(key)?.trim().parse::<usize>().ok()?;
                (n > 0).then_some(WorkerCount { threads: n, hint: key })
            })
            .unwrap_or_else(|| WorkerCount {
                threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
                hint: "available_parallelism",
            })
    }
}

pub fn configure_thread_pool() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let count = WorkerCount::from_vars(|k| std::env::var(k).ok());
        let built = ThreadPoolBuilder::new()
            .num_threads(count.threads)
            .thread_name(|i| format!("halotrace-worker-{i}"))
            .build_global();
        match built {
            Ok(()) => info!("[threads] {} workers ({})", count.threads, count.hint),
            Err(err) => warn!("[threads] keeping the default rayon pool: {err}"),
        }
    });
}

/// Installs the stderr subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;

fn gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Resident memory the sweep may reach before it stops itself. Checked after
/// each snapshot's checkpoint is on disk, so stopping loses no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryBudget {
    pub limit_bytes: Option<u64>,
}

impl MemoryBudget {
    pub const UNLIMITED: MemoryBudget = MemoryBudget { limit_bytes: None };

    pub fn bytes(limit: u64) -> Self {
        MemoryBudget {
            limit_bytes: Some(limit),
        }
    }

    /// `HALOTRACE_MAX_RSS_BYTES`, `_MB` or `_GB`; the first one set wins.
    /// Unparseable values are ignored with a warning.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let limit = [
            ("HALOTRACE_MAX_RSS_BYTES", 1),
            ("HALOTRACE_MAX_RSS_MB", MIB),
            ("HALOTRACE_MAX_RSS_GB", GIB),
        ]
        .into_iter()
        .find_map(|(key, unit)| {
            let raw = lookup(key).filter(|v| !v.trim().is_empty())?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v.saturating_mul(unit)),
                Err(_) => {
                    warn!("[mem] ignoring {key}={raw:?}: not a whole number");
                    None
                }
            }
        });
        MemoryBudget { limit_bytes: limit }
    }

    pub fn from_env() -> Self {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    /// Logs the resident set after `label` and fails once it passes the limit.
    pub fn check(&self, label: &str) -> Result<()> {
        let Some(rss) = current_rss_bytes() else {
            return Ok(());
        };
        info!("[mem] snapshot={label} rss={:.2} GiB{self}", gib(rss));
        if let Some(limit) = self.limit_bytes.filter(|&l| rss > l) {
            bail!(
                "resident memory {:.2} GiB passed the {:.2} GiB limit after snapshot {label}",
                gib(rss),
                gib(limit)
            );
        }
        Ok(())
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit_bytes {
            Some(limit) => write!(f, " (limit {:.2} GiB)", gib(limit)),
            None => Ok(()),
        }
    }
}

/// Resident set size from `/proc/self/statm`; `None` off Linux.
pub fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(page_size)
        .ok()
        .filter(|&p| p > 0)
        .map(|p| resident_pages.saturating_mul(p))
}

/// A flag raised by SIGINT or SIGTERM. The tracker polls it between
/// snapshots, after the checkpoint has been written.
pub fn install_cancel_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&flag))?;
    }
    Ok(flag)
}
