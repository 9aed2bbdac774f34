use std::collections::BTreeSet;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::Context as _;
use color_eyre::Result;
use nbcache::exec::{Cancellation, Filter, Pipeline, PipelineConfig, SandboxMode, Scheduling};
use nbcache::executor::StubExecutor;
use nbcache::FingerprintSelectors;
use tracing::instrument;

use crate::cachedir;

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Only execute these notebook uris (as passed to `project add`).
    /// Defaults to every outdated notebook in the project.
    uris: Vec<String>,

    /// Run notebooks concurrently instead of one at a time, using one
    /// worker per available CPU unless overridden.
    #[arg(long)]
    parallel: bool,

    /// Worker count for `--parallel`; defaults to the number of CPUs.
    #[arg(long, requires = "parallel")]
    workers: Option<usize>,

    /// Execute notebooks in their own directory instead of a scratch copy.
    /// Disables artifact capture.
    #[arg(long)]
    in_place: bool,

    /// Per-notebook timeout, in seconds, unless overridden by the
    /// notebook's own `execution.timeout` metadata.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Keep going past a cell error instead of stopping the notebook,
    /// unless overridden by the notebook's own `execution.allow_errors`.
    #[arg(long)]
    allow_errors: bool,
}

#[instrument]
pub fn exec(options: Options) -> Result<()> {
    let root = cachedir::resolve_cache_root()?;
    let (cache, index, readers) = cachedir::open_cache(&root).context("open cache")?;

    // No kernel-execution backend ships with this crate (see
    // `nbcache::executor`); the stub executor stands in so the pipeline has
    // something to drive. A real deployment would inject its own
    // `Executor` here.
    let executor = StubExecutor;

    let config = PipelineConfig {
        timeout: Duration::from_secs(options.timeout_secs),
        allow_errors: options.allow_errors,
        scheduling: if options.parallel {
            Scheduling::Parallel { workers: options.workers.unwrap_or_else(num_cpus::get) }
        } else {
            Scheduling::Serial
        },
        sandbox: if options.in_place { SandboxMode::InPlace } else { SandboxMode::TempDir },
        filter: if options.uris.is_empty() { Filter::All } else { Filter::Uris(options.uris.into_iter().collect::<BTreeSet<_>>()) },
        selectors: FingerprintSelectors::default(),
    };

    let pipeline = Pipeline::new(&index, &readers, &cache, &executor);
    let cancel = Cancellation::new();
    let result = pipeline.run(&config, &cancel).context("run execution pipeline")?;

    println!("succeeded: {}", result.succeeded.len());
    for uri in &result.succeeded {
        println!("  ok      {uri}");
    }
    for uri in &result.excepted {
        println!("  excepted {uri}");
    }
    for uri in &result.errored {
        println!("  errored  {uri}");
    }

    if !result.errored.is_empty() {
        color_eyre::eyre::bail!("{} notebook(s) failed to execute", result.errored.len());
    }
    Ok(())
}
