//! C6 — Execution pipeline.
//!
//! Walks a project's notebooks, finds the ones with no matching cache entry,
//! runs each through an [`Executor`](crate::executor::Executor), and commits
//! the result. Grounded on `jupyter_cache/executors/base.py::JupyterExecutorAbstract.run`
//! for the overall select-clear-run-record loop and three-way outcome
//! classification (`ExecutorRunResult.succeeded` / `.excepted` / `.errored`);
//! the worker-pool concurrency shape for parallel scheduling is grounded on
//! `cargo::cache::restore::restore_units`'s `flume::unbounded` channel plus a
//! fixed pool of `num_cpus::get()` workers, adapted from that module's
//! `tokio::task::JoinSet` to plain `std::thread::scope` threads since the
//! rest of this crate's storage layer is synchronous.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::cache::{Cache, CacheBundle, CacheOptions};
use crate::error::Result;
use crate::executor::Executor;
use crate::fingerprint::FingerprintSelectors;
use crate::fs_util::validate_asset_path;
use crate::index::{Index, ProjectRecord};
use crate::model::NotebookDoc;
use crate::project::ProjectRegistry;
use crate::store::ArtifactSource;

/// Which of a project's outdated notebooks a run should cover.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    All,
    Uris(BTreeSet<String>),
    Ids(BTreeSet<i64>),
}

impl Filter {
    fn matches(&self, record: &ProjectRecord) -> bool {
        match self {
            Filter::All => true,
            Filter::Uris(uris) => uris.contains(&record.uri),
            Filter::Ids(ids) => ids.contains(&record.id),
        }
    }
}

/// How outdated notebooks are scheduled across the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheduling {
    Serial,
    /// Run up to `workers` notebooks concurrently. A `workers` of 0 is
    /// treated as 1.
    Parallel { workers: usize },
}

/// Where a notebook's code actually runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxMode {
    /// Execute with `cwd` set to the notebook's own directory; whatever
    /// files the code happens to read or write are touched in place.
    /// Because there's no isolated directory to diff against, in-place runs
    /// never collect artifacts.
    InPlace,
    /// Copy the project record's declared assets into a fresh temporary
    /// directory, execute there, and collect every file that wasn't one of
    /// the copied assets as an artifact.
    TempDir,
}

/// Tunables for one [`Pipeline::run`] call.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub timeout: Duration,
    pub allow_errors: bool,
    pub scheduling: Scheduling,
    pub sandbox: SandboxMode,
    pub filter: Filter,
    pub selectors: FingerprintSelectors,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            allow_errors: false,
            scheduling: Scheduling::Serial,
            sandbox: SandboxMode::TempDir,
            filter: Filter::All,
            selectors: FingerprintSelectors::default(),
        }
    }
}

/// A best-effort cancellation flag shared between the caller and a running
/// pipeline. Checked between notebooks (and, under parallel scheduling,
/// before each worker picks up its next one); a notebook already being
/// executed runs to completion.
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The three-way outcome of a run, per project URI. Mirrors
/// `ExecutorRunResult`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: Vec<String>,
    pub excepted: Vec<String>,
    pub errored: Vec<String>,
}

impl ExecutionResult {
    fn merge(&mut self, other: ExecutionResult) {
        self.succeeded.extend(other.succeeded);
        self.excepted.extend(other.excepted);
        self.errored.extend(other.errored);
    }
}

/// Drives execution of a project's outdated notebooks against a cache.
pub struct Pipeline<'a> {
    index: &'a Index,
    project: ProjectRegistry<'a>,
    cache: &'a dyn Cache,
    executor: &'a dyn Executor,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        index: &'a Index,
        readers: &'a crate::readers::ReaderRegistry,
        cache: &'a dyn Cache,
        executor: &'a dyn Executor,
    ) -> Self {
        Self { index, project: ProjectRegistry::new(index, readers), cache, executor }
    }

    /// Select outdated notebooks (per `config.filter`), clear their
    /// tracebacks, then execute and cache each, returning the three-way
    /// classification of what happened.
    #[instrument(name = "Pipeline::run", skip(self, config, cancel))]
    pub fn run(&self, config: &PipelineConfig, cancel: &Cancellation) -> Result<ExecutionResult> {
        let records: Vec<ProjectRecord> = self
            .project
            .unexecuted(self.cache, &config.selectors)?
            .into_iter()
            .filter(|r| config.filter.matches(r))
            .collect();

        self.index.clear_tracebacks(&records.iter().map(|r| r.id).collect::<Vec<_>>())?;

        if records.is_empty() {
            return Ok(ExecutionResult::default());
        }

        match config.scheduling {
            Scheduling::Serial => self.run_serial(records, config, cancel),
            Scheduling::Parallel { workers } => self.run_parallel(records, config, cancel, workers.max(1)),
        }
    }

    fn run_serial(&self, records: Vec<ProjectRecord>, config: &PipelineConfig, cancel: &Cancellation) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();
        let cache_lock = Mutex::new(());
        for record in &records {
            if cancel.is_cancelled() {
                info!("execution cancelled, stopping before next notebook");
                break;
            }
            execute_one(self.index, &self.project, self.cache, self.executor, &cache_lock, record, config, &mut result);
        }
        Ok(result)
    }

    fn run_parallel(
        &self,
        records: Vec<ProjectRecord>,
        config: &PipelineConfig,
        cancel: &Cancellation,
        workers: usize,
    ) -> Result<ExecutionResult> {
        let (tx, rx) = flume::unbounded::<ProjectRecord>();
        for record in records {
            tx.send(record).expect("receiver outlives every send in this scope");
        }
        drop(tx);

        let cache_lock = Mutex::new(());
        let result = Mutex::new(ExecutionResult::default());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let cache_lock = &cache_lock;
                let result = &result;
                scope.spawn(move || {
                    while let Ok(record) = rx.recv() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let mut local = ExecutionResult::default();
                        execute_one(self.index, &self.project, self.cache, self.executor, cache_lock, &record, config, &mut local);
                        result.lock().expect("result mutex poisoned").merge(local);
                    }
                });
            }
        });

        Ok(result.into_inner().expect("result mutex poisoned"))
    }
}

/// Execute and cache one project record's notebook, recording the outcome
/// into `result`.
fn execute_one(
    index: &Index,
    project: &ProjectRegistry<'_>,
    cache: &dyn Cache,
    executor: &dyn Executor,
    cache_lock: &Mutex<()>,
    record: &ProjectRecord,
    config: &PipelineConfig,
    result: &mut ExecutionResult,
) {
    let notebook = match project.notebook_of(record) {
        Ok(nb) => nb,
        Err(err) => {
            warn!(uri = %record.uri, error = %err, "failed to read notebook for execution");
            result.errored.push(record.uri.clone());
            return;
        }
    };

    let timeout = effective_timeout(&notebook, config.timeout);
    let allow_errors = effective_allow_errors(&notebook, config.allow_errors);
    let notebook_dir = Path::new(&record.uri).parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    let sandbox = match prepare_sandbox(config.sandbox, &notebook_dir, record) {
        Ok(sandbox) => sandbox,
        Err(err) => {
            warn!(uri = %record.uri, error = %err, "failed to prepare execution sandbox");
            result.errored.push(record.uri.clone());
            return;
        }
    };

    let started = Instant::now();
    let outcome = executor.execute_in_place(&notebook, sandbox.cwd(), timeout, allow_errors);
    let elapsed = started.elapsed();

    match outcome {
        Err(err) => {
            let failure = crate::error::Error::ExecutorFailed { uri: record.uri.clone(), reason: err.to_string() };
            warn!(uri = %record.uri, error = %failure, "executor failed to run notebook");
            result.errored.push(record.uri.clone());
        }
        Ok(outcome) => {
            if let Some(traceback) = outcome.cell_error_traceback {
                if let Err(err) = index.set_traceback(record.id, Some(&traceback)) {
                    warn!(uri = %record.uri, error = %err, "failed to record traceback");
                }
                result.excepted.push(record.uri.clone());
                return;
            }

            let artifacts = sandbox.collect_artifacts();
            let mut data = serde_json::Map::new();
            data.insert("execution_seconds".to_string(), serde_json::Value::from(elapsed.as_secs_f64()));

            let bundle = CacheBundle {
                notebook: outcome.notebook,
                origin_uri: Some(record.uri.clone()),
                artifacts,
                data,
            };
            let options = CacheOptions { overwrite: true, selectors: config.selectors.clone(), ..CacheOptions::default() };

            let _guard = cache_lock.lock().expect("cache mutex poisoned");
            match cache.cache(bundle, &options) {
                Ok(_) => result.succeeded.push(record.uri.clone()),
                Err(err) => {
                    warn!(uri = %record.uri, error = %err, "failed to commit executed notebook to the cache");
                    result.errored.push(record.uri.clone());
                }
            }
        }
    }
}

/// A prepared place for a notebook to run, plus whatever bookkeeping is
/// needed to collect artifacts afterwards.
enum Sandbox {
    InPlace { dir: PathBuf },
    TempDir { dir: tempfile::TempDir, copied: BTreeSet<PathBuf> },
}

impl Sandbox {
    fn cwd(&self) -> &Path {
        match self {
            Sandbox::InPlace { dir } => dir,
            Sandbox::TempDir { dir, .. } => dir.path(),
        }
    }

    fn collect_artifacts(&self) -> Vec<ArtifactSource> {
        match self {
            Sandbox::InPlace { .. } => Vec::new(),
            Sandbox::TempDir { dir, copied } => collect_new_files(dir.path(), copied),
        }
    }
}

fn prepare_sandbox(mode: SandboxMode, notebook_dir: &Path, record: &ProjectRecord) -> Result<Sandbox> {
    match mode {
        SandboxMode::InPlace => Ok(Sandbox::InPlace { dir: notebook_dir.to_path_buf() }),
        SandboxMode::TempDir => {
            let dir = tempfile::tempdir()?;
            let mut copied = BTreeSet::new();
            for asset in &record.assets {
                let source = validate_asset_path(notebook_dir, asset)?;
                let dest = dir.path().join(asset);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&source, &dest)?;
                copied.insert(asset.clone());
            }
            Ok(Sandbox::TempDir { dir, copied })
        }
    }
}

/// Every file under `root` that isn't one of `excluded` (relative paths),
/// as artifact sources ready to hand to [`crate::store::Store::write_artifacts`].
fn collect_new_files(root: &Path, excluded: &BTreeSet<PathBuf>) -> Vec<ArtifactSource> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };
        if excluded.contains(&relative) {
            continue;
        }
        out.push(ArtifactSource { relative_path: relative, absolute_path: entry.path().to_path_buf() });
    }
    out
}

/// `notebook.metadata["execution"]["timeout"]`, in seconds, if present.
fn effective_timeout(notebook: &NotebookDoc, default: Duration) -> Duration {
    notebook
        .metadata
        .get("execution")
        .and_then(|v| v.get("timeout"))
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// `notebook.metadata["execution"]["allow_errors"]`, if present.
fn effective_allow_errors(notebook: &NotebookDoc, default: bool) -> bool {
    notebook
        .metadata
        .get("execution")
        .and_then(|v| v.get("allow_errors"))
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}
