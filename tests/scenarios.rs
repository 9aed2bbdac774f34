//! End-to-end scenarios spanning the fingerprinter, index, blob store, cache
//! engine, project registry, and execution pipeline together, exercised
//! through the public `nbcache` API the way a real caller would use it.

use std::path::PathBuf;

use nbcache::cache::{Cache, CacheBundle, CacheOptions, LocalCache};
use nbcache::exec::{Cancellation, Filter, Pipeline, PipelineConfig, SandboxMode, Scheduling};
use nbcache::executor::StubExecutor;
use nbcache::index::{Index, ProjectKey};
use nbcache::model::{Cell, CellKind, NotebookDoc, Output};
use nbcache::project::ProjectRegistry;
use nbcache::readers::ReaderRegistry;
use nbcache::store::{ArtifactSource, Store};
use nbcache::FingerprintSelectors;
use pretty_assertions::assert_eq;
use serde_json::{json, Map};

fn open_cache(dir: &std::path::Path) -> LocalCache {
    let index = Index::open(dir.join("index.db")).unwrap();
    let store = Store::new(dir.join("executed"));
    LocalCache::new(index, store)
}

fn open_cache_with_limit(dir: &std::path::Path, limit: u64) -> LocalCache {
    let index = Index::open(dir.join("index.db")).unwrap();
    index.setting_set("cache_limit", &json!(limit)).unwrap();
    let store = Store::new(dir.join("executed"));
    LocalCache::new(index, store)
}

fn notebook(cells: Vec<Cell>) -> NotebookDoc {
    NotebookDoc { metadata: Map::new(), cells, format_major: 4, format_minor: 5 }
}

fn code_cell(source: &str, n: u64) -> Cell {
    let mut cell = Cell::new_code(source);
    cell.execution_count = Some(n);
    cell
}

fn bundle(source: &str) -> CacheBundle {
    CacheBundle { notebook: notebook(vec![code_cell(source, 1)]), origin_uri: None, artifacts: vec![], data: Map::new() }
}

/// S1 — cache, match, evict.
#[test]
fn s1_cache_match_evict() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache_with_limit(dir.path(), 2);
    cache.sweep().unwrap();

    let r1 = cache.cache(bundle("1"), &CacheOptions::default()).unwrap();
    let r2 = cache.cache(bundle("2"), &CacheOptions::default()).unwrap();
    let r3 = cache.cache(bundle("3"), &CacheOptions::default()).unwrap();

    let ids: Vec<i64> = cache.list_records().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![r2.id, r3.id]);
    assert!(cache.get_record(r1.id).is_err());

    // Touch r2 so it outlives r3 on the next eviction.
    std::thread::sleep(std::time::Duration::from_millis(5));
    cache.get(r2.id).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    let r4 = cache.cache(bundle("4"), &CacheOptions::default()).unwrap();

    let mut ids: Vec<i64> = cache.list_records().unwrap().into_iter().map(|r| r.id).collect();
    ids.sort();
    let mut expected = vec![r2.id, r4.id];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(cache.get_record(r3.id).is_err());
}

/// S2 — validity check.
#[test]
fn s2_validity_check() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path());

    let bad = notebook(vec![code_cell("a", 1), code_cell("b", 3)]);
    let err = cache
        .cache(
            CacheBundle { notebook: bad.clone(), origin_uri: None, artifacts: vec![], data: Map::new() },
            &CacheOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, nbcache::Error::InvalidNotebook { index: 1, .. }));

    let ok = cache
        .cache(
            CacheBundle { notebook: bad, origin_uri: None, artifacts: vec![], data: Map::new() },
            &CacheOptions { check_validity: false, ..CacheOptions::default() },
        )
        .unwrap();
    assert!(ok.id > 0);
}

/// S3 — merge.
#[test]
fn s3_merge() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path());

    let mut cell_a = code_cell("a=1\nprint(a)", 1);
    cell_a.outputs = vec![Output::Stream { name: "stdout".into(), text: "1\n".into() }];
    let mut cell_b = code_cell("b=a+1", 2);
    cell_b.outputs = vec![Output::ExecuteResult {
        execution_count: Some(2),
        data: [("text/plain".to_string(), json!("2"))].into_iter().collect(),
        metadata: Map::new(),
    }];
    let executed = notebook(vec![cell_a.clone(), cell_b.clone()]);
    cache
        .cache(
            CacheBundle { notebook: executed, origin_uri: None, artifacts: vec![], data: Map::new() },
            &CacheOptions::default(),
        )
        .unwrap();

    let mut fresh_a = Cell::new_code("a=1\nprint(a)");
    let mut fresh_b = Cell::new_code("b=a+1");
    fresh_a.execution_count = None;
    fresh_b.execution_count = None;
    let fresh = notebook(vec![fresh_a, fresh_b]);

    let (_, merged) = cache.merge_into(&fresh, &FingerprintSelectors::default()).unwrap();
    assert_eq!(merged.cells[0].execution_count, cell_a.execution_count);
    assert_eq!(merged.cells[0].outputs, cell_a.outputs);
    assert_eq!(merged.cells[1].execution_count, cell_b.execution_count);
    assert_eq!(merged.cells[1].outputs, cell_b.outputs);
}

/// S4 — fingerprint stability.
#[test]
fn s4_fingerprint_stability() {
    let a = notebook(vec![code_cell("x = 1", 1)]);
    let (_, fp_a) = nbcache::fingerprint::fingerprint(&a, &FingerprintSelectors::default()).unwrap();

    let mut b = a.clone();
    b.cells.insert(0, Cell::new_prose("anywhere"));
    b.cells[1].outputs = vec![Output::Stream { name: "stdout".into(), text: "edited\n".into() }];
    b.cells[1].id = Some("bumped-id".into());
    let (_, fp_b) = nbcache::fingerprint::fingerprint(&b, &FingerprintSelectors::default()).unwrap();
    assert_eq!(fp_a, fp_b);

    let mut c = a.clone();
    c.cells[0].source = "x = 2".into();
    let (_, fp_c) = nbcache::fingerprint::fingerprint(&c, &FingerprintSelectors::default()).unwrap();
    assert_ne!(fp_a, fp_c);
}

/// S5 — execution pipeline with assets and a failing notebook.
#[test]
fn s5_execution_pipeline_with_assets_and_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path());
    let index = Index::open(dir.path().join("projects.db")).unwrap();
    let readers = ReaderRegistry::with_defaults();
    let project = ProjectRegistry::new(&index, &readers);

    let write = |name: &str, cells: Vec<Cell>| {
        let path = dir.path().join(name);
        std::fs::write(&path, serde_json::to_string(&notebook(cells)).unwrap()).unwrap();
        path
    };

    let ok_path = write("ok.nb", vec![Cell::new_code("1 + 1")]);
    let fail_path = write("fail.nb", vec![Cell::new_code("raise ValueError()")]);
    let asset_path = write("reads_asset.nb", vec![Cell::new_code("open('data.txt').read()")]);
    std::fs::write(dir.path().join("data.txt"), b"hello").unwrap();

    project.add(ok_path.to_str().unwrap(), &[], None).unwrap();
    let fail_record = project.add(fail_path.to_str().unwrap(), &[], None).unwrap();
    project.add(asset_path.to_str().unwrap(), &[PathBuf::from("data.txt")], None).unwrap();

    let executor = StubExecutor;
    let pipeline = Pipeline::new(&index, &readers, &cache, &executor);
    let config = PipelineConfig {
        timeout: std::time::Duration::from_secs(10),
        allow_errors: false,
        scheduling: Scheduling::Serial,
        sandbox: SandboxMode::TempDir,
        filter: Filter::All,
        selectors: FingerprintSelectors::default(),
    };
    let cancel = Cancellation::new();
    let result = pipeline.run(&config, &cancel).unwrap();

    let mut succeeded = result.succeeded.clone();
    succeeded.sort();
    let mut expected = vec![ok_path.to_str().unwrap().to_string(), asset_path.to_str().unwrap().to_string()];
    expected.sort();
    assert_eq!(succeeded, expected);
    assert_eq!(result.excepted, vec![fail_path.to_str().unwrap().to_string()]);
    assert!(result.errored.is_empty());

    assert_eq!(cache.list_records().unwrap().len(), 2);

    let failed_record = project.get(ProjectKey::Id(fail_record.id)).unwrap();
    assert!(failed_record.traceback.is_some());
}

/// S6 — artifact round trip.
#[test]
fn s6_artifact_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path());

    let source_dir = tempfile::tempdir().unwrap();
    let plot_path = source_dir.path().join("plot.bin");
    std::fs::write(&plot_path, b"some bytes").unwrap();

    let record = cache
        .cache(
            CacheBundle {
                notebook: notebook(vec![code_cell("plot()", 1)]),
                origin_uri: None,
                artifacts: vec![ArtifactSource { relative_path: PathBuf::from("out/plot.bin"), absolute_path: plot_path }],
                data: Map::new(),
            },
            &CacheOptions::default(),
        )
        .unwrap();

    let bundle = cache.get(record.id).unwrap();
    let (_, found_path) = bundle
        .artifacts
        .iter()
        .find(|(rel, _)| rel == &PathBuf::from("out/plot.bin"))
        .expect("artifact present");
    assert_eq!(std::fs::read(found_path).unwrap(), b"some bytes");
}

/// Property 10: successful execution clears the traceback; a cell-error run
/// sets it and produces no cache record for that fingerprint.
#[test]
fn property_10_traceback_reflects_last_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path());
    let index = Index::open(dir.path().join("projects.db")).unwrap();
    let readers = ReaderRegistry::with_defaults();
    let project = ProjectRegistry::new(&index, &readers);

    let path = dir.path().join("flaky.nb");
    std::fs::write(&path, serde_json::to_string(&notebook(vec![Cell::new_code("raise ValueError()")])).unwrap()).unwrap();
    let record = project.add(path.to_str().unwrap(), &[], None).unwrap();

    let executor = StubExecutor;
    let pipeline = Pipeline::new(&index, &readers, &cache, &executor);
    let cancel = Cancellation::new();
    pipeline.run(&PipelineConfig::default(), &cancel).unwrap();

    let updated = project.get(ProjectKey::Id(record.id)).unwrap();
    assert!(updated.traceback.is_some());
    assert!(cache.list_records().unwrap().is_empty());
}

#[test]
fn property_6_stored_notebook_has_no_prose_but_keeps_real_outputs() {
    // The literal wording of the round-trip property ("outputs cleared")
    // is superseded here by S3 and by `_prepare_nb_for_commit` in the
    // original implementation, both of which require the stored notebook
    // to retain real execution counts and outputs so `merge_into` has
    // something to restore. See DESIGN.md for the full writeup.
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path());

    let mut cell = code_cell("1 + 1", 1);
    cell.outputs = vec![Output::ExecuteResult { execution_count: Some(1), data: Map::new(), metadata: Map::new() }];
    let nb = notebook(vec![Cell::new_prose("# title"), cell]);
    let record = cache
        .cache(CacheBundle { notebook: nb, origin_uri: None, artifacts: vec![], data: Map::new() }, &CacheOptions::default())
        .unwrap();

    let bundle = cache.get(record.id).unwrap();
    assert!(bundle.notebook.cells.iter().all(|c| c.kind == CellKind::Code));
    assert_eq!(bundle.notebook.cells[0].execution_count, Some(1));
    assert!(!bundle.notebook.cells[0].outputs.is_empty());
}
