//! End-to-end tests of the action pipeline against on-disk stores.

use benchdb_cli::{execute, Invocation};
use benchdb_core::{BenchmarkResult, Context};
use benchdb_storage::BenchDb;
use std::path::Path;

fn context(toolkit: &str) -> Context {
    Context {
        machine_name: "cuda-box".into(),
        toolkit_version: toolkit.into(),
        commit_hash: "c29c3e359d1d945ef32b6867809a331f460d3e46".into(),
        commit_time: 1_590_007_324,
        branch: "branch-0.14".into(),
        ..Default::default()
    }
}

async fn populate(dir: &Path) {
    let db = BenchDb::open(&dir.to_string_lossy())
        .unwrap()
        .with_repo("https://github.com/rapidsai/cugraph")
        .with_branches(["branch-0.14"]);
    for (toolkit, scale) in [("9.2", 1.0), ("10.1", 2.0)] {
        db.add_results(
            &context(toolkit),
            [
                BenchmarkResult::new("bfs", 0.5 * scale).with_arg("dataset", "karate.csv"),
                BenchmarkResult::new("bfs", 1.5 * scale).with_arg("dataset", "dolphins.csv"),
                BenchmarkResult::new("pagerank", 3.0 * scale).with_arg("dataset", "dolphins.csv"),
            ],
        )
        .await
        .unwrap();
    }
}

async fn run(args: &[&str]) -> anyhow::Result<String> {
    let mut argv = vec!["benchdb"];
    argv.extend_from_slice(args);
    let invocation = Invocation::try_parse_from(argv)?;
    let mut out = Vec::<u8>::new();
    execute(invocation, &mut out).await?;
    Ok(String::from_utf8(out)?)
}

#[tokio::test]
async fn test_print_every_row() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path()).await;
    let store = dir.path().to_string_lossy().into_owned();

    let out = run(&["--read-from", store.as_str(), "--print", "toolkit_version, name, arg('dataset'), value"])
        .await
        .unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "9.2 bfs karate.csv 0.5",
            "9.2 bfs dolphins.csv 1.5",
            "9.2 pagerank dolphins.csv 3",
            "10.1 bfs karate.csv 1",
            "10.1 bfs dolphins.csv 3",
            "10.1 pagerank dolphins.csv 6",
        ]
    );
}

#[tokio::test]
async fn test_actions_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path()).await;
    let store = dir.path().to_string_lossy().into_owned();

    let out = run(&[
        "--read-from",
        store.as_str(),
        "--exec-once",
        "limit = 2",
        "--filter",
        "name == 'bfs' and value < limit",
        "--print",
        "value",
        "--exec",
        "value = value * 10",
        "--print",
        "value",
    ])
    .await
    .unwrap();
    assert_eq!(out, "0.5\n1.5\n1\n5\n15\n10\n");
}

#[tokio::test]
async fn test_write_to_new_store() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let dest = dir.path().join("dest");
    populate(&source).await;

    run(&[
        "--read-from",
        source.to_str().unwrap(),
        "--filter",
        "toolkit_version == '10.1'",
        "--exec",
        "commit_hash = 'abcdef0123456789'",
        "--write-to",
        dest.to_str().unwrap(),
    ])
    .await
    .unwrap();

    let mut written = BenchDb::open(&dest.to_string_lossy()).unwrap();
    let config = written.load_configuration().await.unwrap();
    assert_eq!(config.repo.as_deref(), Some("https://github.com/rapidsai/cugraph.git"));
    assert_eq!(config.branches, ["branch-0.14"]);

    let buckets = written.get(None).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].context.toolkit_version, "10.1");
    assert_eq!(buckets[0].context.commit_hash, "abcdef0123456789");
    assert_eq!(buckets[0].results.len(), 3);

    // The source is untouched.
    let original = BenchDb::open(&source.to_string_lossy()).unwrap();
    assert_eq!(original.get(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_summary_of_filtered_rows() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path()).await;
    let store = dir.path().to_string_lossy().into_owned();

    let out = run(&["--read-from", store.as_str(), "--filter", "name == 'pagerank'", "--summary"])
        .await
        .unwrap();
    assert!(out.contains("| pagerank | dataset=dolphins.csv | cuda-box | c29c3e35 | 3 |"));
    assert!(out.contains("Total results: 2"));
    assert!(out.contains("Distinct contexts: 2"));
}

#[tokio::test]
async fn test_list_benchmarks() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path()).await;
    let store = dir.path().to_string_lossy().into_owned();

    let out = run(&["--read-from", store.as_str(), "--list-benchmarks"]).await.unwrap();
    assert_eq!(
        out,
        "bfs dataset=[karate.csv, dolphins.csv]\npagerank dataset=[dolphins.csv]\n"
    );
}

#[tokio::test]
async fn test_list_keys_needs_no_store() {
    let out = run(&["--list-keys"]).await.unwrap();
    let keys: Vec<&str> = out.lines().collect();
    assert!(keys.contains(&"machine_name"));
    assert!(keys.contains(&"commit_time"));
    assert!(keys.contains(&"value"));
}

#[tokio::test]
async fn test_read_from_is_required() {
    let err = run(&["--print", "name"]).await.unwrap_err();
    assert!(err.to_string().contains("--read-from"));
}

#[tokio::test]
async fn test_invalid_expression_is_rejected_before_reading() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("never-created");

    let err = run(&["--read-from", store.to_str().unwrap(), "--filter", "name =="])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--filter"));
    assert!(!store.exists());
}

#[tokio::test]
async fn test_missing_store_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("empty");

    let err = run(&["--read-from", store.to_str().unwrap(), "--print", "name"])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot read store"));
}
