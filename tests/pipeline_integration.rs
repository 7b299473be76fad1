//! Integration tests for the resolution pipeline.
//!
//! Exercises ordering, duplicates, retries, fatal aborts, cancellation,
//! resume and the cache through the public API with scripted sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scopus_resolver_core::cache::ResultCache;
use scopus_resolver_core::input::SearchMode;
use scopus_resolver_core::pipeline::{
    CheckpointError, DEFAULT_PACING, DEFAULT_WORKERS, Outcome, Pipeline, PipelineConfig,
    PipelineError, ResolutionResult, RetryPolicy, RunReport, SourceUsed,
};
use scopus_resolver_core::source::SourceError;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

mod support;
use support::mock_source::{MockSource, Reply};

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| (*s).to_string()).collect()
}

fn config(mode: SearchMode, checkpoint: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(mode, checkpoint);
    config.pacing = Duration::ZERO;
    config.retry = RetryPolicy::default().without_jitter();
    config
}

fn pipeline(config: PipelineConfig, primary: &Arc<MockSource>, fallback: &Arc<MockSource>) -> Pipeline {
    Pipeline::new(config, primary.clone(), fallback.clone())
}

fn checkpoint_path(dir: &TempDir) -> PathBuf {
    dir.path().join("checkpoint.json")
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn indices(results: &[ResolutionResult]) -> Vec<usize> {
    results.iter().map(|r| r.item_index).collect()
}

fn summary(report: &RunReport) -> Vec<(usize, Outcome, Option<String>)> {
    report
        .results
        .iter()
        .map(|r| (r.item_index, r.outcome, r.resolved_id.clone()))
        .collect()
}

// ==================== Ordering Tests ====================

#[tokio::test(start_paused = true)]
async fn test_pipeline_releases_results_in_input_order_under_delays() {
    let dir = TempDir::new().unwrap();
    let input = lines(&[
        "10.1000/one",
        "10.1000/two",
        "10.1000/three",
        "10.1000/four",
        "10.1000/five",
    ]);
    // Earlier lines finish last
    let primary = MockSource::primary(Reply::Id("2-s2.0-1"))
        .delay("10.1000/one", Duration::from_millis(500))
        .delay("10.1000/two", Duration::from_millis(400))
        .delay("10.1000/three", Duration::from_millis(300))
        .delay("10.1000/four", Duration::from_millis(200))
        .into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let mut cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    cfg.workers = 5;
    let report = pipeline(cfg, &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(indices(&report.results), vec![1, 2, 3, 4, 5]);
    assert_eq!(report.results[0].query, "10.1000/one");
    assert!(!report.interrupted);
    assert_eq!(report.stats.found, 5);
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_output_identical_across_worker_counts() {
    let input = lines(&["10.1000/a", "10.1000/b", "10.1000/c", "10.1000/d"]);
    let mut outputs = Vec::new();
    for workers in [1, 4] {
        let dir = TempDir::new().unwrap();
        let primary = MockSource::primary(Reply::NotFound)
            .script("10.1000/a", vec![Reply::Id("2-s2.0-A")])
            .script("10.1000/c", vec![Reply::Id("2-s2.0-C")])
            .delay("10.1000/a", Duration::from_millis(300))
            .into_arc();
        let fallback = MockSource::fallback(Reply::NotFound).into_arc();
        let mut cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
        cfg.workers = workers;
        let report = pipeline(cfg, &primary, &fallback)
            .run(&input, &CancellationToken::new())
            .await
            .unwrap();
        outputs.push(summary(&report));
    }
    assert_eq!(outputs[0], outputs[1]);
}

// ==================== Duplicate Tests ====================

#[tokio::test]
async fn test_pipeline_duplicates_reuse_first_outcome() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/ABC", "10.1000/other", "10.1000/abc"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-9")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let report = pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(primary.calls(), 2, "duplicate must not be looked up");
    assert_eq!(indices(&report.results), vec![1, 2, 3]);
    let duplicate = &report.results[2];
    assert_eq!(duplicate.duplicate_of, Some(1));
    assert_eq!(duplicate.resolved_id.as_deref(), Some("2-s2.0-9"));
    assert_eq!(duplicate.attempts, 0);
    assert_eq!(report.input_report.duplicates.len(), 1);
}

#[tokio::test]
async fn test_pipeline_skip_duplicates_drops_repeats() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/ABC", "10.1000/abc"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-9")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let mut cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    cfg.skip_duplicates = true;
    let report = pipeline(cfg, &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(indices(&report.results), vec![1]);
    assert!(report.input_report.duplicates_skipped);
}

// ==================== Validation Tests ====================

#[tokio::test]
async fn test_pipeline_invalid_lines_reported_not_resolved() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/ok", "", "doi:garbage"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-1")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let report = pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(primary.queries(), vec!["10.1000/ok".to_string()]);
    assert_eq!(indices(&report.results), vec![1]);
    let invalid: Vec<usize> = report.input_report.invalid.iter().map(|l| l.index).collect();
    assert_eq!(invalid, vec![2, 3]);
}

// ==================== Fallback and Retry Tests ====================

#[tokio::test]
async fn test_pipeline_fallback_only_match_is_partial() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["A study of reproducible research software"]);
    let primary = MockSource::primary(Reply::NotFound).into_arc();
    let fallback = MockSource::fallback(Reply::Meta {
        title: "A Study of Reproducible Research Software",
        doi: "10.1000/xyz",
    })
    .into_arc();

    let report = pipeline(config(SearchMode::Title, &checkpoint_path(&dir)), &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::Found);
    assert_eq!(result.source_used, SourceUsed::Fallback);
    assert!(result.resolved_id.is_none());
    assert_eq!(result.doi.as_deref(), Some("10.1000/xyz"));
    assert_eq!(report.stats.found, 1);
    assert_eq!(report.stats.partial, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_rate_limited_everywhere_ends_in_error_after_six_calls() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/busy"]);
    let primary = MockSource::primary(Reply::RateLimited).into_arc();
    let fallback = MockSource::fallback(Reply::RateLimited).into_arc();

    let started = tokio::time::Instant::now();
    let report = pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::Error);
    assert_eq!(result.attempts, 6);
    assert!(result.error.is_some());
    assert_eq!(primary.calls(), 3);
    assert_eq!(fallback.calls(), 3);
    assert_eq!(report.stats.api_requests, 6);
    // 5s + 10s backoff per source
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_transient_primary_recovers_on_retry() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/flaky"]);
    let primary = MockSource::primary(Reply::NotFound)
        .script(
            "10.1000/flaky",
            vec![Reply::Transient, Reply::Id("2-s2.0-77")],
        )
        .into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let report = pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::Found);
    assert_eq!(result.source_used, SourceUsed::Primary);
    assert_eq!(result.attempts, 2);
    assert_eq!(fallback.calls(), 0);
}

// ==================== Fatal Abort Tests ====================

#[tokio::test(start_paused = true)]
async fn test_pipeline_unauthorized_aborts_and_keeps_released_prefix() {
    let dir = TempDir::new().unwrap();
    let raw: Vec<String> = (1..=20).map(|i| format!("10.1000/item{i}")).collect();
    // Item 4 is still in its fallback lookup when item 5 is rejected
    let primary = MockSource::primary(Reply::Id("2-s2.0-1"))
        .script("10.1000/item4", vec![Reply::NotFound])
        .script("10.1000/item5", vec![Reply::Unauthorized])
        .into_arc();
    let fallback = MockSource::fallback(Reply::NotFound)
        .script(
            "10.1000/item4",
            vec![Reply::Meta {
                title: "Fourth Item",
                doi: "10.1000/item4",
            }],
        )
        .delay("10.1000/item4", Duration::from_secs(2))
        .into_arc();

    let mut cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    cfg.workers = DEFAULT_WORKERS;
    cfg.pacing = DEFAULT_PACING;
    let err = pipeline(cfg, &primary, &fallback)
        .run(&raw, &CancellationToken::new())
        .await
        .unwrap_err();

    let (error, report) = match err {
        PipelineError::Unauthorized { error, report } => (error, report),
        other => panic!("expected unauthorized abort, got {other:?}"),
    };
    assert!(matches!(error, SourceError::Unauthorized { .. }));
    assert_eq!(indices(&report.results), vec![1, 2, 3, 4]);
    assert_eq!(report.results[3].source_used, SourceUsed::Fallback);
    assert_eq!(report.results[3].title.as_deref(), Some("Fourth Item"));
    assert!(report.interrupted);
    assert_eq!(
        fallback.queries(),
        vec!["10.1000/item4".to_string()],
        "only the item ahead of the rejection reaches the fallback"
    );

    let checkpoint = read_json(&checkpoint_path(&dir));
    assert_eq!(checkpoint["last_processed_index"], 4);
    assert_eq!(checkpoint["results"].as_array().unwrap().len(), 4);
    assert_eq!(checkpoint["total_items"], 20);
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn test_pipeline_cancelled_before_start_releases_nothing() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/a", "10.1000/b"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-1")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
        .run(&input, &cancel)
        .await
        .unwrap();

    assert!(report.results.is_empty());
    assert!(report.interrupted);
    assert_eq!(primary.calls(), 0);
    assert!(checkpoint_path(&dir).exists(), "checkpoint flushed on stop");
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_cancel_mid_run_then_resume_matches_uninterrupted_run() {
    let input: Vec<String> = (1..=25).map(|i| format!("10.1000/paper{i}")).collect();
    let make_primary = || {
        let mut source = MockSource::primary(Reply::NotFound);
        for i in (1..=25).filter(|i| i % 3 != 0) {
            source = source.script(&format!("10.1000/paper{i}"), vec![Reply::Id("2-s2.0-9")]);
        }
        source.into_arc()
    };
    let paced = |dir: &TempDir| {
        let mut cfg = config(SearchMode::Doi, &checkpoint_path(dir));
        cfg.pacing = DEFAULT_PACING;
        cfg
    };

    let straight_dir = TempDir::new().unwrap();
    let straight = pipeline(
        paced(&straight_dir),
        &make_primary(),
        &MockSource::fallback(Reply::NotFound).into_arc(),
    )
    .run(&input, &CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(straight.results.len(), 25);

    // Interrupt partway through, as Ctrl+C would
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        trigger.cancel();
    });
    let first = pipeline(
        paced(&dir),
        &make_primary(),
        &MockSource::fallback(Reply::NotFound).into_arc(),
    )
    .run(&input, &cancel)
    .await
    .unwrap();

    let released = first.results.len();
    assert!(first.interrupted);
    assert!(released > 0 && released < 25, "released {released} items");
    assert_eq!(indices(&first.results), (1..=released).collect::<Vec<_>>());
    let checkpoint = read_json(&checkpoint_path(&dir));
    assert_eq!(checkpoint["last_processed_index"], released);
    assert_eq!(checkpoint["results"].as_array().unwrap().len(), released);

    let primary = make_primary();
    let mut resume_cfg = paced(&dir);
    resume_cfg.resume = true;
    let resumed = pipeline(
        resume_cfg,
        &primary,
        &MockSource::fallback(Reply::NotFound).into_arc(),
    )
    .run(&input, &CancellationToken::new())
    .await
    .unwrap();

    assert!(!resumed.interrupted);
    assert_eq!(summary(&resumed), summary(&straight));
    assert_eq!(resumed.stats.total, straight.stats.total);
    assert!(resumed.stats.api_requests < straight.stats.api_requests);
    assert!(
        !primary.queries().contains(&"10.1000/paper1".to_string()),
        "checkpointed items are not looked up again"
    );
}

// ==================== Resume Tests ====================

#[tokio::test]
async fn test_pipeline_resume_matches_uninterrupted_run() {
    let input = lines(&[
        "10.1000/a",
        "10.1000/b",
        "10.1000/A",
        "10.1000/c",
        "10.1000/d",
        "10.1000/e",
    ]);
    let make_primary = || {
        MockSource::primary(Reply::NotFound)
            .script("10.1000/a", vec![Reply::Id("2-s2.0-A")])
            .script("10.1000/d", vec![Reply::Id("2-s2.0-D")])
            .into_arc()
    };

    let straight_dir = TempDir::new().unwrap();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();
    let straight = pipeline(
        config(SearchMode::Doi, &checkpoint_path(&straight_dir)),
        &make_primary(),
        &fallback,
    )
    .run(&input, &CancellationToken::new())
    .await
    .unwrap();

    // First pass stops after two items, second pass resumes
    let dir = TempDir::new().unwrap();
    let primary = make_primary();
    let mut first_cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    first_cfg.limit = Some(2);
    let first = pipeline(first_cfg, &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(indices(&first.results), vec![1, 2]);
    assert_eq!(read_json(&checkpoint_path(&dir))["last_processed_index"], 2);

    let mut resume_cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    resume_cfg.resume = true;
    let resumed = pipeline(resume_cfg, &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary(&resumed), summary(&straight));
    assert_eq!(resumed.results[2].duplicate_of, Some(1));
    assert_eq!(
        primary.queries().iter().filter(|q| q.as_str() == "10.1000/a").count(),
        1,
        "resumed items are not looked up again"
    );
}

#[tokio::test]
async fn test_pipeline_resume_without_checkpoint_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/a"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-1")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let mut cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    cfg.resume = true;
    let report = pipeline(cfg, &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(indices(&report.results), vec![1]);
}

#[tokio::test]
async fn test_pipeline_resume_rejects_mismatched_checkpoint() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/a", "10.1000/b"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-1")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let mut first_cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    first_cfg.limit = Some(1);
    pipeline(first_cfg, &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    // Same file, one more line
    let longer = lines(&["10.1000/a", "10.1000/b", "10.1000/c"]);
    let mut resume_cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    resume_cfg.resume = true;
    let err = pipeline(resume_cfg, &primary, &fallback)
        .run(&longer, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Checkpoint(CheckpointError::Mismatch { .. })
    ));
}

#[tokio::test]
async fn test_pipeline_limit_caps_processed_items() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/a", "10.1000/b", "10.1000/c"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-1")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    let mut cfg = config(SearchMode::Doi, &checkpoint_path(&dir));
    cfg.limit = Some(2);
    let report = pipeline(cfg, &primary, &fallback)
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(indices(&report.results), vec![1, 2]);
    assert_eq!(primary.calls(), 2);
    assert!(!report.interrupted);
}

// ==================== Cache Tests ====================

#[tokio::test]
async fn test_pipeline_warm_cache_makes_no_network_calls() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("cache.json");
    let input = lines(&["10.1000/a", "10.1000/b"]);

    let primary = MockSource::primary(Reply::Id("2-s2.0-1")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();
    let cold = pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
        .with_cache(Some(Arc::new(ResultCache::open(&cache_path))))
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(primary.calls(), 2);

    let primary = MockSource::primary(Reply::Transient).into_arc();
    let fallback = MockSource::fallback(Reply::Transient).into_arc();
    let warm = pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
        .with_cache(Some(Arc::new(ResultCache::open(&cache_path))))
        .run(&input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(primary.calls() + fallback.calls(), 0);
    assert_eq!(warm.stats.cache_hits, 2);
    assert_eq!(warm.stats.api_requests, 0);
    assert!(warm.results.iter().all(|r| r.source_used == SourceUsed::Cache));
    let ids = |report: &RunReport| -> Vec<Option<String>> {
        report.results.iter().map(|r| r.resolved_id.clone()).collect()
    };
    assert_eq!(ids(&cold), ids(&warm));
}

#[tokio::test]
async fn test_pipeline_without_cache_always_queries() {
    let dir = TempDir::new().unwrap();
    let input = lines(&["10.1000/a"]);
    let primary = MockSource::primary(Reply::Id("2-s2.0-1")).into_arc();
    let fallback = MockSource::fallback(Reply::NotFound).into_arc();

    for _ in 0..2 {
        pipeline(config(SearchMode::Doi, &checkpoint_path(&dir)), &primary, &fallback)
            .with_cache(None)
            .run(&input, &CancellationToken::new())
            .await
            .unwrap();
    }
    assert_eq!(primary.calls(), 2);
}
