//! Result and validation report files written by the binary.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use scopus_resolver_core::input::{InputReport, SearchMode};
use scopus_resolver_core::pipeline::{ResolutionResult, RunReport, RunStats};

/// File name of the validation report, placed next to the results file.
pub const VALIDATION_REPORT_FILE: &str = "validation_report.txt";

/// Longest raw line echoed into the validation report.
const REPORT_LINE_PREVIEW: usize = 100;

#[derive(Serialize)]
struct ResultsFile<'a> {
    search_mode: SearchMode,
    generated_at: DateTime<Utc>,
    interrupted: bool,
    stats: RunStats,
    results: &'a [ResolutionResult],
}

/// Writes the ordered results and stats as pretty JSON.
pub fn write_results(path: &Path, mode: SearchMode, report: &RunReport) -> Result<()> {
    let file = ResultsFile {
        search_mode: mode,
        generated_at: Utc::now(),
        interrupted: report.interrupted,
        stats: report.stats,
        results: &report.results,
    };
    let mut body = serde_json::to_string_pretty(&file).context("Failed to serialize results")?;
    body.push('\n');
    ensure_parent(path)?;
    fs::write(path, body)
        .with_context(|| format!("Failed to write results file '{}'", path.display()))
}

/// Path of the validation report for a given results path.
#[must_use]
pub fn validation_report_path(output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(VALIDATION_REPORT_FILE),
        _ => PathBuf::from(VALIDATION_REPORT_FILE),
    }
}

/// Writes the validation report when anything was rejected or folded.
///
/// Returns the path written, or `None` when the input was clean.
pub fn write_validation_report(
    output: &Path,
    mode: SearchMode,
    report: &InputReport,
) -> Result<Option<PathBuf>> {
    if !report.has_issues() {
        return Ok(None);
    }
    let path = validation_report_path(output);
    ensure_parent(&path)?;
    fs::write(&path, render_validation_report(mode, report, Utc::now()))
        .with_context(|| format!("Failed to write validation report '{}'", path.display()))?;
    Ok(Some(path))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
    }
    Ok(())
}

fn render_validation_report(
    mode: SearchMode,
    report: &InputReport,
    generated_at: DateTime<Utc>,
) -> String {
    let rule = "=".repeat(60);
    let thin = "-".repeat(60);
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "VALIDATION REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Search mode: {}", mode.as_str().to_uppercase());
    let _ = writeln!(out, "Timestamp: {}", generated_at.to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(out, "Total items: {}", report.total);
    let _ = writeln!(out, "Valid items: {}", report.valid);
    let _ = writeln!(out, "Invalid items: {}", report.invalid.len());
    let _ = writeln!(out, "Unique items: {}", report.unique());
    let _ = writeln!(out, "Duplicates: {}", report.duplicates.len());
    let _ = writeln!(out);

    if !report.invalid.is_empty() {
        let _ = writeln!(out, "INVALID ITEMS:");
        let _ = writeln!(out, "{thin}");
        for line in &report.invalid {
            let _ = writeln!(out, "Line {}: {}", line.index, line.reason);
            let _ = writeln!(out, "  -> {}", preview(&line.raw));
            let _ = writeln!(out);
        }
    }

    if !report.duplicates.is_empty() {
        let _ = writeln!(out, "DUPLICATE ITEMS:");
        let _ = writeln!(out, "{thin}");
        for line in &report.duplicates {
            let _ = writeln!(
                out,
                "Line {} (duplicate of line {}): {}",
                line.index,
                line.first_seen,
                preview(&line.raw)
            );
        }
    }
    out
}

fn preview(raw: &str) -> String {
    raw.trim().chars().take(REPORT_LINE_PREVIEW).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopus_resolver_core::input::prepare_items;
    use scopus_resolver_core::pipeline::{Outcome, SourceUsed};
    use tempfile::TempDir;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_validation_report_path_next_to_output() {
        assert_eq!(
            validation_report_path(Path::new("out/results.json")),
            PathBuf::from("out/validation_report.txt")
        );
        assert_eq!(
            validation_report_path(Path::new("results.json")),
            PathBuf::from(VALIDATION_REPORT_FILE)
        );
    }

    #[test]
    fn test_render_validation_report_lists_invalid_and_duplicates() {
        let input = lines(&["10.1000/abc", "not a doi", "10.1000/ABC"]);
        let (_, report) = prepare_items(&input, SearchMode::Doi, false);
        let text = render_validation_report(SearchMode::Doi, &report, Utc::now());

        assert!(text.contains("Search mode: DOI"));
        assert!(text.contains("Total items: 3"));
        assert!(text.contains("Invalid items: 1"));
        assert!(text.contains("Line 2:"));
        assert!(text.contains("not a doi"));
        assert!(text.contains("Line 3 (duplicate of line 1): 10.1000/ABC"));
    }

    #[test]
    fn test_write_validation_report_skips_clean_input() {
        let dir = TempDir::new().unwrap();
        let input = lines(&["10.1000/abc"]);
        let (_, report) = prepare_items(&input, SearchMode::Doi, false);
        let written =
            write_validation_report(&dir.path().join("r.json"), SearchMode::Doi, &report).unwrap();
        assert!(written.is_none());
        assert!(!dir.path().join(VALIDATION_REPORT_FILE).exists());
    }

    #[test]
    fn test_write_results_produces_ordered_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("results.json");
        let input = lines(&["10.1000/a", "10.1000/b"]);
        let (items, input_report) = prepare_items(&input, SearchMode::Doi, false);
        let results: Vec<ResolutionResult> = items
            .iter()
            .map(|item| ResolutionResult {
                item_index: item.item.index,
                canonical_key: item.key.clone(),
                query: item.item.query().to_string(),
                title: None,
                resolved_id: None,
                doi: None,
                outcome: Outcome::NotFound,
                source_used: SourceUsed::None,
                attempts: 2,
                duplicate_of: None,
                error: None,
            })
            .collect();
        let report = RunReport {
            results,
            stats: RunStats::default(),
            input_report,
            interrupted: false,
        };

        write_results(&path, SearchMode::Doi, &report).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["search_mode"], "doi");
        assert_eq!(parsed["interrupted"], false);
        let results = parsed["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["item_index"], 1);
        assert_eq!(results[1]["query"], "10.1000/b");
        assert_eq!(results[1]["outcome"], "not_found");
    }
}
