//! Human-readable report output.

use std::io::{self, Write};

use crate::agent::Usage;
use crate::report::{DatasetResults, RunResults};

fn write_usage<W: Write>(out: &mut W, usage: &Usage, indent: &str) -> io::Result<()> {
    writeln!(out, "{indent}Usage:")?;
    writeln!(out, "{indent}  Request tokens: {}", usage.request_tokens)?;
    writeln!(out, "{indent}  Request tokens cost: ${:.8}", usage.request_tokens_cost)?;
    writeln!(out, "{indent}  Cached tokens: {}", usage.cached_tokens)?;
    writeln!(out, "{indent}  Cached tokens cost: ${:.8}", usage.cached_tokens_cost)?;
    writeln!(out, "{indent}  Response tokens: {}", usage.response_tokens)?;
    writeln!(out, "{indent}  Response tokens cost: ${:.8}", usage.response_tokens_cost)?;
    writeln!(out, "{indent}  Total cost: ${:.8}", usage.total_cost())
}

fn sorted(names: &[String]) -> Vec<&str> {
    let mut names: Vec<&str> = names.iter().map(String::as_str).collect();
    names.sort_unstable();
    names
}

fn write_failures<W: Write>(out: &mut W, results: &DatasetResults) -> io::Result<()> {
    if !results.failed_error_counts.is_empty() {
        writeln!(out, "  Error type counts:")?;
        for (class, count) in &results.failed_error_counts {
            writeln!(out, "    {class}: {count}")?;
        }
    }
    if !results.failed.is_empty() {
        writeln!(out, "  Failed evals:\n    {:?}", sorted(&results.failed))?;
    }
    if !results.errored.is_empty() {
        writeln!(out, "  Errored evals:\n    {:?}", sorted(&results.errored))?;
    }
    if !results.expected_errors.is_empty() {
        writeln!(
            out,
            "  Expected errors ({}, not scored):\n    {:?}",
            results.expected_errors.len(),
            sorted(&results.expected_errors)
        )?;
    }
    Ok(())
}

/// Summary printed after one dataset finishes evaluating.
pub fn write_dataset_summary<W: Write>(out: &mut W, results: &DatasetResults) -> io::Result<()> {
    writeln!(
        out,
        "  {:.2} ({}/{})",
        results.pass_rate(),
        results.passing,
        results.total
    )?;
    write_failures(out, results)?;
    writeln!(out, "  Total duration: {:.3} seconds", results.total_duration)?;
    write_usage(out, &results.usage, "  ")
}

/// Overall and per-dataset report for a combined run.
pub fn write_report<W: Write>(out: &mut W, run: &RunResults) -> io::Result<()> {
    let totals = run.totals();
    writeln!(
        out,
        "Overall: {}/{} ({:.2})",
        totals.passing,
        totals.total,
        totals.pass_rate()
    )?;
    writeln!(out, "  Total duration: {:.3}", totals.total_duration)?;
    write_usage(out, &totals.usage, "  ")?;

    for (dataset, results) in &run.results {
        writeln!(out)?;
        writeln!(
            out,
            "{dataset}: {}/{} ({:.2})",
            results.passing,
            results.total,
            results.pass_rate()
        )?;
        writeln!(out, "  Total duration: {:.3}", results.total_duration)?;
        write_usage(out, &results.usage, "  ")?;
        write_failures(out, results)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lists_datasets_in_order() {
        let mut run = RunResults::default();
        run.results.insert(
            "spider".to_string(),
            DatasetResults {
                passing: 1,
                total: 2,
                failed: vec!["b".to_string()],
                ..DatasetResults::default()
            },
        );
        run.results.insert(
            "bird".to_string(),
            DatasetResults {
                passing: 2,
                total: 2,
                ..DatasetResults::default()
            },
        );

        let mut out = Vec::new();
        write_report(&mut out, &run).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Overall: 3/4 (0.75)\n"));
        let bird = text.find("bird: 2/2 (1.00)").unwrap();
        let spider = text.find("spider: 1/2 (0.50)").unwrap();
        assert!(bird < spider);
        assert!(text.contains("  Failed evals:\n    [\"b\"]"));
    }

    #[test]
    fn test_dataset_summary_sorts_names() {
        let results = DatasetResults {
            passing: 0,
            total: 2,
            errored: vec!["z".to_string(), "a".to_string()],
            failed_error_counts: [("AgentFnError".to_string(), 2)].into_iter().collect(),
            ..DatasetResults::default()
        };

        let mut out = Vec::new();
        write_dataset_summary(&mut out, &results).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("  0.00 (0/2)\n"));
        assert!(text.contains("    AgentFnError: 2"));
        assert!(text.contains("[\"a\", \"z\"]"));
    }

    #[test]
    fn test_expected_errors_are_listed_apart() {
        let results = DatasetResults {
            passing: 1,
            total: 1,
            expected_errors: vec!["broken".to_string()],
            ..DatasetResults::default()
        };

        let mut out = Vec::new();
        write_dataset_summary(&mut out, &results).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("  1.00 (1/1)\n"));
        assert!(text.contains("  Expected errors (1, not scored):\n    [\"broken\"]"));
        assert!(!text.contains("Errored evals"));
    }
}
