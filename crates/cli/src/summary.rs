//! Markdown report of the final rows.

use crate::row::Row;
use std::fmt::{self, Write};

const ARGS_WIDTH: usize = 50;

/// Generate a markdown summary of `rows`.
pub fn generate_summary(rows: &[Row]) -> String {
    let mut output = String::new();
    // Writing into a String cannot fail.
    let _ = write_summary(&mut output, rows);
    output
}

fn write_summary(output: &mut String, rows: &[Row]) -> fmt::Result {
    writeln!(output, "# Benchmark Summary")?;
    writeln!(output)?;
    writeln!(output, "Generated: {}", chrono::Utc::now().to_rfc3339())?;
    writeln!(output)?;
    writeln!(output, "## Results")?;
    writeln!(output)?;
    writeln!(output, "| Benchmark | Arguments | Machine | Commit | Value |")?;
    writeln!(output, "|-----------|-----------|---------|--------|-------|")?;

    let mut contexts = Vec::new();
    for row in rows {
        if !contexts.contains(&&row.context) {
            contexts.push(&row.context);
        }

        let args = row
            .result
            .args
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        let args = if args.chars().count() > ARGS_WIDTH {
            let short: String = args.chars().take(ARGS_WIDTH - 3).collect();
            format!("{short}...")
        } else {
            args
        };
        let value = row
            .result
            .value
            .map_or_else(|| "-".to_string(), |v| v.to_string());

        writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            row.result.name,
            args,
            row.context.machine_name,
            row.context.short_commit(),
            value
        )?;
    }

    writeln!(output)?;
    writeln!(output, "---")?;
    writeln!(output, "Total results: {}", rows.len())?;
    writeln!(output, "Distinct contexts: {}", contexts.len())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchdb_core::{BenchmarkResult, Context};

    #[test]
    fn test_summary_table() {
        let ctx = Context {
            machine_name: "gpu-box".into(),
            commit_hash: "809a1569e8a2ff138cdde4d9c282328be9dcad43".into(),
            ..Default::default()
        };
        let rows = vec![
            Row::new(
                ctx.clone(),
                BenchmarkResult::new("bfs", 0.5).with_arg("dataset", "karate.csv"),
            ),
            Row::new(ctx, BenchmarkResult::new("pagerank", None::<f64>)),
        ];

        let summary = generate_summary(&rows);
        assert!(summary.starts_with("# Benchmark Summary"));
        assert!(summary.contains("| bfs | dataset=karate.csv | gpu-box | 809a1569 | 0.5 |"));
        assert!(summary.contains("| pagerank |  | gpu-box | 809a1569 | - |"));
        assert!(summary.contains("Total results: 2"));
        assert!(summary.contains("Distinct contexts: 1"));
    }

    #[test]
    fn test_long_arguments_are_truncated() {
        let long = "x".repeat(80);
        let rows = vec![Row::new(
            Context::default(),
            BenchmarkResult::new("bfs", 1.0).with_arg("dataset", long),
        )];
        let summary = generate_summary(&rows);
        let expected = format!("| bfs | dataset={}... |", "x".repeat(ARGS_WIDTH - 3 - "dataset=".len()));
        assert!(summary.contains(&expected));
    }
}
