//! `vidx build`: rebuild indexes one after another and report.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::factory;

/// Names that are not configured indexes.
pub fn unknown_names<'a>(config: &Config, names: &'a [String]) -> Vec<&'a str> {
    names
        .iter()
        .filter(|n| config.index(n).is_none())
        .map(String::as_str)
        .collect()
}

pub async fn run_build(config: &Config, names: &[String], dry_run: bool) -> Result<()> {
    let unknown = unknown_names(config, names);
    if !unknown.is_empty() {
        bail!("Unknown index names: {:?}", unknown);
    }

    let selected: Vec<&str> = if names.is_empty() {
        config.indexes.iter().map(|i| i.name.as_str()).collect()
    } else {
        names.iter().map(String::as_str).collect()
    };

    println!("Indexes to rebuild:");
    for name in &selected {
        println!("  - {}", name);
    }

    if dry_run {
        println!();
        println!("DRY RUN: Would rebuild the above indexes");
        return Ok(());
    }

    let app = factory::open(config.clone()).await?;
    let summary = app.registry.build_all(names).await?;

    println!();
    let total = summary.outcomes.len();
    for (i, outcome) in summary.outcomes.iter().enumerate() {
        println!("[{}/{}] Rebuilding index: {}", i + 1, total, outcome.name);
        match &outcome.result {
            Ok(report) => println!(
                "  ✓ Successfully rebuilt '{}' in {:.2}s ({} documents)",
                outcome.name,
                outcome.elapsed.as_secs_f64(),
                report.documents
            ),
            Err(e) => println!("  ✗ Failed to rebuild '{}': {}", outcome.name, e),
        }
    }

    println!();
    println!("=== Rebuild Summary ===");
    println!("Total indexes: {}", total);
    println!("Successful: {}", summary.succeeded());
    println!("Failed: {}", summary.failed());
    println!("Total time: {:.2}s", summary.elapsed.as_secs_f64());

    if summary.failed() > 0 {
        bail!("{} index rebuild(s) failed", summary.failed());
    }
    Ok(())
}

/// `vidx indexes`: list configured indexes and their sources.
pub fn list_indexes(config: &Config) {
    println!("{:<24} {:<8} SOURCES", "INDEX", "STORAGE");
    for index in &config.indexes {
        let sources: Vec<String> = index
            .sources
            .iter()
            .map(|s| format!("{} ({})", s.source_id(), s.path.display()))
            .collect();
        println!(
            "{:<24} {:<8} {}",
            index.name,
            index.storage.as_str(),
            sources.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_unknown_names() {
        let config = parse_config(
            r#"
[db]
path = "x.sqlite"

[[indexes]]
name = "Books"
[[indexes.sources]]
model = "library.Book"
path = "books.jsonl"
"#,
        )
        .unwrap();
        let names = vec!["Books".to_string(), "Films".to_string()];
        assert_eq!(unknown_names(&config, &names), vec!["Films"]);
        assert!(unknown_names(&config, &[]).is_empty());
    }
}
