//! CLI front-end for the query pipeline: `dsearch search`, `dsearch results`
//! and `dsearch explain`.
//!
//! Sessions created from the CLI only outlive the process when
//! `[sessions].backend = "sqlite"`; with the in-memory backend, `results`
//! and `explain` can only address sessions of the same invocation.

use anyhow::Result;
use dataset_search_core::models::{GroupedResult, Response};
use dataset_search_core::query::QueryParams;

use crate::config::Config;
use crate::services;

const EXCERPT_CHARS: usize = 160;

/// Run a query and print the grouped (or generated) response.
pub async fn run_search(
    config: &Config,
    query: &str,
    params: QueryParams,
    summarize: bool,
) -> Result<()> {
    let pipeline = services::build_pipeline(config).await?;
    let submitted = pipeline.submit(query, &params, summarize).await?;

    println!("results id: {}", submitted.results_id);
    println!();
    match submitted.response {
        Response::Grouped { results } => print_results(&results),
        Response::Generated { text, sources } => {
            println!("{}", text);
            if !sources.is_empty() {
                println!();
                println!("Sources:");
                for (i, doc) in sources.iter().enumerate() {
                    match &doc.url {
                        Some(url) => println!("  [{}] {} ({})", i, doc.title, url),
                        None => println!("  [{}] {}", i, doc.title),
                    }
                }
            }
        }
    }
    Ok(())
}

/// Print the stored results of a session.
pub async fn run_results(config: &Config, results_id: &str) -> Result<()> {
    let pipeline = services::build_pipeline(config).await?;
    let query = pipeline.original_query(results_id).await?;
    let results = pipeline.results(results_id).await?;
    println!("query: {}", query);
    println!();
    print_results(&results);
    Ok(())
}

/// Explain why result `index` of a session matched its query.
pub async fn run_explain(config: &Config, results_id: &str, index: usize) -> Result<()> {
    let pipeline = services::build_pipeline(config).await?;
    let explanation = pipeline.explain(results_id, index).await?;
    println!("{}", explanation);
    Ok(())
}

fn print_results(results: &[GroupedResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in results.iter().enumerate() {
        let title = result.title.as_deref().unwrap_or(&result.id);
        println!("{}. [{:.2}] {}", i, result.score, title);
        println!("    id: {}", result.id);
        if let Some(ref url) = result.url {
            println!("    url: {}", url);
        }
        println!("    chunks: {}", result.chunks);
        println!("    excerpt: \"{}\"", excerpt(&result.content));
        println!();
    }
}

fn excerpt(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}
