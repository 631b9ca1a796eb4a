//! Explanations and summaries produced by an external language model.
//!
//! The core only builds prompts and context; the model itself sits behind
//! the [`Generator`] trait.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{GroupedResult, Response};
use crate::session::ResultsSessions;

/// Opaque text generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for `prompt`, grounded only in `context`.
    async fn generate(&self, prompt: &str, context: &str) -> Result<String>;
}

/// Prompt for explaining why one dataset matched a query.
pub fn explain_prompt(query: &str) -> String {
    format!(
        "Using only the document provided as context, explain in at most 80 words \
         why this dataset is relevant to the query below. If the document is not \
         relevant, say so plainly. Do not mention other datasets.\n\
         Query: {}",
        query
    )
}

/// Prompt for summarising a whole result set.
pub fn summary_prompt(query: &str) -> String {
    format!(
        "Summarise the following information in under 50 words. Following this \
         summary suggest a link with the user's query, using your own knowledge \
         or the documents.\n\
         Query: {}\n\
         For each unique dataset, structure your answer as follows:\n\n\
         Dataset: <dataset name>\n\
         Summary: <dataset summary>\n\
         Link: <dataset link with query>\n",
        query
    )
}

/// Context block for a single grouped result.
pub fn document_context(result: &GroupedResult) -> String {
    let title = result.title.as_deref().unwrap_or(&result.id);
    format!("Dataset: {}\n\n{}", title, result.content)
}

fn summary_context(grouped: &[GroupedResult]) -> String {
    grouped
        .iter()
        .map(document_context)
        .collect::<Vec<_>>()
        .join("\n---------------------\n")
}

/// Explain the result at `index` of session `results_id`.
///
/// The index is bounds-checked before the generator is reached, so a bad
/// index never costs a model call. Explanations are not cached.
pub async fn explain(
    sessions: &ResultsSessions,
    generator: &dyn Generator,
    results_id: &str,
    index: usize,
) -> Result<String> {
    let session = sessions.get(results_id).await?;
    let result = session
        .grouped_results
        .get(index)
        .ok_or(Error::IndexOutOfRange {
            index,
            len: session.grouped_results.len(),
        })?;

    tracing::debug!(results_id, index, document = %result.id, "explaining result");
    generator
        .generate(&explain_prompt(&session.query), &document_context(result))
        .await
}

/// One generated answer over a grouped result set.
pub async fn summarize(
    generator: &dyn Generator,
    query: &str,
    grouped: &[GroupedResult],
) -> Result<Response> {
    let text = generator
        .generate(&summary_prompt(query), &summary_context(grouped))
        .await?;
    Ok(Response::Generated {
        text,
        sources: grouped.iter().map(GroupedResult::to_document_ref).collect(),
    })
}
