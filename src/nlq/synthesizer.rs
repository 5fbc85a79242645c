//! Query Synthesizer
//!
//! Turns a question plus a schema descriptor into a candidate query by asking
//! a `TextGenerator`. Generation failures are returned as-is; nothing is retried.

use crate::error::{CopilotError, Result};
use crate::llm::{GenerationParams, Prompt, TextGenerator};
use crate::nlq::descriptor::SchemaDescriptor;
use crate::nlq::query::{CandidateQuery, Dialect, Question};
use std::sync::Arc;
use tracing::debug;

pub struct QuerySynthesizer {
    generator: Arc<dyn TextGenerator>,
    params: Option<GenerationParams>,
}

impl QuerySynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            params: None,
        }
    }

    /// Override the per-dialect generation defaults.
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = Some(params);
        self
    }

    pub async fn synthesize(&self, question: &Question, descriptor: &SchemaDescriptor) -> Result<CandidateQuery> {
        let prompt = build_prompt(question, descriptor);
        let params = self.params.clone().unwrap_or_else(|| match descriptor.dialect {
            Dialect::WarehouseSql => GenerationParams::sql(),
            Dialect::ResourceConfigDsl => GenerationParams::config_dsl(),
        });

        let raw = self.generator.generate(&prompt, &params).await?;
        let text = clean_generated_text(&raw);
        if text.is_empty() {
            return Err(CopilotError::Generation(
                "Generator returned no query text".to_string(),
            ));
        }

        debug!(dialect = %descriptor.dialect, query = %text, "synthesized candidate query");
        Ok(CandidateQuery::new(text, descriptor.dialect))
    }
}

/// Build the generation prompt: the descriptor goes in the system message,
/// the question in the user message.
pub fn build_prompt(question: &Question, descriptor: &SchemaDescriptor) -> Prompt {
    let mut system = String::new();
    system.push_str(&descriptor.role);
    system.push_str("\n\n");

    if let Some(table) = &descriptor.table {
        system.push_str(&format!("Use the {} table.\n\n", table));
    }

    system.push_str("Supported fields:\n");
    system.push_str(&descriptor.field_lines().join("\n"));
    system.push_str("\n\nSyntax rules:\n");
    for rule in &descriptor.rules {
        system.push_str("- ");
        system.push_str(rule);
        system.push('\n');
    }

    Prompt::new(Some(system), format!("Question: {}", question))
}

/// Strip surrounding whitespace and markdown code fences from generator output.
pub fn clean_generated_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // Drop the info string (```sql) up to the first newline
    let body = match rest.find('\n') {
        Some(idx) if !rest[..idx].trim().contains(' ') => &rest[idx + 1..],
        _ => rest,
    };
    // Anything after the closing fence is commentary
    let body = body.find("```").map_or(body, |end| &body[..end]);
    body.trim().to_string()
}
