use crate::error::ModelError;
use crate::llm::LlmClient;
use crate::traits::Rephraser;
use async_trait::async_trait;
use std::sync::Arc;

const REPHRASE_PROMPT: &str = "You rewrite search queries for a document retrieval system. \
Return a single improved query that keeps the original intent, with no commentary.";

const MULTI_QUERY_PROMPT: &str = "You rewrite search queries for a document retrieval system. \
Return the requested number of alternative phrasings of the query, one per line, \
with no numbering and no commentary.";

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRephraser;

#[async_trait]
impl Rephraser for NoopRephraser {
    async fn rephrase(&self, query: &str) -> Result<Vec<String>, ModelError> {
        Ok(vec![query.to_string()])
    }
}

pub struct LlmRephraser {
    llm: Arc<dyn LlmClient>,
}

impl LlmRephraser {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Rephraser for LlmRephraser {
    async fn rephrase(&self, query: &str) -> Result<Vec<String>, ModelError> {
        let response = self
            .llm
            .complete(REPHRASE_PROMPT, query)
            .await
            .map_err(|error| ModelError::RephraseFailed(error.to_string()))?;

        let rewritten = response.trim();
        if rewritten.is_empty() {
            return Err(ModelError::RephraseFailed(
                "model returned an empty query".to_string(),
            ));
        }
        Ok(vec![rewritten.to_string()])
    }
}

pub struct MultiQueryRephraser {
    llm: Arc<dyn LlmClient>,
    n: usize,
}

impl MultiQueryRephraser {
    pub fn new(llm: Arc<dyn LlmClient>, n: usize) -> Self {
        Self { llm, n: n.max(1) }
    }
}

// Strips list markers models tend to add despite instructions.
fn clean_line(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(|ch: char| ch.is_ascii_digit());
    let line = line.trim_start_matches(['.', ')', '-', '*']);
    line.trim().trim_matches('"')
}

#[async_trait]
impl Rephraser for MultiQueryRephraser {
    async fn rephrase(&self, query: &str) -> Result<Vec<String>, ModelError> {
        let prompt = format!("Number of alternatives: {}\nQuery: {query}", self.n);
        let response = self
            .llm
            .complete(MULTI_QUERY_PROMPT, &prompt)
            .await
            .map_err(|error| ModelError::RephraseFailed(error.to_string()))?;

        let mut queries = vec![query.to_string()];
        for line in response.lines().map(clean_line) {
            if queries.len() > self.n {
                break;
            }
            if !line.is_empty() && !queries.iter().any(|existing| existing == line) {
                queries.push(line.to_string());
            }
        }
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedLlm(Result<String, String>);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, ModelError> {
            self.0.clone().map_err(ModelError::Completion)
        }
    }

    #[tokio::test]
    async fn noop_returns_the_query() -> Result<(), ModelError> {
        assert_eq!(NoopRephraser.rephrase("sky color").await?, vec!["sky color"]);
        Ok(())
    }

    #[tokio::test]
    async fn llm_rephraser_trims_the_rewrite() -> Result<(), ModelError> {
        let rephraser = LlmRephraser::new(Arc::new(CannedLlm(Ok("  what colour is the sky \n".to_string()))));
        assert_eq!(rephraser.rephrase("sky color").await?, vec!["what colour is the sky"]);
        Ok(())
    }

    #[tokio::test]
    async fn llm_failure_is_a_rephrase_failure() {
        let rephraser = LlmRephraser::new(Arc::new(CannedLlm(Err("timeout".to_string()))));
        let result = rephraser.rephrase("sky color").await;
        assert!(matches!(result, Err(ModelError::RephraseFailed(_))));
    }

    #[tokio::test]
    async fn multi_query_keeps_original_and_caps_count() -> Result<(), ModelError> {
        let response = "1. colour of the sky\n2) sky color\n- why is the sky blue\n\n* sky hue".to_string();
        let rephraser = MultiQueryRephraser::new(Arc::new(CannedLlm(Ok(response))), 2);
        let queries = rephraser.rephrase("sky color").await?;
        assert_eq!(
            queries,
            vec!["sky color", "colour of the sky", "why is the sky blue"]
        );
        Ok(())
    }
}
