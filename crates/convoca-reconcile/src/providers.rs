//! Completion-service test doubles
//!
//! Real HTTP providers live outside this crate; the engine only sees the
//! [`CompletionService`] seam. The mock here scripts responses and records
//! usage so mapper and updater behavior can be exercised without a live
//! service.

use crate::{Completion, CompletionService, LlmError, TokenUsage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted completion service for tests. Responses are consumed in order
/// and repeat from the start when exhausted; `Err` entries simulate a
/// failing service call.
pub struct MockCompletion {
    responses: Vec<Result<String, String>>,
    cursor: AtomicUsize,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl MockCompletion {
    pub const INPUT_TOKENS_PER_CALL: u64 = 120;
    pub const OUTPUT_TOKENS_PER_CALL: u64 = 40;

    pub fn scripted(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses,
            cursor: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    pub fn always(response: &str) -> Self {
        Self::scripted(vec![Ok(response.to_string())])
    }

    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![Err(message.to_string())])
    }

    /// Number of classify calls issued so far.
    pub fn classify_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts seen so far, in call order.
    pub fn user_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Totals reported through `record_usage`.
    pub fn recorded_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::SeqCst),
            output_tokens: self.output_tokens.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn classify(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _temperature: f32,
    ) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user_prompt.to_string());

        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        match &self.responses[idx % self.responses.len()] {
            Ok(text) => Ok(Completion {
                text: text.clone(),
                usage: TokenUsage {
                    input_tokens: Self::INPUT_TOKENS_PER_CALL,
                    output_tokens: Self::OUTPUT_TOKENS_PER_CALL,
                },
            }),
            Err(message) => Err(LlmError::Service(message.clone())),
        }
    }

    fn record_usage(&self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens.fetch_add(input_tokens, Ordering::SeqCst);
        self.output_tokens.fetch_add(output_tokens, Ordering::SeqCst);
    }
}
