//! Context window selection
//!
//! Picks the longest run of most recent messages that fits alongside the
//! system prompt, leaving room for the model's reply. The scan walks
//! backwards from the newest message and stops at the first one that does
//! not fit; older messages are never considered once that happens, so the
//! result has no gaps.

use crate::tokenizer::Encoder;
use chatproxy_core::{ChatMessage, SelectedContext, RESERVED_COMPLETION_MARGIN};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextWindow {
    token_limit: usize,
    reserved_margin: usize,
}

impl ContextWindow {
    pub fn new(token_limit: usize) -> Self {
        Self {
            token_limit,
            reserved_margin: RESERVED_COMPLETION_MARGIN,
        }
    }

    pub fn with_margin(mut self, reserved_margin: usize) -> Self {
        self.reserved_margin = reserved_margin;
        self
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn reserved_margin(&self) -> usize {
        self.reserved_margin
    }

    /// Select the trailing messages that fit with `prompt`.
    ///
    /// Messages older than the first one that overflows are not encoded.
    pub fn select<E: Encoder + ?Sized>(
        &self,
        encoder: &E,
        prompt: &str,
        messages: &[ChatMessage],
    ) -> SelectedContext {
        let prompt_tokens = encoder.count(prompt);
        let mut message_tokens = 0usize;
        let mut start = messages.len();

        for (i, message) in messages.iter().enumerate().rev() {
            let tokens = encoder.count(&message.content);
            if !self.fits(prompt_tokens + message_tokens + tokens) {
                debug!(
                    "Message {} ({} tokens) exceeds window of {}; dropping {} older message(s)",
                    i,
                    tokens,
                    self.token_limit,
                    i + 1
                );
                break;
            }
            message_tokens += tokens;
            start = i;
        }

        SelectedContext {
            prompt_token_count: prompt_tokens,
            message_token_count: message_tokens,
            messages: messages[start..].to_vec(),
        }
    }

    fn fits(&self, input_tokens: usize) -> bool {
        input_tokens.saturating_add(self.reserved_margin) <= self.token_limit
    }
}
