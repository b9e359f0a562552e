//! Transcript aggregation for relayed turns
//!
//! The backend streams transcription fragments for both sides of the
//! conversation. Fragments are appended as they arrive and handed out as
//! whole utterances when the backend marks the turn complete.

/// Accumulates transcript fragments for one speaker.
#[derive(Debug, Clone, Default)]
pub struct TranscriptAggregator {
    text: String,
    fragment_count: u64,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Returns the accumulated text.
    pub fn process_fragment(&mut self, fragment: &str) -> &str {
        if !fragment.is_empty() {
            self.text.push_str(fragment);
            self.fragment_count += 1;

            if self.fragment_count % 10 == 0 {
                log::debug!(
                    "TranscriptAggregator: {} fragments, {} chars accumulated",
                    self.fragment_count,
                    self.text.len()
                );
            }
        }
        &self.text
    }

    pub fn current_text(&self) -> &str {
        &self.text
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Take the trimmed text and reset for the next utterance.
    pub fn take(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.text);
        self.fragment_count = 0;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Both sides of the current turn.
#[derive(Debug, Clone, Default)]
pub struct TurnTranscript {
    user: TranscriptAggregator,
    assistant: TranscriptAggregator,
}

impl TurnTranscript {
    pub fn push_user(&mut self, fragment: &str) {
        self.user.process_fragment(fragment);
    }

    pub fn push_assistant(&mut self, fragment: &str) {
        self.assistant.process_fragment(fragment);
    }

    /// Close the turn: returns `(role, text)` pairs, user first.
    pub fn complete(&mut self) -> Vec<(&'static str, String)> {
        let mut lines = Vec::with_capacity(2);
        if let Some(text) = self.user.take() {
            lines.push(("user", text));
        }
        if let Some(text) = self.assistant.take() {
            lines.push(("assistant", text));
        }
        lines
    }

    /// The assistant was interrupted; its partial utterance is kept but cut here.
    pub fn interrupt(&mut self) -> Vec<(&'static str, String)> {
        if self.assistant.has_text() {
            self.assistant.process_fragment(" …");
        }
        self.complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_accumulate() {
        let mut agg = TranscriptAggregator::new();
        agg.process_fragment("Hello");
        agg.process_fragment(" world");
        assert_eq!(agg.current_text(), "Hello world");
        assert!(agg.has_text());
    }

    #[test]
    fn test_empty_fragment_ignored() {
        let mut agg = TranscriptAggregator::new();
        agg.process_fragment("");
        assert!(!agg.has_text());
        assert!(agg.take().is_none());
    }

    #[test]
    fn test_take_resets() {
        let mut agg = TranscriptAggregator::new();
        agg.process_fragment("  I fell down ");
        assert_eq!(agg.take().as_deref(), Some("I fell down"));
        assert_eq!(agg.current_text(), "");
    }

    #[test]
    fn test_turn_complete_orders_user_first() {
        let mut turn = TurnTranscript::default();
        turn.push_assistant("How are you?");
        turn.push_user("Not great");
        let lines = turn.complete();
        assert_eq!(
            lines,
            vec![
                ("user", "Not great".to_string()),
                ("assistant", "How are you?".to_string())
            ]
        );
        assert!(turn.complete().is_empty());
    }

    #[test]
    fn test_interrupt_marks_cut_utterance() {
        let mut turn = TurnTranscript::default();
        turn.push_assistant("Let me tell you");
        let lines = turn.interrupt();
        assert_eq!(lines, vec![("assistant", "Let me tell you …".to_string())]);
    }
}
