//! Per-turn transcription accumulation

use super::ConversationalTurn;

/// Collects transcription deltas until the model completes its turn
#[derive(Debug, Default, Clone)]
pub struct TurnAccumulator {
    pending_user: String,
    pending_agent: String,
}

impl TurnAccumulator {
    /// Create empty accumulators
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta of the user's speech
    pub fn push_user(&mut self, delta: &str) {
        self.pending_user.push_str(delta);
    }

    /// Append a delta of the model's speech
    pub fn push_agent(&mut self, delta: &str) {
        self.pending_agent.push_str(delta);
    }

    /// Text collected for the user so far
    #[must_use]
    pub fn pending_user(&self) -> &str {
        &self.pending_user
    }

    /// Text collected for the model so far
    #[must_use]
    pub fn pending_agent(&self) -> &str {
        &self.pending_agent
    }

    /// Close the turn
    ///
    /// Returns the trimmed non-empty sides, or `None` if both are blank.
    /// Both accumulators are emptied either way.
    pub fn complete(&mut self) -> Option<ConversationalTurn> {
        let user = non_empty(&std::mem::take(&mut self.pending_user));
        let agent = non_empty(&std::mem::take(&mut self.pending_agent));

        if user.is_none() && agent.is_none() {
            return None;
        }
        Some(ConversationalTurn { user, agent })
    }

    /// Drop anything collected so far
    pub fn clear(&mut self) {
        self.pending_user.clear();
        self.pending_agent.clear();
    }

    /// Whether nothing has been collected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_user.is_empty() && self.pending_agent.is_empty()
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_only_turn() {
        let mut acc = TurnAccumulator::new();
        acc.push_user("hel");
        acc.push_user("lo");

        let turn = acc.complete().unwrap();
        assert_eq!(turn.user.as_deref(), Some("hello"));
        assert_eq!(turn.agent, None);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_both_sides_trimmed() {
        let mut acc = TurnAccumulator::new();
        acc.push_user("  what time is it ");
        acc.push_agent(" It is ");
        acc.push_agent("noon.\n");

        let turn = acc.complete().unwrap();
        assert_eq!(turn.user.as_deref(), Some("what time is it"));
        assert_eq!(turn.agent.as_deref(), Some("It is noon."));
    }

    #[test]
    fn test_blank_turn_is_not_published_but_resets() {
        let mut acc = TurnAccumulator::new();
        acc.push_user("   ");
        acc.push_agent("\n");

        assert!(acc.complete().is_none());
        assert!(acc.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut acc = TurnAccumulator::new();
        acc.push_user("half a sent");
        acc.clear();
        assert!(acc.is_empty());
        assert!(acc.complete().is_none());
    }
}
