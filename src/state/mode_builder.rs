//! Accumulates effective mode changes and renders the single MODE line
//! sent to channel members.
//!
//! Handlers feed every *applied* change in order; no-ops (setting an
//! already-set flag, removing an absent ban) are simply never recorded, so
//! the rendered summary contains only what actually changed.

/// Builder for the summary MODE message.
#[derive(Debug, Default)]
pub struct ModeBuilder {
    changes: Vec<(bool, char, Option<String>)>,
}

impl ModeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied change.
    pub fn push(&mut self, add: bool, mode: char, arg: Option<String>) {
        self.changes.push((add, mode, arg));
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Render the flags string and parameter list: `+ov-k` + `[alice, bob]`.
    /// Parameters follow in the order their letters appear.
    pub fn render(&self) -> (String, Vec<String>) {
        let mut flags = String::new();
        let mut params = Vec::new();
        let mut current: Option<bool> = None;

        for (add, mode, arg) in &self.changes {
            if current != Some(*add) {
                flags.push(if *add { '+' } else { '-' });
                current = Some(*add);
            }
            flags.push(*mode);
            if let Some(arg) = arg {
                params.push(arg.clone());
            }
        }

        (flags, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_renders_nothing() {
        let b = ModeBuilder::new();
        assert!(b.is_empty());
        assert_eq!(b.render(), (String::new(), Vec::new()));
    }

    #[test]
    fn groups_runs_by_direction() {
        let mut b = ModeBuilder::new();
        b.push(true, 'o', Some("alice".into()));
        b.push(true, 'v', Some("bob".into()));
        b.push(false, 'k', None);
        b.push(true, 'n', None);

        let (flags, params) = b.render();
        assert_eq!(flags, "+ov-k+n");
        assert_eq!(params, vec!["alice", "bob"]);
    }

    #[test]
    fn params_follow_letter_order() {
        let mut b = ModeBuilder::new();
        b.push(true, 'l', Some("25".into()));
        b.push(true, 'o', Some("alice".into()));
        let (flags, params) = b.render();
        assert_eq!(flags, "+lo");
        assert_eq!(params, vec!["25", "alice"]);
    }
}
