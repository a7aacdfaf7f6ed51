//! MODE string grammar.
//!
//! `MODE <target> <flags> [<params>...]` carries a sequence of `+`/`-` runs
//! with mode letters; parameters are consumed left-to-right by the letters
//! that take one. This module classifies channel mode letters and binds
//! parameters; permission checks and semantics belong to the server.

/// Maximum number of parameterized mode changes applied per MODE line.
/// Excess changes are silently dropped.
pub const MAX_MODES: usize = 6;

/// How a channel mode letter consumes a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Plain bit flag, never takes a parameter (`imnpstr`...).
    Flag,
    /// Takes a parameter only when setting (`+k <key>`, `+l <limit>`).
    SetOnly,
    /// List mode: a parameter edits the list, none queries it (`b`, `e`, `I`).
    List,
    /// Member-target mode, always takes a nick (`o v h a q`).
    Member,
}

/// Classify a channel mode letter.
pub fn channel_arg_kind(mode: char) -> ModeArg {
    match mode {
        'b' | 'e' | 'I' => ModeArg::List,
        'k' | 'l' => ModeArg::SetOnly,
        'o' | 'v' | 'h' | 'a' | 'q' => ModeArg::Member,
        _ => ModeArg::Flag,
    }
}

/// A single mode change with its bound parameter, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`.
    pub add: bool,
    /// The mode letter.
    pub mode: char,
    /// Bound parameter (key, limit, mask, or nick).
    pub arg: Option<String>,
}

/// The outcome of parsing a channel MODE flags string.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedModes {
    /// Changes to apply, in order. At most [`MAX_MODES`] of these carry a
    /// parameter; parameterized changes beyond the budget are dropped.
    pub changes: Vec<ModeChange>,
    /// List modes queried without a parameter (`MODE #c +b`).
    pub queries: Vec<char>,
}

/// Parse a channel mode flags string, binding `args` left-to-right.
///
/// Changes that require a parameter but have none left are dropped, as are
/// parameterized changes past the [`MAX_MODES`] budget.
pub fn parse_channel_modes(flags: &str, args: &[String]) -> ParsedModes {
    let mut parsed = ParsedModes::default();
    let mut add = true;
    let mut next_arg = 0usize;
    let mut param_budget = MAX_MODES;

    for c in flags.chars() {
        match c {
            '+' => add = true,
            '-' => add = false,
            mode => {
                let kind = channel_arg_kind(mode);
                let wants_arg = match kind {
                    ModeArg::Flag => false,
                    ModeArg::SetOnly => add,
                    ModeArg::Member => true,
                    ModeArg::List => next_arg < args.len(),
                };

                if !wants_arg {
                    match kind {
                        // A bare list letter is a query, not a change.
                        ModeArg::List => {
                            if !parsed.queries.contains(&mode) {
                                parsed.queries.push(mode);
                            }
                        }
                        // `-k` / `-l` take no parameter.
                        ModeArg::Flag | ModeArg::SetOnly => parsed.changes.push(ModeChange {
                            add,
                            mode,
                            arg: None,
                        }),
                        // A member mode without a nick is meaningless.
                        ModeArg::Member => {}
                    }
                    continue;
                }

                let Some(arg) = args.get(next_arg) else {
                    continue;
                };
                next_arg += 1;

                if param_budget == 0 {
                    continue;
                }
                param_budget -= 1;

                parsed.changes.push(ModeChange {
                    add,
                    mode,
                    arg: Some(arg.clone()),
                });
            }
        }
    }

    parsed
}

/// Parse a user mode flags string into `(add, letter)` pairs.
pub fn parse_user_modes(flags: &str) -> Vec<(bool, char)> {
    let mut out = Vec::new();
    let mut add = true;
    for c in flags.chars() {
        match c {
            '+' => add = true,
            '-' => add = false,
            mode => out.push((add, mode)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn binds_params_left_to_right() {
        let parsed = parse_channel_modes("+ovk", &s(&["alice", "bob", "sekrit"]));
        assert_eq!(parsed.changes.len(), 3);
        assert_eq!(parsed.changes[0].mode, 'o');
        assert_eq!(parsed.changes[0].arg.as_deref(), Some("alice"));
        assert_eq!(parsed.changes[1].mode, 'v');
        assert_eq!(parsed.changes[1].arg.as_deref(), Some("bob"));
        assert_eq!(parsed.changes[2].mode, 'k');
        assert_eq!(parsed.changes[2].arg.as_deref(), Some("sekrit"));
    }

    #[test]
    fn direction_runs() {
        let parsed = parse_channel_modes("+n-t+m", &[]);
        let dirs: Vec<(bool, char)> = parsed.changes.iter().map(|c| (c.add, c.mode)).collect();
        assert_eq!(dirs, vec![(true, 'n'), (false, 't'), (true, 'm')]);
    }

    #[test]
    fn bare_list_letter_is_query() {
        let parsed = parse_channel_modes("+b", &[]);
        assert!(parsed.changes.is_empty());
        assert_eq!(parsed.queries, vec!['b']);
    }

    #[test]
    fn list_letter_with_arg_is_change() {
        let parsed = parse_channel_modes("+b", &s(&["*!*@evil.host"]));
        assert_eq!(parsed.changes.len(), 1);
        assert_eq!(parsed.changes[0].arg.as_deref(), Some("*!*@evil.host"));
        assert!(parsed.queries.is_empty());
    }

    #[test]
    fn unset_key_and_limit_take_no_param() {
        let parsed = parse_channel_modes("-kl", &[]);
        assert_eq!(parsed.changes.len(), 2);
        assert!(parsed.changes.iter().all(|c| c.arg.is_none()));
    }

    #[test]
    fn member_mode_without_nick_dropped() {
        let parsed = parse_channel_modes("+o", &[]);
        assert!(parsed.changes.is_empty());
    }

    #[test]
    fn param_budget_drops_seventh_change() {
        let args = s(&["n1", "n2", "n3", "n4", "n5", "n6", "n7"]);
        let parsed = parse_channel_modes("+ooooooo", &args);
        assert_eq!(parsed.changes.len(), MAX_MODES);
        assert_eq!(parsed.changes.last().unwrap().arg.as_deref(), Some("n6"));
    }

    #[test]
    fn flags_do_not_consume_budget() {
        let args = s(&["n1", "n2", "n3", "n4", "n5", "n6"]);
        let parsed = parse_channel_modes("+ntoooooo", &args);
        // n and t are flags; all six member changes survive.
        assert_eq!(parsed.changes.len(), 8);
    }

    #[test]
    fn user_mode_parse() {
        assert_eq!(
            parse_user_modes("+iw-o"),
            vec![(true, 'i'), (true, 'w'), (false, 'o')]
        );
    }
}
