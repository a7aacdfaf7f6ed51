//! Hostmask wildcard matching.
//!
//! Bans, ban exceptions, and invite masks are `nick!user@host` patterns
//! where `*` matches any run of characters and `?` matches exactly one.
//! Matching is case-insensitive under the RFC 1459 fold.

use crate::casemap::irc_lower_char;

/// Match `text` against a wildcard `pattern` (`*` any run, `?` one char),
/// case-insensitive under the RFC 1459 mapping.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().map(irc_lower_char).collect();
    let txt: Vec<char> = text.chars().map(irc_lower_char).collect();

    // Iterative backtracking matcher: remembers the position of the last
    // `*` and re-expands it when a literal mismatch occurs.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_t = 0usize;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

/// Match a full `nick!user@host` identity against a ban-style mask.
///
/// A mask without `!`/`@` separators is matched against the whole identity
/// string, which keeps bare `*` and legacy nick-only masks working.
pub fn matches_hostmask(mask: &str, nick: &str, user: &str, host: &str) -> bool {
    let identity = format!("{nick}!{user}@{host}");
    if mask.contains('!') || mask.contains('@') {
        wildcard_match(mask, &identity)
    } else {
        wildcard_match(mask, nick) || wildcard_match(mask, &identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*!*@*", "nick!user@host"));
        assert!(wildcard_match("*@evil.host", "nick!user@evil.host"));
        assert!(!wildcard_match("*@evil.host", "nick!user@good.host"));
    }

    #[test]
    fn question_matches_exactly_one() {
        assert!(wildcard_match("n?ck", "nick"));
        assert!(wildcard_match("n?ck", "nack"));
        assert!(!wildcard_match("n?ck", "nck"));
        assert!(!wildcard_match("n?ck", "niick"));
    }

    #[test]
    fn fold_aware() {
        assert!(wildcard_match("NICK*", "nick!user@host"));
        assert!(wildcard_match("*[a]*", "x{A}y"));
    }

    #[test]
    fn backtracking_across_multiple_stars() {
        assert!(wildcard_match("*!*bot*@*", "some!webbot7@gateway"));
        assert!(!wildcard_match("*!*bot*@*.trusted", "some!webbot7@gateway"));
    }

    #[test]
    fn hostmask_forms() {
        assert!(matches_hostmask("*!*@evil.host", "new", "u", "evil.host"));
        assert!(!matches_hostmask("*!*@evil.host", "new", "u", "nice.host"));
        // Bare nick pattern.
        assert!(matches_hostmask("troll*", "troll42", "u", "h"));
    }
}
