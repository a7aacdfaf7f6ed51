//! Nickname validation utilities.
//!
//! # Reference
//! - RFC 2812 Section 2.3.1: Message format (nickname definition)

/// Default maximum nickname length, advertised as `NICKLEN` in ISUPPORT.
pub const DEFAULT_NICK_MAX_LEN: usize = 30;

/// Check if a character is a "special" character allowed in nicknames.
///
/// Per RFC 2812: `[ ] \ ` ^ _ { | }`
#[inline]
fn is_special(c: char) -> bool {
    matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}')
}

/// Extension trait for checking if a string is a valid IRC nickname.
pub trait NickExt {
    /// Check if this string is a valid IRC nickname.
    ///
    /// Valid nicknames:
    /// - First character: letter or special character `[]\`_^{|}`
    /// - Subsequent characters: letter, digit, special, or hyphen (`-`)
    /// - Maximum length: [`DEFAULT_NICK_MAX_LEN`]
    fn is_valid_nick(&self) -> bool;

    /// Check validity with a custom maximum length.
    fn is_valid_nick_len(&self, max_len: usize) -> bool;
}

impl NickExt for &str {
    fn is_valid_nick(&self) -> bool {
        self.is_valid_nick_len(DEFAULT_NICK_MAX_LEN)
    }

    fn is_valid_nick_len(&self, max_len: usize) -> bool {
        if self.is_empty() || self.len() > max_len {
            return false;
        }

        let mut chars = self.chars();

        let first = match chars.next() {
            Some(c) => c,
            None => return false,
        };

        if !first.is_ascii_alphabetic() && !is_special(first) {
            return false;
        }

        chars.all(|c| c.is_ascii_alphanumeric() || is_special(c) || c == '-')
    }
}

impl NickExt for String {
    fn is_valid_nick(&self) -> bool {
        self.as_str().is_valid_nick()
    }

    fn is_valid_nick_len(&self, max_len: usize) -> bool {
        self.as_str().is_valid_nick_len(max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_special_nicks() {
        assert!("nick".is_valid_nick());
        assert!("Nick123".is_valid_nick());
        assert!("nick-name".is_valid_nick());
        assert!("[cool]".is_valid_nick());
        assert!("_under_".is_valid_nick());
        assert!("`tick`".is_valid_nick());
        assert!("{brace|pipe}".is_valid_nick());
    }

    #[test]
    fn rejects_bad_first_char_and_separators() {
        assert!(!"".is_valid_nick());
        assert!(!"123nick".is_valid_nick());
        assert!(!"-nick".is_valid_nick());
        assert!(!"nick name".is_valid_nick());
        assert!(!"nick@host".is_valid_nick());
        assert!(!"nick!user".is_valid_nick());
    }

    #[test]
    fn boundary_length_30_accepted_31_rejected() {
        let max = "a".repeat(30);
        assert!(max.is_valid_nick());

        let over = "a".repeat(31);
        assert!(!over.is_valid_nick());
    }
}
