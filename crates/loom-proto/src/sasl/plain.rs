//! PLAIN SASL mechanism (RFC 4616).
//!
//! The single client message is `authzid \0 authcid \0 password`.

use zeroize::Zeroizing;

use super::SaslError;

/// Parsed PLAIN credentials.
///
/// The password is zeroized on drop; callers should not clone it out.
#[derive(Debug)]
pub struct PlainCredentials {
    /// Authorization identity; empty means "same as authcid".
    pub authzid: String,
    /// Authentication identity (the account being proven).
    pub authcid: String,
    /// Cleartext password.
    pub password: Zeroizing<String>,
}

impl PlainCredentials {
    /// The account name to log in as: the authzid when given, else the
    /// authcid.
    pub fn account_name(&self) -> &str {
        if self.authzid.is_empty() {
            &self.authcid
        } else {
            &self.authzid
        }
    }
}

/// Parse a decoded PLAIN payload.
pub fn parse_plain(payload: &[u8]) -> Result<PlainCredentials, SaslError> {
    let mut parts = payload.splitn(3, |&b| b == 0);
    let authzid = parts.next().ok_or(SaslError::InvalidMessage)?;
    let authcid = parts.next().ok_or(SaslError::InvalidMessage)?;
    let password = parts.next().ok_or(SaslError::InvalidMessage)?;

    if authcid.is_empty() || password.is_empty() {
        return Err(SaslError::InvalidMessage);
    }

    let decode = |b: &[u8]| {
        std::str::from_utf8(b)
            .map(str::to_owned)
            .map_err(|_| SaslError::InvalidEncoding)
    };

    Ok(PlainCredentials {
        authzid: decode(authzid)?,
        authcid: decode(authcid)?,
        password: Zeroizing::new(decode(password)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_without_authzid() {
        let creds = parse_plain(b"\0alice\0hunter2").unwrap();
        assert_eq!(creds.authzid, "");
        assert_eq!(creds.authcid, "alice");
        assert_eq!(&*creds.password, "hunter2");
        assert_eq!(creds.account_name(), "alice");
    }

    #[test]
    fn authzid_wins_when_present() {
        let creds = parse_plain(b"admin\0alice\0hunter2").unwrap();
        assert_eq!(creds.account_name(), "admin");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(parse_plain(b"alicehunter2").is_err());
        assert!(parse_plain(b"\0alice").is_err());
    }

    #[test]
    fn rejects_empty_authcid_or_password() {
        assert!(parse_plain(b"\0\0hunter2").is_err());
        assert!(parse_plain(b"\0alice\0").is_err());
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(parse_plain(b"\0ali\xffce\0pw").is_err());
    }
}
