//! SCRAM-SHA-256 server-side verifier (RFC 5802, RFC 7677).
//!
//! The server keeps only derived credentials (`StoredKey`, `ServerKey`,
//! salt, iteration count) — never the salted password. Verification:
//!
//! 1. Client sends `client-first-message`: `n,,n=user,r=cnonce`
//! 2. Server answers `server-first-message`: `r=cnonce+snonce,s=salt,i=iters`
//! 3. Client sends `client-final-message`: `c=biws,r=cnonce+snonce,p=proof`
//! 4. Server checks `H(proof XOR HMAC(StoredKey, AuthMessage)) == StoredKey`
//!    and answers `v=HMAC(ServerKey, AuthMessage)`.
//!
//! Unknown accounts get a decoy salt and fail at the proof step with the
//! same answer as a wrong password, so the exchange cannot be used to
//! enumerate accounts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::SaslError;

/// Iteration count issued with decoy salts and by credential derivation.
const DEFAULT_ITERATIONS: u32 = 4096;

/// Derived SCRAM credentials for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScramCredentials {
    /// Per-account random salt.
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count.
    pub iterations: u32,
    /// `H(HMAC(SaltedPassword, "Client Key"))`.
    pub stored_key: [u8; 32],
    /// `HMAC(SaltedPassword, "Server Key")`.
    pub server_key: [u8; 32],
}

impl ScramCredentials {
    /// Derive credentials from a cleartext password. Used at account
    /// provisioning time; the salted password is discarded.
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self, SaslError> {
        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, iterations, &mut salted)
            .map_err(|_| SaslError::Crypto)?;

        let client_key = hmac_sha256(&salted, b"Client Key")?;
        let stored_key = sha256(&client_key);
        let server_key = hmac_sha256(&salted, b"Server Key")?;

        Ok(Self {
            salt: salt.to_vec(),
            iterations,
            stored_key,
            server_key,
        })
    }

    /// Derive with a fresh random salt and the default iteration count.
    pub fn generate(password: &str) -> Result<Self, SaslError> {
        let mut salt = [0u8; 16];
        getrandom::getrandom(&mut salt).map_err(|_| SaslError::Crypto)?;
        Self::derive(password, &salt, DEFAULT_ITERATIONS)
    }
}

/// Internal verifier state.
#[derive(Debug)]
enum ScramState {
    Initial,
    AwaitingFinal {
        username: String,
        credentials: Option<ScramCredentials>,
        combined_nonce: String,
        /// `client-first-message-bare "," server-first-message`
        auth_message_prefix: String,
    },
    Done,
}

/// SCRAM-SHA-256 verifier state machine for one AUTHENTICATE exchange.
#[derive(Debug)]
pub struct ScramServer {
    state: ScramState,
}

impl Default for ScramServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScramServer {
    /// Fresh verifier.
    pub fn new() -> Self {
        Self {
            state: ScramState::Initial,
        }
    }

    /// Whether the next payload should be the client-first message.
    pub fn awaiting_first(&self) -> bool {
        matches!(self.state, ScramState::Initial)
    }

    /// Process the client-first-message; returns the server-first-message
    /// payload. `lookup` resolves the account's stored credentials; `None`
    /// continues the exchange with a decoy salt.
    pub fn step_first<F>(&mut self, payload: &[u8], lookup: F) -> Result<Vec<u8>, SaslError>
    where
        F: FnOnce(&str) -> Option<ScramCredentials>,
    {
        if !matches!(self.state, ScramState::Initial) {
            return Err(SaslError::OutOfOrder);
        }

        let text = std::str::from_utf8(payload).map_err(|_| SaslError::InvalidEncoding)?;

        // Only the no-channel-binding, no-authzid GS2 header is accepted.
        let bare = text
            .strip_prefix("n,,")
            .ok_or(SaslError::InvalidGs2Header)?;

        let mut username = None;
        let mut client_nonce = None;
        for part in bare.split(',') {
            if let Some(v) = part.strip_prefix("n=") {
                username = Some(unescape_username(v)?);
            } else if let Some(v) = part.strip_prefix("r=") {
                client_nonce = Some(v.to_string());
            }
        }
        let username = username.ok_or(SaslError::InvalidMessage)?;
        let client_nonce = client_nonce.ok_or(SaslError::NonceMismatch)?;
        if username.is_empty() || client_nonce.is_empty() {
            return Err(SaslError::InvalidMessage);
        }

        let mut nonce_bytes = [0u8; 18];
        getrandom::getrandom(&mut nonce_bytes).map_err(|_| SaslError::Crypto)?;
        let combined_nonce = format!("{client_nonce}{}", BASE64.encode(nonce_bytes));

        let credentials = lookup(&username);
        let (salt_b64, iterations) = match &credentials {
            Some(c) => (BASE64.encode(&c.salt), c.iterations),
            None => {
                // Decoy salt: the exchange proceeds and fails at the proof
                // step exactly like a wrong password.
                let mut decoy = [0u8; 16];
                getrandom::getrandom(&mut decoy).map_err(|_| SaslError::Crypto)?;
                (BASE64.encode(decoy), DEFAULT_ITERATIONS)
            }
        };

        let server_first = format!("r={combined_nonce},s={salt_b64},i={iterations}");
        self.state = ScramState::AwaitingFinal {
            username,
            credentials,
            combined_nonce,
            auth_message_prefix: format!("{bare},{server_first}"),
        };

        Ok(server_first.into_bytes())
    }

    /// Process the client-final-message. On success returns the
    /// server-final-message payload and the authenticated account name.
    pub fn step_final(&mut self, payload: &[u8]) -> Result<(Vec<u8>, String), SaslError> {
        let (username, credentials, combined_nonce, auth_message_prefix) =
            match std::mem::replace(&mut self.state, ScramState::Done) {
                ScramState::AwaitingFinal {
                    username,
                    credentials,
                    combined_nonce,
                    auth_message_prefix,
                } => (username, credentials, combined_nonce, auth_message_prefix),
                _ => return Err(SaslError::OutOfOrder),
            };

        let text = std::str::from_utf8(payload).map_err(|_| SaslError::InvalidEncoding)?;

        let mut channel_binding = None;
        let mut nonce = None;
        let mut proof_b64 = None;
        for part in text.split(',') {
            if let Some(v) = part.strip_prefix("c=") {
                channel_binding = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("r=") {
                nonce = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("p=") {
                proof_b64 = Some(v.to_string());
            }
        }

        // `biws` is base64("n,,"): the only channel binding we issue.
        match channel_binding.as_deref() {
            Some("biws") => {}
            _ => return Err(SaslError::InvalidChannelBinding),
        }
        match nonce {
            Some(n) if n == combined_nonce => {}
            _ => return Err(SaslError::NonceMismatch),
        }
        let proof_b64 = proof_b64.ok_or(SaslError::InvalidMessage)?;
        let proof = BASE64
            .decode(proof_b64.as_bytes())
            .map_err(|_| SaslError::InvalidEncoding)?;
        if proof.len() != 32 {
            return Err(SaslError::InvalidProofLength);
        }

        let credentials = credentials.ok_or(SaslError::AuthenticationFailed)?;

        let without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!("{auth_message_prefix},{without_proof}");

        // ClientKey = Proof XOR HMAC(StoredKey, AuthMessage)
        let client_signature = hmac_sha256(&credentials.stored_key, auth_message.as_bytes())?;
        let mut client_key = [0u8; 32];
        for (i, b) in client_key.iter_mut().enumerate() {
            *b = proof[i] ^ client_signature[i];
        }

        let computed_stored = sha256(&client_key);
        if computed_stored[..].ct_eq(&credentials.stored_key[..]).unwrap_u8() != 1 {
            return Err(SaslError::AuthenticationFailed);
        }

        let server_signature = hmac_sha256(&credentials.server_key, auth_message.as_bytes())?;
        let server_final = format!("v={}", BASE64.encode(server_signature));

        Ok((server_final.into_bytes(), username))
    }
}

/// Undo the `=2C` / `=3D` escapes in a SCRAM username attribute.
fn unescape_username(v: &str) -> Result<String, SaslError> {
    let mut out = String::with_capacity(v.len());
    let mut chars = v.chars();
    while let Some(c) = chars.next() {
        if c == '=' {
            match (chars.next(), chars.next()) {
                (Some('2'), Some('C')) => out.push(','),
                (Some('3'), Some('D')) => out.push('='),
                _ => return Err(SaslError::InvalidMessage),
            }
        } else if c == ',' {
            return Err(SaslError::InvalidMessage);
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], SaslError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| SaslError::Crypto)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the client side of the exchange against the verifier using the
    /// cleartext password, as a real client would.
    fn client_final(
        password: &str,
        client_first_bare: &str,
        server_first: &str,
    ) -> (String, [u8; 32]) {
        let mut salt = None;
        let mut iterations = None;
        let mut nonce = None;
        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(v).unwrap());
            } else if let Some(v) = part.strip_prefix("i=") {
                iterations = Some(v.parse::<u32>().unwrap());
            } else if let Some(v) = part.strip_prefix("r=") {
                nonce = Some(v.to_string());
            }
        }
        let (salt, iterations, nonce) = (salt.unwrap(), iterations.unwrap(), nonce.unwrap());

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &salt, iterations, &mut salted)
            .unwrap();
        let client_key = hmac_sha256(&salted, b"Client Key").unwrap();
        let stored_key = sha256(&client_key);

        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes()).unwrap();
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        let server_key = hmac_sha256(&salted, b"Server Key").unwrap();
        let expected_server_sig = hmac_sha256(&server_key, auth_message.as_bytes()).unwrap();

        (
            format!("{without_proof},p={}", BASE64.encode(proof)),
            expected_server_sig,
        )
    }

    #[test]
    fn full_exchange_succeeds() {
        let creds = ScramCredentials::derive("hunter2", b"pepper-salt", 4096).unwrap();

        let mut server = ScramServer::new();
        let bare = "n=alice,r=clientnonce00";
        let server_first = server
            .step_first(format!("n,,{bare}").as_bytes(), |user| {
                assert_eq!(user, "alice");
                Some(creds.clone())
            })
            .unwrap();
        let server_first = String::from_utf8(server_first).unwrap();

        let (final_msg, expected_sig) = client_final("hunter2", bare, &server_first);
        let (server_final, account) = server.step_final(final_msg.as_bytes()).unwrap();
        assert_eq!(account, "alice");
        assert_eq!(
            String::from_utf8(server_final).unwrap(),
            format!("v={}", BASE64.encode(expected_sig))
        );
    }

    #[test]
    fn wrong_password_fails() {
        let creds = ScramCredentials::derive("hunter2", b"pepper-salt", 4096).unwrap();

        let mut server = ScramServer::new();
        let bare = "n=alice,r=clientnonce00";
        let server_first = String::from_utf8(
            server
                .step_first(format!("n,,{bare}").as_bytes(), |_| Some(creds.clone()))
                .unwrap(),
        )
        .unwrap();

        let (final_msg, _) = client_final("wrong-password", bare, &server_first);
        assert_eq!(
            server.step_final(final_msg.as_bytes()).unwrap_err(),
            SaslError::AuthenticationFailed
        );
    }

    #[test]
    fn unknown_user_fails_like_wrong_password() {
        let mut server = ScramServer::new();
        let bare = "n=ghost,r=clientnonce00";
        let server_first = String::from_utf8(
            server
                .step_first(format!("n,,{bare}").as_bytes(), |_| None)
                .unwrap(),
        )
        .unwrap();
        // The decoy server-first is grammatically indistinguishable.
        assert!(server_first.starts_with("r=clientnonce00"));
        assert!(server_first.contains(",s="));
        assert!(server_first.contains(",i=4096"));

        let (final_msg, _) = client_final("whatever", bare, &server_first);
        assert_eq!(
            server.step_final(final_msg.as_bytes()).unwrap_err(),
            SaslError::AuthenticationFailed
        );
    }

    #[test]
    fn rejects_bad_gs2_header() {
        let mut server = ScramServer::new();
        assert_eq!(
            server
                .step_first(b"y,,n=alice,r=abc", |_| None)
                .unwrap_err(),
            SaslError::InvalidGs2Header
        );
    }

    #[test]
    fn rejects_wrong_channel_binding_token() {
        let creds = ScramCredentials::derive("pw", b"salt", 4096).unwrap();
        let mut server = ScramServer::new();
        let server_first = String::from_utf8(
            server
                .step_first(b"n,,n=alice,r=cn", |_| Some(creds))
                .unwrap(),
        )
        .unwrap();
        let nonce = server_first
            .split(',')
            .find_map(|p| p.strip_prefix("r="))
            .unwrap();
        let msg = format!("c=eSws,r={nonce},p={}", BASE64.encode([0u8; 32]));
        assert_eq!(
            server.step_final(msg.as_bytes()).unwrap_err(),
            SaslError::InvalidChannelBinding
        );
    }

    #[test]
    fn rejects_nonce_mismatch() {
        let creds = ScramCredentials::derive("pw", b"salt", 4096).unwrap();
        let mut server = ScramServer::new();
        server
            .step_first(b"n,,n=alice,r=cn", |_| Some(creds))
            .unwrap();
        let msg = format!("c=biws,r=not-the-nonce,p={}", BASE64.encode([0u8; 32]));
        assert_eq!(
            server.step_final(msg.as_bytes()).unwrap_err(),
            SaslError::NonceMismatch
        );
    }

    #[test]
    fn rejects_short_proof() {
        let creds = ScramCredentials::derive("pw", b"salt", 4096).unwrap();
        let mut server = ScramServer::new();
        let server_first = String::from_utf8(
            server
                .step_first(b"n,,n=alice,r=cn", |_| Some(creds))
                .unwrap(),
        )
        .unwrap();
        let nonce = server_first
            .split(',')
            .find_map(|p| p.strip_prefix("r="))
            .unwrap();
        let msg = format!("c=biws,r={nonce},p={}", BASE64.encode([0u8; 16]));
        assert_eq!(
            server.step_final(msg.as_bytes()).unwrap_err(),
            SaslError::InvalidProofLength
        );
    }

    #[test]
    fn username_escapes() {
        assert_eq!(unescape_username("a=2Cb").unwrap(), "a,b");
        assert_eq!(unescape_username("a=3Db").unwrap(), "a=b");
        assert!(unescape_username("a=2Xb").is_err());
    }

    #[test]
    fn out_of_order_steps_rejected() {
        let mut server = ScramServer::new();
        assert_eq!(
            server.step_final(b"c=biws,r=x,p=").unwrap_err(),
            SaslError::OutOfOrder
        );
    }
}
