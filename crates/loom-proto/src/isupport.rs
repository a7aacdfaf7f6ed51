//! ISUPPORT (numeric 005) token assembly.

use crate::chan::DEFAULT_CHANNEL_MAX_LEN;
use crate::nick::DEFAULT_NICK_MAX_LEN;

/// Maximum topic length, advertised as `TOPICLEN`.
pub const TOPIC_MAX_LEN: usize = 390;

/// Maximum channel memberships per user, advertised as `MAXCHANNELS`.
pub const MAX_CHANNELS: usize = 50;

/// Maximum ISUPPORT tokens per 005 line (the classic 13-token rule).
const TOKENS_PER_LINE: usize = 13;

/// Build the advertised ISUPPORT token list for this server.
pub fn isupport_tokens(network: &str) -> Vec<String> {
    vec![
        "CHANTYPES=#".to_string(),
        "PREFIX=(qaohv)~&@%+".to_string(),
        "CHANMODES=beI,k,l,imnpstr".to_string(),
        "CASEMAPPING=rfc1459".to_string(),
        format!("NICKLEN={DEFAULT_NICK_MAX_LEN}"),
        format!("CHANNELLEN={DEFAULT_CHANNEL_MAX_LEN}"),
        format!("TOPICLEN={TOPIC_MAX_LEN}"),
        format!("NETWORK={network}"),
        "STATUSMSG=~&@%+".to_string(),
        "ELIST=MNUCT".to_string(),
        "EXTBAN=~,arcRszoqfT".to_string(),
        "WHOX".to_string(),
        "USERIP".to_string(),
        format!("MAXCHANNELS={MAX_CHANNELS}"),
    ]
}

/// Chunk the token list into 005 lines of at most 13 tokens each.
pub fn isupport_lines(network: &str) -> Vec<Vec<String>> {
    isupport_tokens(network)
        .chunks(TOKENS_PER_LINE)
        .map(|c| c.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_required_tokens() {
        let tokens = isupport_tokens("LoomNet");
        for required in [
            "CHANTYPES=#",
            "PREFIX=(qaohv)~&@%+",
            "CHANMODES=beI,k,l,imnpstr",
            "CASEMAPPING=rfc1459",
            "NICKLEN=30",
            "CHANNELLEN=50",
            "TOPICLEN=390",
            "NETWORK=LoomNet",
            "STATUSMSG=~&@%+",
            "ELIST=MNUCT",
            "EXTBAN=~,arcRszoqfT",
            "WHOX",
            "USERIP",
            "MAXCHANNELS=50",
        ] {
            assert!(
                tokens.iter().any(|t| t == required),
                "missing token {required}"
            );
        }
    }

    #[test]
    fn lines_respect_token_cap() {
        let lines = isupport_lines("LoomNet");
        assert!(lines.len() >= 2);
        assert!(lines.iter().all(|l| l.len() <= 13));
    }
}
