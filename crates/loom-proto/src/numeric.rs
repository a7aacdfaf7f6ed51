//! IRC numeric reply codes.
//!
//! The subset of RFC 2812 / IRCv3 numerics this server produces. Codes are
//! three-digit decimal on the wire and are always sent with the server name
//! as source and the target user's current nickname (or `*` pre-nick) as
//! the first parameter.
//!
//! # Reference
//! - RFC 2812: Internet Relay Chat: Client Protocol
//! - Modern IRC documentation: <https://modern.ircdocs.horse/>

#![allow(non_camel_case_types)]

use std::fmt;

/// IRC server response code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Numeric {
    // === Connection registration (001-099) ===
    /// 001 - Welcome to the IRC network
    RPL_WELCOME = 1,
    /// 002 - Your host is running version
    RPL_YOURHOST = 2,
    /// 003 - Server creation date
    RPL_CREATED = 3,
    /// 004 - Server info (name, version, user modes, channel modes)
    RPL_MYINFO = 4,
    /// 005 - Server supported features (ISUPPORT)
    RPL_ISUPPORT = 5,

    // === Command replies (200-399) ===
    /// 221 - User mode string
    RPL_UMODEIS = 221,
    /// 251 - LUSER client count
    RPL_LUSERCLIENT = 251,
    /// 252 - LUSER operator count
    RPL_LUSEROP = 252,
    /// 253 - LUSER unknown connections
    RPL_LUSERUNKNOWN = 253,
    /// 254 - LUSER channel count
    RPL_LUSERCHANNELS = 254,
    /// 255 - LUSER me
    RPL_LUSERME = 255,
    /// 265 - Local user count
    RPL_LOCALUSERS = 265,
    /// 266 - Global user count
    RPL_GLOBALUSERS = 266,
    /// 301 - Away message
    RPL_AWAY = 301,
    /// 302 - Userhost reply
    RPL_USERHOST = 302,
    /// 303 - Ison reply
    RPL_ISON = 303,
    /// 305 - No longer away
    RPL_UNAWAY = 305,
    /// 306 - Now away
    RPL_NOWAWAY = 306,
    /// 311 - Whois user info
    RPL_WHOISUSER = 311,
    /// 312 - Whois server info
    RPL_WHOISSERVER = 312,
    /// 313 - Whois operator
    RPL_WHOISOPERATOR = 313,
    /// 314 - Whowas user info
    RPL_WHOWASUSER = 314,
    /// 315 - End of WHO list
    RPL_ENDOFWHO = 315,
    /// 317 - Whois idle time
    RPL_WHOISIDLE = 317,
    /// 318 - End of WHOIS
    RPL_ENDOFWHOIS = 318,
    /// 319 - Whois channel list
    RPL_WHOISCHANNELS = 319,
    /// 321 - LIST header
    RPL_LISTSTART = 321,
    /// 322 - LIST entry
    RPL_LIST = 322,
    /// 323 - End of LIST
    RPL_LISTEND = 323,
    /// 324 - Channel mode string
    RPL_CHANNELMODEIS = 324,
    /// 329 - Channel creation time
    RPL_CREATIONTIME = 329,
    /// 331 - No topic set
    RPL_NOTOPIC = 331,
    /// 332 - Channel topic
    RPL_TOPIC = 332,
    /// 333 - Topic setter and time
    RPL_TOPICWHOTIME = 333,
    /// 341 - Inviting user to channel
    RPL_INVITING = 341,
    /// 346 - Invite mask entry
    RPL_INVITELIST = 346,
    /// 347 - End of invite mask list
    RPL_ENDOFINVITELIST = 347,
    /// 348 - Ban exception entry
    RPL_EXCEPTLIST = 348,
    /// 349 - End of ban exception list
    RPL_ENDOFEXCEPTLIST = 349,
    /// 352 - WHO reply (classic)
    RPL_WHOREPLY = 352,
    /// 353 - NAMES reply
    RPL_NAMREPLY = 353,
    /// 354 - WHOX reply
    RPL_WHOSPCRPL = 354,
    /// 366 - End of NAMES
    RPL_ENDOFNAMES = 366,
    /// 367 - Ban list entry
    RPL_BANLIST = 367,
    /// 368 - End of ban list
    RPL_ENDOFBANLIST = 368,
    /// 369 - End of WHOWAS
    RPL_ENDOFWHOWAS = 369,
    /// 372 - MOTD line
    RPL_MOTD = 372,
    /// 375 - MOTD start
    RPL_MOTDSTART = 375,
    /// 376 - End of MOTD
    RPL_ENDOFMOTD = 376,
    /// 381 - You are now an operator
    RPL_YOUREOPER = 381,

    // === Error replies (400-599) ===
    /// 401 - No such nick/channel
    ERR_NOSUCHNICK = 401,
    /// 403 - No such channel
    ERR_NOSUCHCHANNEL = 403,
    /// 404 - Cannot send to channel
    ERR_CANNOTSENDTOCHAN = 404,
    /// 405 - Too many channels
    ERR_TOOMANYCHANNELS = 405,
    /// 406 - There was no such nickname
    ERR_WASNOSUCHNICK = 406,
    /// 412 - No text to send
    ERR_NOTEXTTOSEND = 412,
    /// 421 - Unknown command
    ERR_UNKNOWNCOMMAND = 421,
    /// 422 - No MOTD file
    ERR_NOMOTD = 422,
    /// 432 - Erroneous nickname
    ERR_ERRONEUSNICKNAME = 432,
    /// 433 - Nickname already in use
    ERR_NICKNAMEINUSE = 433,
    /// 441 - User not in channel
    ERR_USERNOTINCHANNEL = 441,
    /// 442 - Not on channel
    ERR_NOTONCHANNEL = 442,
    /// 443 - User already on channel
    ERR_USERONCHANNEL = 443,
    /// 451 - Not registered
    ERR_NOTREGISTERED = 451,
    /// 461 - Need more parameters
    ERR_NEEDMOREPARAMS = 461,
    /// 462 - Already registered
    ERR_ALREADYREGISTERED = 462,
    /// 464 - Password mismatch
    ERR_PASSWDMISMATCH = 464,
    /// 471 - Channel is full (+l)
    ERR_CHANNELISFULL = 471,
    /// 473 - Invite-only channel (+i)
    ERR_INVITEONLYCHAN = 473,
    /// 474 - Banned from channel (+b)
    ERR_BANNEDFROMCHAN = 474,
    /// 475 - Bad channel key (+k)
    ERR_BADCHANNELKEY = 475,
    /// 476 - Bad channel mask
    ERR_BADCHANMASK = 476,
    /// 481 - No privileges
    ERR_NOPRIVILEGES = 481,
    /// 482 - Channel operator privileges needed
    ERR_CHANOPRIVSNEEDED = 482,
    /// 502 - Cannot change mode for other users
    ERR_USERSDONTMATCH = 502,

    // === Extended numerics (600-999) ===
    /// 671 - Whois secure connection
    RPL_WHOISSECURE = 671,
    /// 900 - SASL logged in
    RPL_LOGGEDIN = 900,
    /// 901 - SASL logged out
    RPL_LOGGEDOUT = 901,
    /// 902 - Nick locked, SASL refused
    ERR_NICKLOCKED = 902,
    /// 903 - SASL authentication successful
    RPL_SASLSUCCESS = 903,
    /// 904 - SASL authentication failed
    ERR_SASLFAIL = 904,
    /// 905 - SASL message too long
    ERR_SASLTOOLONG = 905,
    /// 906 - SASL aborted
    ERR_SASLABORTED = 906,
    /// 907 - SASL already authenticated
    ERR_SASLALREADY = 907,
}

impl Numeric {
    /// Numeric code as a `u16`.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Whether this numeric is in the error range.
    pub const fn is_error(self) -> bool {
        let c = self.code();
        (c >= 400 && c < 600)
            || matches!(
                self,
                Numeric::ERR_NICKLOCKED
                    | Numeric::ERR_SASLFAIL
                    | Numeric::ERR_SASLTOOLONG
                    | Numeric::ERR_SASLABORTED
                    | Numeric::ERR_SASLALREADY
            )
    }
}

impl fmt::Display for Numeric {
    /// Formats as the three-digit wire token (e.g. `001`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_wire_token() {
        assert_eq!(Numeric::RPL_WELCOME.code(), 1);
        assert_eq!(Numeric::RPL_WELCOME.to_string(), "001");
        assert_eq!(Numeric::ERR_NEEDMOREPARAMS.to_string(), "461");
        assert_eq!(Numeric::RPL_LOGGEDIN.to_string(), "900");
    }

    #[test]
    fn error_classification() {
        assert!(Numeric::ERR_NICKNAMEINUSE.is_error());
        assert!(Numeric::ERR_SASLFAIL.is_error());
        assert!(!Numeric::RPL_TOPIC.is_error());
        assert!(!Numeric::RPL_LOGGEDIN.is_error());
    }
}
