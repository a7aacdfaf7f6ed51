//! Security subsystems: admission, flood control, DNSBL, gateway trust,
//! extended bans, server bans, and credential handling.

pub mod admission;
pub mod bans;
pub mod certfp;
pub mod dnsbl;
pub mod extban;
pub mod flood;
pub mod password;
pub mod webirc;
