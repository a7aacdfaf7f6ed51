//! WEBIRC: trusted-gateway identity spoofing.
//!
//! `WEBIRC <password> <gateway> <hostname> <ip> [:options]`, accepted only
//! before registration and only from configured gateway sources. On
//! success the session's host and address are replaced with the end user's
//! real ones; a trusted gateway may also carry `secure`.

use async_trait::async_trait;
use loom_proto::Message;
use tracing::{info, warn};

use super::{Context, Handler, HandlerResult, HandlerSpec};
use crate::error::HandlerError;
use crate::security::webirc;

pub struct WebircHandler;

#[async_trait]
impl Handler for WebircHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "WEBIRC",
            min_params: 4,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        if ctx.session.is_registered() || ctx.session.webirc_gateway.is_some() {
            // One shot, pre-registration only; a second attempt is hostile.
            return Err(HandlerError::Close("WEBIRC not permitted".to_string()));
        }

        let password = &msg.params[0];
        let gateway = &msg.params[1];
        let hostname = &msg.params[2];
        let ip_arg = &msg.params[3];
        let options = msg.param(4).unwrap_or_default();

        let Ok(real_ip) = ip_arg.parse() else {
            warn!(conn = %ctx.conn(), gateway = %gateway, "WEBIRC with unparseable ip");
            return Err(HandlerError::Close("Invalid WEBIRC".to_string()));
        };

        let blocks = &ctx.fabric.config.security.webirc_gateways;
        let Some(block) = webirc::authorize(blocks, ctx.session.ip, gateway, password) else {
            warn!(
                conn = %ctx.conn(),
                source = %ctx.session.ip,
                gateway = %gateway,
                "rejected WEBIRC"
            );
            return Err(HandlerError::Close("Invalid WEBIRC".to_string()));
        };

        let spoof_secure = block.trusted_secure
            && options
                .split_whitespace()
                .any(|opt| opt == "secure" || opt.starts_with("secure="));

        ctx.session.ip = real_ip;
        ctx.session.host = hostname.clone();
        if spoof_secure {
            ctx.session.secure = true;
        }
        ctx.session.webirc_gateway = Some(block.name.clone());

        info!(
            conn = %ctx.conn(),
            gateway = %block.name,
            host = %hostname,
            ip = %real_ip,
            "WEBIRC identity applied"
        );
        Ok(())
    }
}
