//! MODE: user and channel mode changes.
//!
//! Parameterized changes are budgeted at [`loom_proto::MAX_MODES`] per
//! line; only effective changes (no-ops dropped) are echoed back to the
//! channel in a single summarizing MODE message.

use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::mode::{parse_channel_modes, parse_user_modes};
use loom_proto::{ChannelExt, Message, Numeric};

use super::{Context, Handler, HandlerResult, HandlerSpec};
use crate::links::protocol;
use crate::state::channel::{Channel, ChannelModes, ListEntry, MemberModes};
use crate::state::mode_builder::ModeBuilder;

pub struct ModeHandler;

#[async_trait]
impl Handler for ModeHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "MODE",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        if msg.params[0].as_str().is_channel_name() {
            channel_mode(ctx, msg).await
        } else {
            user_mode(ctx, msg).await
        }
    }
}

async fn user_mode(ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
    let target = msg.params[0].clone();

    if !loom_proto::irc_eq(&target, ctx.session.display_nick()) {
        if ctx.fabric.users.get_by_nick(&target).is_some() {
            ctx.numeric(
                Numeric::ERR_USERSDONTMATCH,
                ["Cant change mode for other users"],
            );
        } else {
            ctx.numeric(Numeric::ERR_NOSUCHNICK, [target.as_str(), "No such nick/channel"]);
        }
        return Ok(());
    }

    let Some(user_arc) = ctx.user() else {
        return Ok(());
    };

    let Some(flags) = msg.param(1) else {
        let modes = user_arc.read().await.modes.as_mode_string();
        ctx.numeric(Numeric::RPL_UMODEIS, [modes]);
        return Ok(());
    };

    let mut builder = ModeBuilder::new();
    {
        let mut user = user_arc.write().await;
        for (add, letter) in parse_user_modes(flags) {
            let applied = match letter {
                'i' => {
                    if user.modes.invisible != add {
                        user.modes.invisible = add;
                        if add {
                            ctx.fabric
                                .stats
                                .invisible_users
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        } else {
                            ctx.fabric
                                .stats
                                .invisible_users
                                .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        true
                    } else {
                        false
                    }
                }
                'w' => {
                    let changed = user.modes.wallops != add;
                    user.modes.wallops = add;
                    changed
                }
                's' => {
                    let changed = user.modes.snotices != add;
                    user.modes.snotices = add;
                    changed
                }
                'B' => {
                    let changed = user.modes.bot != add;
                    user.modes.bot = add;
                    changed
                }
                // Oper status may only be renounced here; OPER grants it.
                'o' if !add && user.modes.oper => {
                    user.modes.oper = false;
                    ctx.fabric
                        .stats
                        .operators
                        .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                    true
                }
                // +r and +Z reflect server-managed state.
                _ => false,
            };
            if applied {
                builder.push(add, letter, None);
            }
        }
    }

    if builder.is_empty() {
        return Ok(());
    }

    let (flags, _) = builder.render();
    let (prefix, nick, uid) = {
        let user = user_arc.read().await;
        (user.prefix(), user.nick.clone(), user.uid.clone())
    };
    ctx.send(Message::with_prefix(
        prefix,
        "MODE",
        vec![nick, flags.clone()],
    ));
    ctx.fabric
        .broker
        .propagate(Arc::new(protocol::user_mode(&uid, &flags)), None);
    Ok(())
}

/// Emit the `RPL_*LIST`/`RPL_ENDOF*LIST` block for one list mode.
fn send_list(ctx: &Context<'_>, channel: &str, letter: char, entries: &[ListEntry]) {
    let (entry_num, end_num, end_text) = match letter {
        'b' => (
            Numeric::RPL_BANLIST,
            Numeric::RPL_ENDOFBANLIST,
            "End of channel ban list",
        ),
        'e' => (
            Numeric::RPL_EXCEPTLIST,
            Numeric::RPL_ENDOFEXCEPTLIST,
            "End of channel exception list",
        ),
        'I' => (
            Numeric::RPL_INVITELIST,
            Numeric::RPL_ENDOFINVITELIST,
            "End of channel invite list",
        ),
        _ => return,
    };
    for entry in entries {
        ctx.numeric(
            entry_num,
            [
                channel.to_string(),
                entry.mask.clone(),
                entry.set_by.clone(),
                entry.set_at.to_string(),
            ],
        );
    }
    ctx.numeric(end_num, [channel, end_text]);
}

async fn channel_mode(ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
    let name = msg.params[0].clone();
    let Some(chan_arc) = ctx.fabric.channels.get(&name) else {
        ctx.numeric(Numeric::ERR_NOSUCHCHANNEL, [name.as_str(), "No such channel"]);
        return Ok(());
    };

    let Some(flags) = msg.param(1).map(str::to_owned) else {
        // Read-only: mode string, params for members only, creation time.
        let (canonical, letters, params, created) = {
            let chan = chan_arc.read().await;
            let member = chan.members.contains_key(&ctx.conn());
            let (letters, params) = chan.mode_string(member);
            (chan.name.clone(), letters, params, chan.created_at)
        };
        let mut reply = vec![canonical.clone(), letters];
        reply.extend(params);
        ctx.numeric(Numeric::RPL_CHANNELMODEIS, reply);
        ctx.numeric(
            Numeric::RPL_CREATIONTIME,
            [canonical, created.to_string()],
        );
        return Ok(());
    };

    let args: Vec<String> = msg.params.get(2..).map(|s| s.to_vec()).unwrap_or_default();
    let parsed = parse_channel_modes(&flags, &args);

    let (member_modes, canonical_name) = {
        let chan = chan_arc.read().await;
        (
            chan.members.get(&ctx.conn()).map(|m| m.modes),
            chan.name.clone(),
        )
    };

    let Some(member_modes) = member_modes else {
        ctx.numeric(
            Numeric::ERR_NOTONCHANNEL,
            [name.as_str(), "You're not on that channel"],
        );
        return Ok(());
    };

    // List queries are open to any member.
    for letter in &parsed.queries {
        let chan = chan_arc.read().await;
        let entries = match letter {
            'b' => chan.bans.clone(),
            'e' => chan.excepts.clone(),
            'I' => chan.invex.clone(),
            _ => continue,
        };
        drop(chan);
        send_list(ctx, &canonical_name, *letter, &entries);
    }

    if parsed.changes.is_empty() {
        return Ok(());
    }

    let Some(user_arc) = ctx.user() else {
        return Ok(());
    };
    let is_oper = user_arc.read().await.modes.oper;
    let op_plus = member_modes.has_op_or_higher();
    let halfop_only = !op_plus && member_modes.halfop;
    if !op_plus && !halfop_only {
        ctx.numeric(
            Numeric::ERR_CHANOPRIVSNEEDED,
            [name.as_str(), "You're not channel operator"],
        );
        return Ok(());
    }

    let (setter_prefix, setter_mask, uid) = {
        let user = user_arc.read().await;
        (user.prefix(), user.hostmask(), user.uid.clone())
    };
    let now = chrono::Utc::now().timestamp();

    let mut builder = ModeBuilder::new();
    {
        let mut chan = chan_arc.write().await;
        for change in &parsed.changes {
            // HalfOp may only grant/remove voice.
            if halfop_only && change.mode != 'v' {
                continue;
            }
            apply_channel_change(
                ctx,
                &mut chan,
                change.add,
                change.mode,
                change.arg.as_deref(),
                &setter_mask,
                member_modes,
                is_oper,
                now,
                &mut builder,
            )
            .await;
        }
    }

    if builder.is_empty() {
        return Ok(());
    }

    let (flags, params) = builder.render();
    let mut out_params = vec![canonical_name.clone(), flags.clone()];
    out_params.extend(params.clone());
    let out = Arc::new(Message::with_prefix(setter_prefix, "MODE", out_params));
    ctx.fabric
        .broker
        .send_to_channel(&canonical_name, &out, None)
        .await;

    if protocol::crosses_links(&canonical_name) {
        let chan_ts = chan_arc.read().await.created_at;
        ctx.fabric.broker.propagate(
            Arc::new(protocol::channel_mode(
                &uid,
                chan_ts,
                &canonical_name,
                &flags,
                &params,
            )),
            None,
        );
    }
    Ok(())
}

/// Apply one parsed change to the channel, recording it in the builder
/// only when it had an effect.
#[allow(clippy::too_many_arguments)]
async fn apply_channel_change(
    ctx: &Context<'_>,
    chan: &mut Channel,
    add: bool,
    mode: char,
    arg: Option<&str>,
    setter_mask: &str,
    setter_modes: MemberModes,
    setter_is_oper: bool,
    now: i64,
    builder: &mut ModeBuilder,
) {
    match mode {
        // Flag modes. `r` is server-managed (channel registration).
        'n' | 't' | 'i' | 'm' | 's' | 'p' => {
            let flag = ChannelModes::from_letter(mode).expect("known flag letter");
            let currently = chan.modes.contains(flag);
            if currently == add {
                return;
            }
            chan.modes.set(flag, add);
            builder.push(add, mode, None);
        }
        'k' => {
            if add {
                let Some(key) = arg else { return };
                if chan.key.as_deref() == Some(key) {
                    return;
                }
                chan.key = Some(key.to_string());
                builder.push(true, 'k', Some(key.to_string()));
            } else if chan.key.take().is_some() {
                builder.push(false, 'k', None);
            }
        }
        'l' => {
            if add {
                let Some(limit) = arg.and_then(|a| a.parse::<u32>().ok()).filter(|l| *l >= 1)
                else {
                    return;
                };
                if chan.limit == Some(limit) {
                    return;
                }
                chan.limit = Some(limit);
                builder.push(true, 'l', Some(limit.to_string()));
            } else if chan.limit.take().is_some() {
                builder.push(false, 'l', None);
            }
        }
        'b' | 'e' | 'I' => {
            let Some(mask) = arg else { return };
            let list = match mode {
                'b' => &mut chan.bans,
                'e' => &mut chan.excepts,
                _ => &mut chan.invex,
            };
            let effective = if add {
                Channel::add_list_entry(
                    list,
                    ListEntry {
                        mask: mask.to_string(),
                        set_by: setter_mask.to_string(),
                        set_at: now,
                    },
                )
            } else {
                Channel::remove_list_entry(list, mask)
            };
            if effective {
                builder.push(add, mode, Some(mask.to_string()));
            }
        }
        'o' | 'v' | 'h' | 'a' | 'q' => {
            let Some(nick) = arg else { return };
            let Some((target_conn, target_arc)) = ctx.fabric.users.get_by_nick(nick) else {
                ctx.numeric(Numeric::ERR_NOSUCHNICK, [nick, "No such nick/channel"]);
                return;
            };
            let Some(member) = chan.members.get_mut(&target_conn) else {
                ctx.numeric(
                    Numeric::ERR_USERNOTINCHANNEL,
                    [nick.to_string(), chan.name.clone(), "They aren't on that channel".to_string()],
                );
                return;
            };

            // Privilege-escalation guard: without oper override, nobody
            // grants themselves a rank they do not already hold.
            if add
                && !setter_is_oper
                && target_conn == ctx.conn()
                && matches!(mode, 'o' | 'a' | 'q')
                && !setter_modes.get(mode)
            {
                return;
            }

            if member.modes.get(mode) == add {
                return;
            }
            member.modes.set(mode, add);
            let member_nick = member.nick.clone();
            let updated = member.modes;

            // Mirror the edge on the user record.
            let folded = loom_proto::irc_to_lower(&chan.name);
            let mut target = target_arc.write().await;
            if let Some(mirror) = target.channels.get_mut(&folded) {
                *mirror = updated;
            }

            builder.push(add, mode, Some(member_nick));
        }
        _ => {}
    }
}
