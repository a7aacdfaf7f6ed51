//! Dispatcher-level scenario tests: literal client input lines in, state
//! and wire output asserted, no sockets involved.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use loom_proto::Message;
use tokio::sync::mpsc;

use super::{Context, Registry};
use crate::config::Config;
use crate::security::password;
use crate::services::{Collaborators, ConfigOperatorStore, MemoryAccountService, NullHooks};
use crate::state::session::Session;
use crate::state::uid::ConnectionId;
use crate::state::Fabric;

const TEST_CONFIG: &str = r#"
    [server]
    name = "test.loom.example"
    network = "LoomNet"
    sid = "001"

    [[listen]]
    addr = "127.0.0.1:0"
"#;

async fn test_fabric() -> (Arc<Fabric>, Arc<Registry>) {
    let config: Config = toml::from_str(TEST_CONFIG).unwrap();

    let accounts = MemoryAccountService::new();
    let hash = password::hash_password("hunter2".to_string()).await.unwrap();
    accounts.add_account("alice", hash, None, None);

    let collaborators = Collaborators {
        accounts: Arc::new(accounts),
        operators: Arc::new(ConfigOperatorStore::new(Vec::new())),
        hooks: Arc::new(NullHooks),
    };

    let (fabric, _disconnect_rx) = Fabric::new(config, collaborators);
    (fabric, Arc::new(Registry::new()))
}

struct TestClient {
    session: Session,
    rx: mpsc::Receiver<Arc<Message>>,
}

impl TestClient {
    fn connect(fabric: &Arc<Fabric>, secure: bool) -> TestClient {
        let conn_id = ConnectionId::next();
        let (rx, _bytes) = fabric.broker.register(conn_id);
        TestClient {
            session: Session::new(
                conn_id,
                "127.0.0.1".parse().unwrap(),
                secure,
                None,
                "localhost".into(),
            ),
            rx,
        }
    }

    fn conn(&self) -> ConnectionId {
        self.session.conn_id
    }

    /// Drain queued output as serialized lines.
    fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg.to_string());
        }
        out
    }
}

async fn send(
    fabric: &Arc<Fabric>,
    registry: &Arc<Registry>,
    client: &mut TestClient,
    line: &str,
) {
    let msg: Message = line.parse().expect("test line parses");
    let mut ctx = Context {
        fabric,
        session: &mut client.session,
    };
    // Terminal outcomes (Quit/Close) are fine; tests assert on state.
    let _ = registry.dispatch(&mut ctx, &msg).await;
}

/// Drive a client through the standard registration exchange.
async fn register(
    fabric: &Arc<Fabric>,
    registry: &Arc<Registry>,
    client: &mut TestClient,
    nick: &str,
) {
    send(fabric, registry, client, &format!("NICK {nick}")).await;
    send(
        fabric,
        registry,
        client,
        &format!("USER {} 0 * :{} Example", nick.to_lowercase(), nick),
    )
    .await;
    assert!(client.session.is_registered(), "{nick} should be registered");
}

fn has_numeric(lines: &[String], numeric: &str) -> bool {
    lines.iter().any(|l| {
        l.split(' ')
            .nth(1)
            .is_some_and(|token| token == numeric)
    })
}

#[tokio::test]
async fn handshake_and_registration_burst() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);

    send(&fabric, &registry, &mut alice, "CAP LS 302").await;
    send(&fabric, &registry, &mut alice, "NICK Alice").await;
    send(&fabric, &registry, &mut alice, "USER alice 0 * :Alice Example").await;
    assert!(
        !alice.session.is_registered(),
        "CAP negotiation suspends registration"
    );
    send(&fabric, &registry, &mut alice, "CAP END").await;

    assert!(alice.session.is_registered());
    let lines = alice.drain();

    assert!(
        lines.iter().any(|l| l.contains("CAP * LS")),
        "CAP LS reply expected, got {lines:?}"
    );
    for numeric in ["001", "002", "003", "004", "005", "251", "255", "422"] {
        assert!(has_numeric(&lines, numeric), "missing {numeric} in {lines:?}");
    }
    assert!(
        lines.iter().any(|l| l.contains("Welcome to the LoomNet")),
        "001 text"
    );

    // Repository state: fold-insensitive lookup, record agrees.
    let (conn, user_arc) = fabric.users.get_by_nick("ALICE").unwrap();
    assert_eq!(conn, alice.conn());
    let user = user_arc.read().await;
    assert_eq!(user.nick, "Alice");
    assert_eq!(user.user, "alice");
    assert!(user.uid.starts_with("001"));
}

#[tokio::test]
async fn channel_create_grants_op() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    alice.drain();

    send(&fabric, &registry, &mut alice, "JOIN #dev").await;
    let lines = alice.drain();

    assert!(
        lines.iter().any(|l| l.starts_with(":Alice!alice@") && l.contains("JOIN #dev")),
        "JOIN echo expected in {lines:?}"
    );
    assert!(
        lines.iter().any(|l| l.contains(" 353 ") && l.contains("@Alice")),
        "NAMES with op prefix expected in {lines:?}"
    );
    assert!(has_numeric(&lines, "366"));

    let chan = fabric.channels.get("#dev").unwrap();
    let chan = chan.read().await;
    assert!(chan.members.get(&alice.conn()).unwrap().modes.op);

    // Mirror edge on the user record.
    let (_, user_arc) = fabric.users.get_by_nick("Alice").unwrap();
    assert!(user_arc.read().await.channels.contains_key("#dev"));
}

#[tokio::test]
async fn join_is_idempotent() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;

    send(&fabric, &registry, &mut alice, "JOIN #dev").await;
    alice.drain();
    send(&fabric, &registry, &mut alice, "JOIN #dev").await;
    let lines = alice.drain();

    assert!(lines.is_empty(), "rejoin must be silent, got {lines:?}");
    let chan = fabric.channels.get("#dev").unwrap();
    assert_eq!(chan.read().await.members.len(), 1);
}

#[tokio::test]
async fn nick_collision_rejected() {
    let (fabric, registry) = test_fabric().await;
    let mut bob = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut bob, "Bob").await;

    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    alice.drain();

    send(&fabric, &registry, &mut alice, "NICK Bob").await;
    let lines = alice.drain();

    assert!(has_numeric(&lines, "433"), "expected 433 in {lines:?}");
    assert!(
        lines.iter().any(|l| l.contains("Nickname is already in use")),
        "433 text"
    );

    // Alice unchanged, index still points at Bob.
    let user_arc = fabric.users.get(alice.conn()).unwrap();
    assert_eq!(user_arc.read().await.nick, "Alice");
    assert_eq!(fabric.users.nick_owner("BOB"), Some(bob.conn()));
}

#[tokio::test]
async fn ban_blocks_join_until_excepted() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    send(&fabric, &registry, &mut alice, "JOIN #dev").await;
    send(&fabric, &registry, &mut alice, "MODE #dev +b *!*@evil.host").await;
    alice.drain();

    let mut eve = TestClient::connect(&fabric, false);
    eve.session.host = "evil.host".to_string();
    register(&fabric, &registry, &mut eve, "Eve").await;
    eve.drain();

    send(&fabric, &registry, &mut eve, "JOIN #dev").await;
    let lines = eve.drain();
    assert!(has_numeric(&lines, "474"), "expected 474 in {lines:?}");
    assert!(lines.iter().any(|l| l.contains("Cannot join channel (+b)")));
    {
        let chan = fabric.channels.get("#dev").unwrap();
        assert!(!chan.read().await.members.contains_key(&eve.conn()));
    }

    // An exception overrides the ban.
    send(&fabric, &registry, &mut alice, "MODE #dev +e Eve!*@*").await;
    send(&fabric, &registry, &mut eve, "JOIN #dev").await;
    let lines = eve.drain();
    assert!(has_numeric(&lines, "366"), "join should succeed, got {lines:?}");
    let chan = fabric.channels.get("#dev").unwrap();
    assert!(chan.read().await.members.contains_key(&eve.conn()));
}

#[tokio::test]
async fn quit_fanout_deduplicates_across_channels() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    let mut bob = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut bob, "Bob").await;

    for chan in ["#dev", "#ops", "#lobby"] {
        send(&fabric, &registry, &mut alice, &format!("JOIN {chan}")).await;
        send(&fabric, &registry, &mut bob, &format!("JOIN {chan}")).await;
    }
    bob.drain();

    send(&fabric, &registry, &mut alice, "QUIT :bye").await;

    let quits: Vec<String> = bob
        .drain()
        .into_iter()
        .filter(|l| l.contains("QUIT"))
        .collect();
    assert_eq!(
        quits.len(),
        1,
        "exactly one QUIT for a shared-channel peer, got {quits:?}"
    );
    assert!(quits[0].starts_with(":Alice!alice@"));
    assert!(quits[0].ends_with(":Quit: bye"));

    assert!(fabric.users.get_by_nick("Alice").is_none());
    assert!(fabric.users.get(alice.conn()).is_none());
}

#[tokio::test]
async fn sasl_plain_over_tls() {
    let (fabric, registry) = test_fabric().await;
    let mut client = TestClient::connect(&fabric, true);

    send(&fabric, &registry, &mut client, "CAP LS 302").await;
    send(&fabric, &registry, &mut client, "CAP REQ :sasl").await;
    let lines = client.drain();
    assert!(
        lines.iter().any(|l| l.contains("CAP * ACK") && l.contains("sasl")),
        "sasl ACK expected in {lines:?}"
    );

    send(&fabric, &registry, &mut client, "AUTHENTICATE PLAIN").await;
    let lines = client.drain();
    assert!(
        lines.iter().any(|l| l.contains("AUTHENTICATE +")),
        "empty challenge expected in {lines:?}"
    );

    let payload = BASE64.encode(b"\0alice\0hunter2");
    send(
        &fabric,
        &registry,
        &mut client,
        &format!("AUTHENTICATE {payload}"),
    )
    .await;
    let lines = client.drain();
    assert!(has_numeric(&lines, "900"), "expected 900 in {lines:?}");
    assert!(
        lines.iter().any(|l| l.contains("You are now logged in as alice")),
        "900 text"
    );
    assert!(has_numeric(&lines, "903"), "expected 903 in {lines:?}");
    assert_eq!(client.session.account.as_deref(), Some("alice"));

    send(&fabric, &registry, &mut client, "NICK Alice").await;
    send(&fabric, &registry, &mut client, "USER alice 0 * :Alice Example").await;
    send(&fabric, &registry, &mut client, "CAP END").await;
    assert!(client.session.is_registered());

    let (_, user_arc) = fabric.users.get_by_nick("Alice").unwrap();
    let user = user_arc.read().await;
    assert_eq!(user.account.as_deref(), Some("alice"));
    assert!(user.modes.registered);
}

#[tokio::test]
async fn sasl_plain_refused_without_tls() {
    let (fabric, registry) = test_fabric().await;
    let mut client = TestClient::connect(&fabric, false);

    send(&fabric, &registry, &mut client, "CAP LS 302").await;
    // All mechanisms require TLS, so the sasl capability itself NAKs.
    send(&fabric, &registry, &mut client, "CAP REQ :sasl").await;
    let lines = client.drain();
    assert!(
        lines.iter().any(|l| l.contains("CAP * NAK")),
        "expected NAK in {lines:?}"
    );
}

#[tokio::test]
async fn cap_req_is_atomic() {
    let (fabric, registry) = test_fabric().await;
    let mut client = TestClient::connect(&fabric, false);

    send(&fabric, &registry, &mut client, "CAP LS 302").await;
    client.drain();
    send(
        &fabric,
        &registry,
        &mut client,
        "CAP REQ :multi-prefix draft/does-not-exist",
    )
    .await;
    let lines = client.drain();
    assert!(lines.iter().any(|l| l.contains("CAP * NAK")));
    assert!(
        !client.session.caps.contains(loom_proto::CapSet::MULTI_PREFIX),
        "NAK must leave state unchanged"
    );
}

#[tokio::test]
async fn unregistered_commands_rejected() {
    let (fabric, registry) = test_fabric().await;
    let mut client = TestClient::connect(&fabric, false);

    send(&fabric, &registry, &mut client, "PRIVMSG #dev :hello").await;
    let lines = client.drain();
    assert!(has_numeric(&lines, "451"), "expected 451 in {lines:?}");
}

#[tokio::test]
async fn privmsg_moderated_channel_requires_voice() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    send(&fabric, &registry, &mut alice, "JOIN #dev").await;
    send(&fabric, &registry, &mut alice, "MODE #dev +m").await;

    let mut bob = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut bob, "Bob").await;
    send(&fabric, &registry, &mut bob, "JOIN #dev").await;
    bob.drain();
    alice.drain();

    send(&fabric, &registry, &mut bob, "PRIVMSG #dev :muted?").await;
    let lines = bob.drain();
    assert!(has_numeric(&lines, "404"), "expected 404 in {lines:?}");
    assert!(alice.drain().iter().all(|l| !l.contains("muted?")));

    // Voice lifts the gate.
    send(&fabric, &registry, &mut alice, "MODE #dev +v Bob").await;
    send(&fabric, &registry, &mut bob, "PRIVMSG #dev :audible").await;
    assert!(alice.drain().iter().any(|l| l.contains("audible")));
}

#[tokio::test]
async fn mode_summarizes_only_effective_changes() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    send(&fabric, &registry, &mut alice, "JOIN #dev").await;
    alice.drain();

    // +n is already set on creation: a no-op that must not be echoed.
    send(&fabric, &registry, &mut alice, "MODE #dev +n").await;
    assert!(
        alice.drain().iter().all(|l| !l.contains("MODE #dev")),
        "re-setting +n must not broadcast"
    );

    send(&fabric, &registry, &mut alice, "MODE #dev +mk sekrit").await;
    let lines = alice.drain();
    assert!(
        lines.iter().any(|l| l.contains("MODE #dev +mk sekrit")),
        "effective changes summarized, got {lines:?}"
    );
}

#[tokio::test]
async fn notice_never_errors() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    alice.drain();

    send(&fabric, &registry, &mut alice, "NOTICE #nonexistent :hi").await;
    send(&fabric, &registry, &mut alice, "NOTICE ghost :hi").await;
    let lines = alice.drain();
    assert!(lines.is_empty(), "NOTICE must be silent, got {lines:?}");

    send(&fabric, &registry, &mut alice, "PRIVMSG #nonexistent :hi").await;
    assert!(has_numeric(&alice.drain(), "403"));
}

#[tokio::test]
async fn away_reply_on_privmsg() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    let mut bob = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut bob, "Bob").await;

    send(&fabric, &registry, &mut bob, "AWAY :gone fishing").await;
    assert!(has_numeric(&bob.drain(), "306"));
    alice.drain();

    send(&fabric, &registry, &mut alice, "PRIVMSG Bob :you there?").await;
    let lines = alice.drain();
    assert!(has_numeric(&lines, "301"), "expected 301 in {lines:?}");
    assert!(lines.iter().any(|l| l.contains("gone fishing")));

    let delivered = bob.drain();
    assert!(delivered.iter().any(|l| l.contains("you there?")));
}

#[tokio::test]
async fn kick_requires_op() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    send(&fabric, &registry, &mut alice, "JOIN #dev").await;

    let mut bob = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut bob, "Bob").await;
    send(&fabric, &registry, &mut bob, "JOIN #dev").await;
    bob.drain();

    send(&fabric, &registry, &mut bob, "KICK #dev Alice :no").await;
    assert!(has_numeric(&bob.drain(), "482"));

    alice.drain();
    send(&fabric, &registry, &mut alice, "KICK #dev Bob :yes").await;
    let lines = alice.drain();
    assert!(lines.iter().any(|l| l.contains("KICK #dev Bob")));
    let chan = fabric.channels.get("#dev").unwrap();
    assert!(!chan.read().await.members.contains_key(&bob.conn()));
}

#[tokio::test]
async fn topic_protected_by_plus_t() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    send(&fabric, &registry, &mut alice, "JOIN #dev").await;

    let mut bob = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut bob, "Bob").await;
    send(&fabric, &registry, &mut bob, "JOIN #dev").await;
    bob.drain();

    // +t is default: non-op set fails.
    send(&fabric, &registry, &mut bob, "TOPIC #dev :bob's topic").await;
    assert!(has_numeric(&bob.drain(), "482"));

    alice.drain();
    send(&fabric, &registry, &mut alice, "TOPIC #dev :release day").await;
    assert!(alice.drain().iter().any(|l| l.contains("TOPIC #dev :release day")));

    send(&fabric, &registry, &mut bob, "TOPIC #dev").await;
    let lines = bob.drain();
    assert!(has_numeric(&lines, "332"));
    assert!(lines.iter().any(|l| l.contains("release day")));
}

#[tokio::test]
async fn invite_only_channel_honors_invite() {
    let (fabric, registry) = test_fabric().await;
    let mut alice = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut alice, "Alice").await;
    send(&fabric, &registry, &mut alice, "JOIN #inner").await;
    send(&fabric, &registry, &mut alice, "MODE #inner +i").await;

    let mut bob = TestClient::connect(&fabric, false);
    register(&fabric, &registry, &mut bob, "Bob").await;
    bob.drain();

    send(&fabric, &registry, &mut bob, "JOIN #inner").await;
    assert!(has_numeric(&bob.drain(), "473"));

    alice.drain();
    send(&fabric, &registry, &mut alice, "INVITE Bob #inner").await;
    assert!(has_numeric(&alice.drain(), "341"));
    let invites: Vec<String> = bob.drain();
    assert!(invites.iter().any(|l| l.contains("INVITE Bob #inner")));

    send(&fabric, &registry, &mut bob, "JOIN #inner").await;
    assert!(has_numeric(&bob.drain(), "366"));
}
