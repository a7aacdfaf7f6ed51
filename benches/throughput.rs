use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use loom_proto::{Message, Prefix};

// Codec baseline: parse and serialize cost per message, independent of any
// server state.

fn message_creation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("message");
    group.throughput(Throughput::Elements(1));

    group.bench_function("create_privmsg", |b| {
        b.iter(|| {
            Message::with_prefix(
                Prefix::Nickname(
                    "sender".to_string(),
                    "user".to_string(),
                    "host".to_string(),
                ),
                "PRIVMSG",
                vec!["#channel".to_string(), "Hello world".to_string()],
            )
        })
    });

    group.finish();
}

fn message_parsing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    let raw = b"@time=2023-01-01T12:00:00.000Z :sender!user@host PRIVMSG #channel :Hello world\r\n";
    group.throughput(Throughput::Bytes(raw.len() as u64));

    group.bench_function("parse_privmsg", |b| {
        b.iter(|| {
            std::str::from_utf8(raw)
                .unwrap()
                .parse::<Message>()
                .unwrap()
        })
    });

    group.finish();
}

fn message_serialize_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    let msg: Message = ":sender!user@host PRIVMSG #channel :Hello world"
        .parse()
        .unwrap();
    group.throughput(Throughput::Elements(1));

    group.bench_function("format_privmsg", |b| b.iter(|| msg.to_string()));

    group.finish();
}

criterion_group!(
    benches,
    message_creation_benchmark,
    message_parsing_benchmark,
    message_serialize_benchmark
);
criterion_main!(benches);
