//! Codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tsquery_protocol::{escape, parse_records, unescape, Command, LineDecoder, QueryError};

fn client_list_line(clients: usize) -> String {
    (0..clients)
        .map(|i| {
            format!(
                "clid={} cid=1 client_database_id={} client_nickname=user\\s{} client_type=0",
                i,
                i + 100,
                i
            )
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn bench_escape(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape");

    for size in [100, 1000, 10000] {
        let value = "hello world|a/b\\c\t".repeat(size / 18 + 1);

        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &value, |b, value| {
            b.iter(|| black_box(escape(value)));
        });
    }

    group.finish();
}

fn bench_unescape(c: &mut Criterion) {
    let mut group = c.benchmark_group("unescape");

    for size in [100, 1000, 10000] {
        let escaped = escape(&"hello world|a/b\\c\t".repeat(size / 18 + 1));

        group.throughput(Throughput::Bytes(escaped.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &escaped, |b, escaped| {
            b.iter(|| black_box(unescape(escaped)));
        });
    }

    group.finish();
}

fn bench_command_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_encode");

    for targets in [1, 10, 100] {
        let command = Command::new("clientkick")
            .arg("clid", (0..targets).collect::<Vec<u32>>())
            .arg("reasonid", 5)
            .arg("reasonmsg", "rule violation: spamming the lobby");

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(targets), &command, |b, command| {
            b.iter(|| black_box(command.encode()));
        });
    }

    group.finish();
}

fn bench_parse_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_records");

    for clients in [1, 32, 512] {
        let line = client_list_line(clients);

        group.throughput(Throughput::Elements(clients as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clients), &line, |b, line| {
            b.iter(|| black_box(parse_records(line)));
        });
    }

    group.finish();
}

fn bench_status_parse(c: &mut Criterion) {
    c.bench_function("status_parse", |b| {
        b.iter(|| {
            black_box(
                QueryError::parse(
                    "error id=524 msg=client\\sis\\sflooding extra_msg=please\\swait\\s1\\sseconds",
                )
                .unwrap(),
            )
        });
    });
}

fn bench_line_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_decoder");

    for clients in [1, 32, 512] {
        let mut stream = client_list_line(clients).into_bytes();
        stream.extend_from_slice(b"\n\rerror id=0 msg=ok\n\r");

        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clients), &stream, |b, stream| {
            b.iter(|| {
                let mut decoder = LineDecoder::new();
                // feed in TCP-sized segments
                for chunk in stream.chunks(1460) {
                    decoder.extend(chunk);
                }
                let mut lines = 0;
                while let Some(line) = decoder.next_line().unwrap() {
                    black_box(&line);
                    lines += 1;
                }
                black_box(lines)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_escape,
    bench_unescape,
    bench_command_encode,
    bench_parse_records,
    bench_status_parse,
    bench_line_decoder,
);

criterion_main!(benches);
