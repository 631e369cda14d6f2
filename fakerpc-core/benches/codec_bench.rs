//! Benchmarks for log codecs and connection reconstruction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use fakerpc_core::codec::{binary, ngrep};
use fakerpc_core::{Connections, Log, Transmission};

fn create_test_log(clients: u16) -> Log {
    let srv = "10.0.0.1:80".parse().unwrap();
    let mut log = Log::new().with_filter("tcp port 80");
    for port in 0..clients {
        let cli = format!("10.0.1.1:{}", 40000 + port).parse().unwrap();
        let body = "x".repeat(256);
        log.push(Transmission::new(cli, srv).with_raw(format!(
            "POST /rpc HTTP/1.1\r\nHost: backend\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )));
        log.push(Transmission::new(srv, cli).with_raw(format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )));
    }
    log
}

fn bench_ngrep(c: &mut Criterion) {
    let mut group = c.benchmark_group("ngrep");
    for clients in [10u16, 100] {
        let log = create_test_log(clients);
        let text = ngrep::to_vec(&log).unwrap();

        group.bench_function(BenchmarkId::new("encode", clients), |b| {
            b.iter(|| ngrep::to_vec(black_box(&log)).unwrap())
        });
        group.bench_function(BenchmarkId::new("decode", clients), |b| {
            b.iter(|| ngrep::from_slice(black_box(&text)).unwrap())
        });
    }
    group.finish();
}

fn bench_binary(c: &mut Criterion) {
    let log = create_test_log(100);
    let mut buf = Vec::new();
    binary::write(&mut buf, &log).unwrap();

    c.bench_function("binary_read", |b| {
        b.iter(|| binary::read(black_box(buf.as_slice())).unwrap())
    });
}

fn bench_reconstruct(c: &mut Criterion) {
    let log = create_test_log(100);
    c.bench_function("reconstruct", |b| {
        b.iter(|| Connections::from_log(black_box(&log)).unwrap())
    });
}

criterion_group!(benches, bench_ngrep, bench_binary, bench_reconstruct);
criterion_main!(benches);
