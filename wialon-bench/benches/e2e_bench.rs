//! End-to-end device-to-gateway benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use wialon_server::{ChannelSink, Server, ServerConfig};

const SHORT_DATA: &[u8] = b"#SD#280421;055220;5355.09260;N;02732.40990;E;12;270;300;7\r\n";

struct Device {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl Device {
    async fn send(&mut self, packet: &[u8]) -> usize {
        self.writer.write_all(packet).await.unwrap();
        self.line.clear();
        self.reader.read_line(&mut self.line).await.unwrap()
    }

    async fn send_batch(&mut self, packets: &[u8], count: usize) {
        self.writer.write_all(packets).await.unwrap();
        for _ in 0..count {
            self.line.clear();
            self.reader.read_line(&mut self.line).await.unwrap();
        }
    }
}

fn setup_server_and_device(rt: &Runtime) -> (Arc<Server>, Device) {
    rt.block_on(async {
        let (sink, mut rx) = ChannelSink::new(4096);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(ServerConfig::new(addr), Arc::new(sink)));

        let server_clone = server.clone();
        tokio::spawn(async move {
            let _ = server_clone.serve(listener).await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut device = Device {
            reader: BufReader::new(read_half),
            writer,
            line: String::new(),
        };
        device.send(b"#L#bench;NA\r\n").await;

        (server, device)
    })
}

fn bench_packet_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (server, device) = setup_server_and_device(&rt);
    let device = tokio::sync::Mutex::new(device);

    let mut group = c.benchmark_group("e2e_short_data");
    group.throughput(Throughput::Elements(1));

    group.bench_function("roundtrip", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(device.lock().await.send(SHORT_DATA).await) });
    });

    group.finish();
    server.shutdown();
}

fn bench_pipelined_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (server, device) = setup_server_and_device(&rt);
    let device = tokio::sync::Mutex::new(device);

    let mut group = c.benchmark_group("e2e_pipelined");

    for count in [10, 100] {
        let batch = SHORT_DATA.repeat(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &batch, |b, batch| {
            b.to_async(&rt)
                .iter(|| async { device.lock().await.send_batch(batch, count).await });
        });
    }

    group.finish();
    server.shutdown();
}

criterion_group!(benches, bench_packet_roundtrip, bench_pipelined_batch);

criterion_main!(benches);
