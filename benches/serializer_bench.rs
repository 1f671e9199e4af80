//! # Serializer Benchmark
//!
//! Measures the reorder buffer on its own (driven through a `NodeHarness`,
//! arrivals reversed in blocks so every block is buffered before it drains)
//! and a full source -> serializer graph on the reference scheduler.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tagweave::nodes::Serializer;
use tagweave::nodes::Source;
use tagweave::nodes::common::NodeHarness;
use tagweave::time::{Tag, Value, value};
use tagweave::{Graph, RuntimeConfig, Scheduler, Token};

const BLOCK: u64 = 64;

fn first(values: &[Value]) -> Result<Value, String> {
  Ok(values[0].clone())
}

/// Feeds `count` tags to a two-port serializer, each block of 64 in reverse.
fn reorder(count: u64) {
  let mut node = Serializer::new("ser", 2, first);
  let mut harness = NodeHarness::new();
  let mut emitted = 0;
  let mut start = 0;
  while start < count {
    let end = (start + BLOCK).min(count);
    for tag in (start..end).rev() {
      let row = vec![
        Token::tagged(value(tag), Tag::new(tag)),
        Token::tagged(value(tag), Tag::new(tag)),
      ];
      emitted += harness.invoke(&mut node, row).map(|ops| ops.len()).unwrap_or(0);
    }
    start = end;
  }
  assert_eq!(emitted as u64, count);
}

/// Runs a source -> serializer graph with `count` items.
fn graph_run(count: i64) {
  let rt = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(2)
    .enable_all()
    .build()
    .unwrap();
  rt.block_on(async {
    let mut graph = Graph::new("bench");
    let a = graph
      .add_node(Box::new(
        Source::from_values("a", 0..count).with_batch_size(16),
      ))
      .unwrap();
    let b = graph
      .add_node(Box::new(Source::from_values("b", 0..count)))
      .unwrap();
    let ser = graph
      .add_node(Box::new(Serializer::new("ser", 2, first)))
      .unwrap();
    graph.connect(a, ser, 0).unwrap();
    graph.connect(b, ser, 1).unwrap();
    let execution = Scheduler::new(RuntimeConfig::new(2))
      .run(graph)
      .await
      .unwrap();
    assert!(execution.ended("ser"));
  });
}

fn serializer_benchmark(c: &mut Criterion) {
  let mut group = c.benchmark_group("serializer_reorder");
  for size in [1_000u64, 10_000].iter() {
    group.throughput(Throughput::Elements(*size));
    group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
      b.iter(|| reorder(size));
    });
  }
  group.finish();

  let mut group = c.benchmark_group("serializer_graph");
  group.sample_size(10);
  group.warm_up_time(std::time::Duration::from_secs(1));
  group.measurement_time(std::time::Duration::from_secs(3));
  for size in [100i64, 1000].iter() {
    group.throughput(Throughput::Elements(*size as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
      b.iter(|| graph_run(size));
    });
  }
  group.finish();
}

criterion_group!(benches, serializer_benchmark);
criterion_main!(benches);
