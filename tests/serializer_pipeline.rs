use tagweave::logging;
use tagweave::nodes::{Feeder, FilterTagged, Serializer, Source, TerminationPolicy};
use tagweave::time::value;
use tagweave::{
  Affinity, FlowError, Graph, Node, OutputKind, Outbox, RuntimeConfig, Scheduler, Token, Value,
  WorkerId,
};

fn as_i64(v: &Value) -> Result<i64, String> {
  v.downcast_ref::<i64>()
    .copied()
    .ok_or_else(|| "expected i64".to_string())
}

fn pair(values: &[Value]) -> Result<Value, String> {
  Ok(value((as_i64(&values[0])?, as_i64(&values[1])?)))
}

/// A node written against the public protocol only.
struct Scale {
  factor: i64,
}

impl Node for Scale {
  fn name(&self) -> &str {
    "scale"
  }

  fn input_arity(&self) -> usize {
    1
  }

  fn affinity(&self) -> Affinity {
    Affinity::workers([1, 2])
  }

  fn output_kind(&self) -> OutputKind {
    OutputKind::Tagged
  }

  fn requires_tagged_input(&self, _port: usize) -> bool {
    true
  }

  fn run(&mut self, args: Vec<Token>, worker: WorkerId, outbox: &mut Outbox<'_>) -> Result<(), FlowError> {
    assert!(worker == 1 || worker == 2, "ran on worker {worker}");
    match &args[0] {
      Token::Tagged(tv) => {
        let x = as_i64(&tv.value).map_err(|message| FlowError::Function {
          node: "scale".to_string(),
          message,
        })?;
        outbox.emit_tagged(value(x * self.factor), tv.tag)
      }
      Token::EndOfStream => {
        outbox.end_of_stream();
        Ok(())
      }
      other => Err(FlowError::NotTagged {
        node: "scale".to_string(),
        port: 0,
        found: other.kind(),
      }),
    }
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_branches_are_rejoined_in_tag_order() {
  logging::init(tracing::Level::INFO);

  // src -> scale --------------> join.0
  // src -> add(offset) --------> join.1
  let mut graph = Graph::new("rejoin");
  let src = graph
    .add_node(Box::new(
      Source::from_values("src", 0..50i64).with_batch_size(8),
    ))
    .unwrap();
  let scale = graph.add_node(Box::new(Scale { factor: 3 })).unwrap();
  let offset = graph
    .add_node(Box::new(Feeder::new("offset", 1000i64).repeat(50)))
    .unwrap();
  let add = graph
    .add_node(Box::new(FilterTagged::new("add", 2, |v| {
      Ok(value(as_i64(&v[0])? + as_i64(&v[1])?))
    })))
    .unwrap();
  let join = graph
    .add_node(Box::new(Serializer::new("join", 2, pair).with_worker(3)))
    .unwrap();
  graph.connect(src, scale, 0).unwrap();
  graph.connect(src, add, 0).unwrap();
  graph.connect(offset, add, 1).unwrap();
  graph.connect(scale, join, 0).unwrap();
  graph.connect(add, join, 1).unwrap();

  let execution = Scheduler::new(RuntimeConfig::new(4))
    .run(graph)
    .await
    .unwrap();

  let expected: Vec<(i64, i64)> = (0..50).map(|i| (3 * i, i + 1000)).collect();
  assert_eq!(execution.values_of::<(i64, i64)>("join"), expected);
  let tags: Vec<u64> = execution
    .tagged_outputs_of("join")
    .iter()
    .map(|tv| tv.tag.as_u64())
    .collect();
  assert_eq!(tags, (0..50).collect::<Vec<_>>());
  assert!(execution.ended("join"));
  assert_eq!(execution.stats.invocations_of("src"), 7);
  assert_eq!(execution.stats.tokens_dropped, 0);
  assert_eq!(execution.stats.tokens_undelivered, 0);
}

fn uneven_graph(policy: TerminationPolicy) -> Graph {
  let mut graph = Graph::new("uneven");
  let short = graph
    .add_node(Box::new(Source::from_values("short", 0..5i64)))
    .unwrap();
  let long = graph
    .add_node(Box::new(Source::from_values("long", 0..10i64)))
    .unwrap();
  let join = graph
    .add_node(Box::new(
      Serializer::new("join", 2, pair).with_policy(policy),
    ))
    .unwrap();
  graph.connect(short, join, 0).unwrap();
  graph.connect(long, join, 1).unwrap();
  graph
}

#[tokio::test]
async fn all_ports_policy_waits_for_every_stream() {
  let execution = Scheduler::new(RuntimeConfig::new(2))
    .run(uneven_graph(TerminationPolicy::AllPorts))
    .await
    .unwrap();

  assert_eq!(execution.tagged_outputs_of("join").len(), 5);
  assert!(execution.ended("join"));
  // Every token was consumed by the serializer; the unmatched tail was
  // discarded inside it, not left in the queues.
  assert_eq!(execution.stats.tokens_dropped, 0);
  assert_eq!(execution.stats.tokens_undelivered, 0);
  assert_eq!(execution.stats.invocations_of("join"), 11);
}

#[tokio::test]
async fn primary_port_policy_stops_at_first_stream_end() {
  let execution = Scheduler::new(RuntimeConfig::new(2))
    .run(uneven_graph(TerminationPolicy::PrimaryPort))
    .await
    .unwrap();

  assert_eq!(
    execution.values_of::<(i64, i64)>("join"),
    (0..5).map(|i| (i, i)).collect::<Vec<_>>()
  );
  assert!(execution.ended("join"));
  // Values 6..=9 of the long stream were still queued when the serializer
  // retired.
  assert_eq!(execution.stats.tokens_dropped, 4);
  assert_eq!(execution.stats.invocations_of("join"), 6);
}

#[test]
fn config_from_json_drives_a_run() {
  let config = RuntimeConfig::from_json_str(r#"{ "workers": 3, "max_invocations": 1000 }"#).unwrap();
  let mut graph = Graph::new("json");
  graph
    .add_node(Box::new(Source::from_values("src", ["a", "b"])))
    .unwrap();

  let execution = tokio_test::block_on(Scheduler::new(config).run(graph)).unwrap();
  assert_eq!(execution.values_of::<&str>("src"), vec!["a", "b"]);
}
