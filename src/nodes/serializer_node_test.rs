//! Tests for Serializer

use crate::affinity::Affinity;
use crate::error::FlowError;
use crate::node::Node;
use crate::nodes::common::NodeHarness;
use crate::nodes::common::testing::{join_strs, payloads_as, tagged, tags};
use crate::nodes::serializer_node::{Serializer, TerminationPolicy};
use crate::operand::{Operand, Token};
use crate::time::{Tag, Value, value};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};

fn concat() -> Serializer {
  Serializer::new("ser", 2, join_strs)
}

/// Feeds one invocation per row and returns everything emitted.
fn feed(node: &mut Serializer, harness: &mut NodeHarness, rows: Vec<Vec<Token>>) -> Vec<Operand> {
  rows
    .into_iter()
    .flat_map(|row| harness.invoke(&mut *node, row).unwrap())
    .collect()
}

#[test]
fn test_serializer_restores_order_across_ports() {
  let mut node = concat();
  let mut harness = NodeHarness::new();
  // Port A = [(1, "x"), (0, "y")], port B = [(0, "p"), (1, "q")].
  let ops = feed(
    &mut node,
    &mut harness,
    vec![
      vec![tagged(1, "x"), tagged(0, "p")],
      vec![tagged(0, "y"), tagged(1, "q")],
    ],
  );
  assert_eq!(tags(&ops), vec![Some(0), Some(1)]);
  assert_eq!(payloads_as::<String>(&ops), vec!["y+p", "x+q"]);
  assert_eq!(node.next_expected_tag(), Tag::new(2));
}

#[test]
fn test_serializer_waits_for_every_port() {
  let mut node = concat();
  let mut harness = NodeHarness::new();

  let ops = harness
    .invoke(&mut node, vec![tagged(0, "a"), tagged(1, "b")])
    .unwrap();
  assert!(ops.is_empty());
  assert_eq!(node.buffered(0), 1);
  assert_eq!(node.buffered(1), 1);

  // The expected tag arrives on port 1 while port 0 is ahead.
  let ops = harness
    .invoke(&mut node, vec![tagged(1, "c"), tagged(0, "d")])
    .unwrap();
  assert_eq!(tags(&ops), vec![Some(0), Some(1)]);
  assert_eq!(payloads_as::<String>(&ops), vec!["a+d", "c+b"]);
  assert_eq!(node.buffered(0), 0);
}

#[test]
fn test_serializer_failed_combine_keeps_round() {
  let failed = AtomicBool::new(false);
  let mut node = Serializer::new("ser", 2, move |values: &[Value]| {
    if !failed.swap(true, Ordering::SeqCst) {
      return Err("combine failed".to_string());
    }
    join_strs(values)
  });
  let mut harness = NodeHarness::new();

  let err = harness
    .invoke(&mut node, vec![tagged(0, "a"), tagged(0, "b")])
    .unwrap_err();
  assert!(matches!(err, FlowError::Function { .. }));
  assert_eq!((node.buffered(0), node.buffered(1)), (1, 1));
  assert_eq!(node.next_expected_tag(), Tag::ZERO);

  // A later tag arrives; the stranded round drains first.
  let ops = harness
    .invoke(&mut node, vec![tagged(1, "c"), tagged(1, "d")])
    .unwrap();
  assert_eq!(tags(&ops), vec![Some(0), Some(1)]);
  assert_eq!(payloads_as::<String>(&ops), vec!["a+b", "c+d"]);
  assert_eq!(node.next_expected_tag(), Tag::new(2));
}

#[test]
fn test_serializer_drains_multiple_rounds_at_once() {
  let mut node = concat();
  let mut harness = NodeHarness::new();
  let ops = feed(
    &mut node,
    &mut harness,
    vec![
      vec![tagged(3, "a3"), tagged(3, "b3")],
      vec![tagged(2, "a2"), tagged(2, "b2")],
      vec![tagged(1, "a1"), tagged(1, "b1")],
    ],
  );
  assert!(ops.is_empty());
  let ops = harness
    .invoke(&mut node, vec![tagged(0, "a0"), tagged(0, "b0")])
    .unwrap();
  assert_eq!(tags(&ops), vec![Some(0), Some(1), Some(2), Some(3)]);
}

#[test]
fn test_serializer_output_independent_of_arrival_order() {
  const PORTS: usize = 3;
  const ITEMS: u64 = 40;

  for seed in 0..20u64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let streams: Vec<Vec<u64>> = (0..PORTS)
      .map(|_| {
        let mut tags: Vec<u64> = (0..ITEMS).collect();
        tags.shuffle(&mut rng);
        tags
      })
      .collect();

    let mut node = Serializer::new("sum", PORTS, |vals: &[Value]| {
      let mut total = 0u64;
      for v in vals {
        total += v.downcast_ref::<u64>().ok_or("expected u64")?;
      }
      Ok(value(total))
    });
    let mut harness = NodeHarness::new();
    let mut rows: Vec<Vec<Token>> = (0..ITEMS as usize)
      .map(|i| {
        streams
          .iter()
          .enumerate()
          .map(|(port, s)| tagged(s[i], s[i] * 10 + port as u64))
          .collect()
      })
      .collect();
    rows.push(vec![Token::EndOfStream; PORTS]);
    let ops = feed(&mut node, &mut harness, rows);

    let expected_tags: Vec<Option<u64>> = (0..ITEMS).map(Some).chain([None]).collect();
    assert_eq!(tags(&ops), expected_tags, "seed {}", seed);
    let expected_sums: Vec<u64> = (0..ITEMS).map(|t| t * 30 + 3).collect();
    assert_eq!(payloads_as::<u64>(&ops), expected_sums, "seed {}", seed);
    assert_eq!(node.discarded(), 0);
  }
}

#[test]
fn test_serializer_all_ports_policy_keeps_late_ports() {
  let mut node = concat();
  let mut harness = NodeHarness::new();
  let ops = feed(
    &mut node,
    &mut harness,
    vec![
      vec![tagged(1, "a1"), tagged(2, "b2")],
      vec![tagged(0, "a0"), tagged(0, "b0")],
      // Port 0 ends while port 1 still delivers tag 1.
      vec![Token::EndOfStream, tagged(1, "b1")],
    ],
  );
  assert_eq!(tags(&ops), vec![Some(0), Some(1)]);
  assert!(!harness.is_closed());

  let ops = harness
    .invoke(&mut node, vec![Token::EndOfStream, Token::EndOfStream])
    .unwrap();
  assert_eq!(ops.len(), 1);
  assert!(ops[0].token.is_end_of_stream());
  // Tag 2 never arrived on port 0: reported, not lost silently.
  assert_eq!(node.discarded(), 1);
  assert!(harness.is_closed());
}

#[test]
fn test_serializer_primary_port_policy_closes_immediately() {
  let mut node = concat().with_policy(TerminationPolicy::PrimaryPort);
  let mut harness = NodeHarness::new();
  let ops = feed(
    &mut node,
    &mut harness,
    vec![
      vec![tagged(1, "a1"), tagged(2, "b2")],
      vec![tagged(0, "a0"), tagged(0, "b0")],
      vec![Token::EndOfStream, tagged(1, "b1")],
    ],
  );
  assert_eq!(tags(&ops), vec![Some(0), None]);
  // a1 and b2 were buffered; b1 arrived with the end-of-stream.
  assert_eq!(node.discarded(), 3);
  assert!(harness.is_closed());
  assert_eq!(node.policy(), TerminationPolicy::PrimaryPort);
}

#[test]
fn test_serializer_closes_clean_when_drained() {
  let mut node = concat();
  let mut harness = NodeHarness::new();
  let ops = feed(
    &mut node,
    &mut harness,
    vec![
      vec![tagged(0, "a"), tagged(0, "b")],
      vec![Token::EndOfStream, Token::EndOfStream],
    ],
  );
  assert_eq!(tags(&ops), vec![Some(0), None]);
  assert_eq!(node.discarded(), 0);
}

#[test]
fn test_serializer_backlog_limit() {
  let mut node = concat().with_max_backlog(2);
  let mut harness = NodeHarness::new();
  feed(
    &mut node,
    &mut harness,
    vec![
      vec![tagged(1, "a"), tagged(0, "b")],
      vec![tagged(2, "a"), tagged(1, "b")],
    ],
  );
  let err = harness
    .invoke(&mut node, vec![tagged(3, "a"), tagged(2, "b")])
    .unwrap_err();
  assert_eq!(
    err,
    FlowError::BacklogExceeded {
      node: "ser".to_string(),
      port: 0,
      depth: 3,
      limit: 2,
    }
  );
  // The rejected invocation left the buffers untouched.
  assert_eq!(node.buffered(0), 2);
  assert_eq!(node.buffered(1), 2);
}

#[test]
fn test_serializer_rejects_duplicates_and_untagged() {
  let mut node = concat();
  let mut harness = NodeHarness::new();
  harness
    .invoke(&mut node, vec![tagged(1, "a"), tagged(0, "b")])
    .unwrap();

  let err = harness
    .invoke(&mut node, vec![tagged(1, "a"), tagged(2, "b")])
    .unwrap_err();
  assert!(matches!(err, FlowError::DuplicateTag { port: 0, .. }));

  let err = harness
    .invoke(&mut node, vec![tagged(2, "a"), Token::Data(value("b"))])
    .unwrap_err();
  assert!(matches!(err, FlowError::NotTagged { port: 1, found: "untagged value", .. }));
  assert_eq!(node.buffered(0), 1);
}

#[test]
fn test_serializer_rejects_already_emitted_tag() {
  let mut node = concat();
  let mut harness = NodeHarness::new();
  harness
    .invoke(&mut node, vec![tagged(0, "a"), tagged(0, "b")])
    .unwrap();
  let err = harness
    .invoke(&mut node, vec![tagged(0, "a"), tagged(1, "b")])
    .unwrap_err();
  assert!(matches!(err, FlowError::DuplicateTag { .. }));
}

#[test]
fn test_serializer_is_pinned() {
  let node = concat();
  assert_eq!(node.affinity(), Affinity::pinned(0));
  assert!(node.requires_tagged_input(1));
  let node = concat().with_worker(3);
  assert_eq!(node.affinity().pinned_worker(), Some(3));
}

#[test]
fn test_serializer_arity_mismatch() {
  let mut node = concat();
  let err = NodeHarness::new()
    .invoke(&mut node, vec![tagged(0, "a")])
    .unwrap_err();
  assert!(matches!(err, FlowError::Arity { expected: 2, got: 1, .. }));
}
