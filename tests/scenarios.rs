use std::fs;

use proptest::prelude::*;

use hashgraph::feed::open_feed;
use hashgraph::graph::EMPTY_GRAPH_DEGREE;
use hashgraph::{DeletePolicy, TagGraph};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 0.01,
        "expected ~{expected}, got {actual}"
    );
}

fn load_fixture(graph: &mut TagGraph, path: &str) -> usize {
    let mut reader = open_feed(path.as_ref()).expect("fixture opens");
    graph.try_load(reader.by_ref()).expect("fixture parses")
}

#[test]
fn fixture_feed_matches_inline_records() {
    let mut from_feed = TagGraph::new();
    assert_eq!(load_fixture(&mut from_feed, "tests/fixtures/tweets.txt"), 8);

    let mut inline = TagGraph::new();
    inline.apply_insert(["Gretel", "data"]);
    inline.apply_insert(["data", "startup", "privacy"]);
    inline.apply_insert(["data"]);
    inline.apply_insert(["Gretel"]);
    inline.apply_insert(["rocketship", "Gretel"]);
    inline.apply_insert(["cats", "cats", "cats"]);

    assert_eq!(from_feed.stats(), inline.stats());
    assert_close(from_feed.average_degree(), 1.67);
}

#[test]
fn loading_the_same_feed_twice_keeps_average_degree() {
    let mut graph = TagGraph::new();
    load_fixture(&mut graph, "tests/fixtures/tweets.txt");
    let first = graph.average_degree();
    load_fixture(&mut graph, "tests/fixtures/tweets.txt");
    assert_eq!(graph.average_degree(), first);
    assert_eq!(graph.reference_count("gretel"), 6);
}

#[test]
fn deleting_fixture_records_reclaims_their_tags() {
    let mut graph = TagGraph::new();
    load_fixture(&mut graph, "tests/fixtures/tweets.txt");

    let mut deletes = open_feed("tests/fixtures/deleted.txt".as_ref()).expect("open deletes");
    let applied = graph.try_unload(deletes.by_ref()).expect("deletes parse");
    assert_eq!(applied, 3);

    assert!(!graph.contains("rocketship"));
    assert!(!graph.contains("cats"));
    assert!(!graph.contains("unicorn"));
    assert_eq!(graph.vertex_count(), 4);
    assert_eq!(graph.average_degree(), 2.0);
    graph.verify().expect("invariants hold");
}

#[test]
fn add_delete_add_cycle_restores_shape() {
    let mut graph = TagGraph::new();
    graph.apply_insert(["dragons", "tacos"]);
    graph.apply_insert(["gretel", "ai"]);
    let full = graph.stats();
    assert_eq!(full.average_degree, 1.0);

    graph.apply_delete(["gretel", "ai"]);
    assert_eq!(graph.vertex_count(), 2);
    assert_eq!(graph.average_degree(), 1.0);

    graph.apply_insert(["gretel", "ai"]);
    assert_eq!(graph.stats(), full);
}

#[test]
fn policies_diverge_only_on_unknown_tags() {
    let mut strict = TagGraph::with_policy(DeletePolicy::Strict);
    let mut lenient = TagGraph::with_policy(DeletePolicy::Lenient);
    for graph in [&mut strict, &mut lenient] {
        graph.apply_insert(["a", "b"]);
        graph.apply_insert(["b", "c"]);
        graph.apply_delete(["a", "b"]);
    }
    assert_eq!(strict.stats(), lenient.stats());

    strict.apply_delete(["c", "ghost"]);
    lenient.apply_delete(["c", "ghost"]);
    assert!(strict.contains("c"));
    assert!(!lenient.contains("c"));
    strict.verify().expect("strict invariants");
    lenient.verify().expect("lenient invariants");
}

#[test]
fn deleting_everything_returns_to_empty_graph() {
    let mut graph = TagGraph::new();
    let records = vec![vec!["x", "y", "z"], vec!["y"], vec!["Z", "w"]];
    graph.load(records.iter().cloned());
    graph.unload(records.iter().rev().cloned());
    assert!(graph.is_empty());
    assert_eq!(graph.total_degree_sum(), 0);
    assert_eq!(graph.average_degree(), EMPTY_GRAPH_DEGREE);
}

static WORKLOAD_TAGS: [&str; 8] = ["Rust", "rust", "go", "Zig", "zig", "c", "ocaml", "java"];

#[derive(Debug, Clone)]
enum Operation {
    Insert(Vec<&'static str>),
    DeleteLive(prop::sample::Index),
    DeleteGhost(&'static str),
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => prop::collection::vec(prop::sample::select(WORKLOAD_TAGS.to_vec()), 0..4)
            .prop_map(Operation::Insert),
        2 => any::<prop::sample::Index>().prop_map(Operation::DeleteLive),
        1 => prop::sample::select(WORKLOAD_TAGS.to_vec()).prop_map(Operation::DeleteGhost),
    ]
}

proptest! {
    #[test]
    fn random_workload_preserves_invariants(
        ops in prop::collection::vec(arb_operation(), 0..200),
        lenient in any::<bool>(),
    ) {
        let policy = if lenient { DeletePolicy::Lenient } else { DeletePolicy::Strict };
        let mut graph = TagGraph::with_policy(policy);
        let mut live: Vec<Vec<&str>> = Vec::new();

        for op in ops {
            match op {
                Operation::Insert(record) => {
                    graph.apply_insert(&record);
                    live.push(record);
                }
                Operation::DeleteLive(index) => {
                    if !live.is_empty() {
                        let record = live.swap_remove(index.index(live.len()));
                        graph.apply_delete(&record);
                    }
                }
                Operation::DeleteGhost(tag) => {
                    let before = graph.stats();
                    graph.apply_delete([tag, "never-inserted"]);
                    if policy == DeletePolicy::Strict {
                        prop_assert_eq!(graph.stats(), before);
                    }
                }
            }
            let checked = graph.verify();
            prop_assert!(checked.is_ok(), "{:?}: {:?}", policy, checked);
        }

        for record in live.drain(..) {
            graph.apply_delete(&record);
        }
        prop_assert!(graph.is_empty(), "{:?} left vertices behind", policy);
        prop_assert_eq!(graph.average_degree(), EMPTY_GRAPH_DEGREE);
    }
}

#[test]
fn feeds_can_be_written_and_loaded_lazily() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("big.jsonl");
    let mut body = String::new();
    for idx in 0..1_000 {
        body.push_str(&format!(
            "{{\"entities\":{{\"hashtags\":[{{\"text\":\"hub\"}},{{\"text\":\"t{idx}\"}}]}}}}\n"
        ));
    }
    fs::write(&path, body).expect("write feed");

    let mut graph = TagGraph::new();
    let mut reader = open_feed(&path).expect("open");
    assert_eq!(graph.try_load(reader.by_ref()).expect("load"), 1_000);
    assert_eq!(graph.vertex_count(), 1_001);
    assert_close(graph.average_degree(), 2_000.0 / 1_001.0);
}
