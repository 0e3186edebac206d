use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use seggraph::storage::{GraphOptions, GraphSchema, SegGraph};
use seggraph::types::{Dir, LabelId, VertexId};
use seggraph::Result;

const EDGE: LabelId = 0;
const WRITERS: u64 = 4;
const BATCHES: u64 = 50;
const BATCH: u64 = 3;

fn expected_prefix(vertex: VertexId, len: usize) -> Vec<VertexId> {
    (0..len as u64).map(|i| vertex * 10_000 + i).collect()
}

#[test]
fn writers_on_disjoint_chains_with_concurrent_readers() -> Result<()> {
    let schema = GraphSchema::new().opaque_edge_label("edge", 0);
    let graph = SegGraph::open(
        GraphOptions::new(schema, WRITERS as usize, 8 << 20)
            .initial_block_capacity(2)
            .max_block_capacity(16),
    )?;
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let writers: Vec<_> = (0..WRITERS)
            .map(|vertex| {
                let graph = Arc::clone(&graph);
                scope.spawn(move || {
                    let mut worker = graph.register_worker();
                    for batch in 0..BATCHES {
                        let mut txn = graph.begin_transaction(&mut worker);
                        for i in 0..BATCH {
                            let dst = vertex * 10_000 + batch * BATCH + i;
                            txn.put_edge(vertex, EDGE, Dir::Out, dst, &[]).unwrap();
                        }
                        txn.commit().unwrap();
                    }
                    graph.retire_worker(worker);
                })
            })
            .collect();

        for _ in 0..2 {
            let graph = Arc::clone(&graph);
            let done = &done;
            scope.spawn(move || {
                let mut last = vec![0usize; WRITERS as usize];
                while !done.load(Ordering::Acquire) {
                    let txn = graph.begin_read_only_transaction();
                    for vertex in 0..WRITERS {
                        let seen: Vec<VertexId> = txn
                            .edges(vertex, EDGE, Dir::Out)
                            .unwrap()
                            .edges()
                            .map(|e| e.dst)
                            .collect();
                        assert_eq!(seen.len() as u64 % BATCH, 0, "torn commit on {vertex}");
                        assert_eq!(seen, expected_prefix(vertex, seen.len()));
                        assert_eq!(txn.degree(vertex, EDGE, Dir::Out).unwrap(), seen.len());
                        let slot = &mut last[vertex as usize];
                        assert!(seen.len() >= *slot, "visibility went backwards");
                        *slot = seen.len();
                    }
                    txn.abort();
                }
            });
        }

        let results: Vec<_> = writers.into_iter().map(|h| h.join()).collect();
        done.store(true, Ordering::Release);
        for result in results {
            if let Err(panic) = result {
                std::panic::resume_unwind(panic);
            }
        }
    });

    assert_eq!(graph.current_epoch(), WRITERS * BATCHES);
    let reader = graph.create_graph_reader(graph.current_epoch());
    for vertex in 0..WRITERS {
        let all = reader.neighbors(vertex, EDGE, Dir::Out)?;
        assert_eq!(all, expected_prefix(vertex, (BATCHES * BATCH) as usize));
        graph.verify_chain(vertex, EDGE, Dir::Out)?;
    }
    Ok(())
}

#[test]
fn explicit_epoch_writers_publish_independently() -> Result<()> {
    let schema = GraphSchema::new().opaque_edge_label("edge", 0);
    let graph = SegGraph::open(GraphOptions::new(schema, 8, 1 << 20))?;

    std::thread::scope(|scope| {
        for vertex in 0..4u64 {
            let graph = &graph;
            scope.spawn(move || {
                let mut worker = graph.register_worker();
                for epoch in 1..=10u64 {
                    let mut writer = graph.create_graph_writer(&mut worker, epoch);
                    writer.put_edge(vertex, EDGE, Dir::Out, epoch, &[]).unwrap();
                    writer.commit().unwrap();
                }
                graph.retire_worker(worker);
            });
        }
    });
    graph.publish_epoch(10);

    for epoch in 0..=10u64 {
        let reader = graph.create_graph_reader(epoch);
        for vertex in 0..4 {
            let want: Vec<VertexId> = (1..=epoch).collect();
            assert_eq!(reader.neighbors(vertex, EDGE, Dir::Out)?, want);
        }
    }
    Ok(())
}
