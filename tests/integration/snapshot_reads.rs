use std::sync::Arc;

use seggraph::storage::{DataType, EdgeBlock, GraphOptions, GraphSchema, SegGraph, Worker};
use seggraph::types::{Dir, EpochId, LabelId, VertexId, VERTEX_TOMBSTONE};
use seggraph::Result;

const FOLLOWS: LabelId = 0;

fn open(block_capacity: usize, max_block_capacity: usize) -> Result<Arc<SegGraph>> {
    let schema = GraphSchema::new().opaque_edge_label("follows", 0);
    SegGraph::open(
        GraphOptions::new(schema, 64, 1 << 20)
            .initial_block_capacity(block_capacity)
            .max_block_capacity(max_block_capacity),
    )
}

fn append_at(graph: &SegGraph, worker: &mut Worker, epoch: EpochId, dsts: &[VertexId]) -> Result<()> {
    let mut writer = graph.create_graph_writer(worker, epoch);
    for &dst in dsts {
        writer.put_edge(0, FOLLOWS, Dir::Out, dst, &[])?;
    }
    writer.commit()?;
    graph.publish_epoch(epoch);
    Ok(())
}

#[test]
fn reads_see_exactly_their_epoch_across_a_block_boundary() -> Result<()> {
    let graph = open(3, 3)?;
    let mut worker = graph.register_worker();
    append_at(&graph, &mut worker, 1, &[10, 20, 30])?;
    append_at(&graph, &mut worker, 2, &[40])?;

    let head = graph.chain_head(0, FOLLOWS, Dir::Out)?;
    let block = EdgeBlock::open(graph.allocator().arena(), head)?;
    assert_eq!(block.prev_num_entries(), 3);
    assert_eq!(block.capacity(), 3);

    let r1 = graph.create_graph_reader(1);
    let r2 = graph.create_graph_reader(2);
    assert_eq!(r1.neighbors(0, FOLLOWS, Dir::Out)?, vec![10, 20, 30]);
    assert_eq!(r1.degree(0, FOLLOWS, Dir::Out)?, 3);
    assert_eq!(r2.neighbors(0, FOLLOWS, Dir::Out)?, vec![10, 20, 30, 40]);
    assert_eq!(r2.degree(0, FOLLOWS, Dir::Out)?, 4);
    drop((r1, r2));
    graph.retire_worker(worker);
    Ok(())
}

#[test]
fn visibility_only_grows_with_the_epoch() -> Result<()> {
    let graph = open(2, 16)?;
    let mut worker = graph.register_worker();
    let mut expected: Vec<Vec<VertexId>> = vec![Vec::new()];
    let mut all = Vec::new();
    for epoch in 1..=12u64 {
        let batch: Vec<VertexId> = (0..epoch % 4).map(|i| epoch * 10 + i).collect();
        all.extend_from_slice(&batch);
        if !batch.is_empty() {
            append_at(&graph, &mut worker, epoch, &batch)?;
        } else {
            graph.publish_epoch(epoch);
        }
        expected.push(all.clone());
    }

    let mut previous = 0;
    for (epoch, want) in expected.iter().enumerate() {
        let reader = graph.create_graph_reader(epoch as EpochId);
        let got = reader.neighbors(0, FOLLOWS, Dir::Out)?;
        assert_eq!(&got, want, "epoch {epoch}");
        assert!(got.len() >= previous);
        assert_eq!(reader.degree(0, FOLLOWS, Dir::Out)?, got.len());
        previous = got.len();
    }

    let stats = graph.verify_chain(0, FOLLOWS, Dir::Out)?;
    assert_eq!(stats.committed, all.len() as u64);
    assert_eq!(stats.entries, all.len() as u64);
    graph.retire_worker(worker);
    Ok(())
}

#[test]
fn future_epochs_read_the_newest_commit() -> Result<()> {
    let graph = open(4, 4)?;
    let mut worker = graph.register_worker();
    append_at(&graph, &mut worker, 3, &[7, 8])?;
    let reader = graph.create_graph_reader(100);
    assert_eq!(reader.neighbors(0, FOLLOWS, Dir::Out)?, vec![7, 8]);
    let early = graph.create_graph_reader(2);
    let iter = early.edges(0, FOLLOWS, Dir::Out)?;
    assert!(iter.empty());
    assert_eq!(iter.dst_id(), VERTEX_TOMBSTONE);
    drop(iter);
    drop((reader, early));
    graph.retire_worker(worker);
    Ok(())
}

#[test]
fn transactions_read_their_start_snapshot() -> Result<()> {
    let schema = GraphSchema::new().edge_label("paid", false, &[("cents", DataType::U64)]);
    let graph = SegGraph::open(GraphOptions::new(schema, 16, 1 << 20).initial_block_capacity(2))?;
    let mut worker = graph.register_worker();
    let mut other = graph.register_worker();

    let mut txn = graph.begin_transaction(&mut worker);
    txn.add_edge(1, 2, 0, &150u64.to_le_bytes())?;
    txn.add_edge(1, 3, 0, &99u64.to_le_bytes())?;
    assert_eq!(txn.commit()?, 1);

    let snapshot = graph.begin_read_only_transaction();
    assert_eq!(snapshot.read_epoch(), 1);

    let mut txn = graph.begin_transaction(&mut other);
    txn.add_edge(1, 4, 0, &1u64.to_le_bytes())?;
    assert_eq!(txn.commit()?, 2);

    assert_eq!(snapshot.degree(1, 0, Dir::Out)?, 2);
    let amounts: Vec<u64> = snapshot
        .edges(1, 0, Dir::Out)?
        .edges()
        .map(|edge| u64::from_le_bytes(edge.data.try_into().unwrap()))
        .collect();
    assert_eq!(amounts, vec![150, 99]);
    assert_eq!(snapshot.degree(2, 0, Dir::In)?, 1);
    snapshot.commit()?;

    let latest = graph.begin_read_only_transaction();
    assert_eq!(latest.degree(1, 0, Dir::Out)?, 3);
    assert_eq!(latest.degree(4, 0, Dir::In)?, 1);
    latest.abort();
    graph.retire_worker(worker);
    graph.retire_worker(other);
    Ok(())
}
