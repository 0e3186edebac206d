use std::collections::HashSet;
use std::sync::Arc;

use seggraph::storage::{
    EdgeBlock, GraphOptions, GraphSchema, RecycleCfg, SegGraph, Worker,
};
use seggraph::types::{BlockAddr, Dir, EpochId, LabelId, VertexId};
use seggraph::Result;

const LINKS: LabelId = 0;

fn open(freq: u32, lag_epochs: u64) -> Result<Arc<SegGraph>> {
    let schema = GraphSchema::new().opaque_edge_label("links", 0);
    SegGraph::open(
        GraphOptions::new(schema, 16, 1 << 20)
            .initial_block_capacity(1)
            .max_block_capacity(1)
            .recycle(RecycleCfg {
                lag_epochs,
                freq,
                seed: 7,
            }),
    )
}

fn append_at(
    graph: &SegGraph,
    worker: &mut Worker,
    vertex: VertexId,
    epoch: EpochId,
    dst: VertexId,
) -> Result<()> {
    let mut writer = graph.create_graph_writer(worker, epoch);
    writer.put_edge(vertex, LINKS, Dir::Out, dst, &[])?;
    writer.commit()?;
    graph.publish_epoch(epoch);
    Ok(())
}

fn chain_blocks(graph: &SegGraph, vertex: VertexId) -> Result<Vec<BlockAddr>> {
    let mut out = Vec::new();
    let mut addr = graph.chain_head(vertex, LINKS, Dir::Out)?;
    while !addr.is_null() {
        let block = EdgeBlock::open(graph.allocator().arena(), addr)?;
        out.push(addr);
        addr = block.prev_pointer();
    }
    Ok(out)
}

/// Three one-entry blocks at epochs 1..=3, compacted by a writer at epoch 4.
fn build_and_compact(graph: &SegGraph, worker: &mut Worker) -> Result<Vec<BlockAddr>> {
    for epoch in 1..=3 {
        append_at(graph, worker, 0, epoch, epoch * 100)?;
    }
    let old = chain_blocks(graph, 0)?;
    assert_eq!(old.len(), 3);
    let mut writer = graph.create_graph_writer(worker, 4);
    assert!(writer.compact_chain(0, LINKS, Dir::Out)?);
    writer.commit()?;
    graph.publish_epoch(4);
    Ok(old)
}

#[test]
fn retired_blocks_wait_out_the_lag_window() -> Result<()> {
    let graph = open(0, 2)?;
    let mut worker = graph.register_worker();
    build_and_compact(&graph, &mut worker)?;
    assert_eq!(worker.pending().len(), 3);
    assert!(worker.pending().iter().all(|p| p.freed_epoch == 4));

    let stats = graph.recycle_segments(&mut worker, 6);
    assert_eq!(stats.horizon, 4);
    assert_eq!(stats.freed, 0);
    assert_eq!(stats.deferred, 3);

    graph.publish_epoch(6);
    let stats = graph.recycle_segments(&mut worker, 6);
    assert_eq!(stats.freed, 0, "4 + 2 is not before 6");

    graph.publish_epoch(7);
    let stats = graph.recycle_segments(&mut worker, 7);
    assert_eq!(stats.freed, 3);
    assert_eq!(stats.deferred, 0);
    assert_eq!(worker.cached_blocks(), 3);

    let reader = graph.create_graph_reader(7);
    assert_eq!(reader.neighbors(0, LINKS, Dir::Out)?, vec![100, 200, 300]);
    drop(reader);
    graph.retire_worker(worker);
    Ok(())
}

#[test]
fn pinned_readers_hold_back_recycling() -> Result<()> {
    let graph = open(0, 0)?;
    let mut worker = graph.register_worker();
    for epoch in 1..=3 {
        append_at(&graph, &mut worker, 0, epoch, epoch)?;
    }
    let reader = graph.create_graph_reader(2);
    let mut iter = reader.edges(0, LINKS, Dir::Out)?;
    assert_eq!(graph.oldest_pinned_epoch(), Some(2));

    let mut writer = graph.create_graph_writer(&mut worker, 4);
    assert!(writer.compact_chain(0, LINKS, Dir::Out)?);
    writer.commit()?;
    graph.publish_epoch(10);

    let stats = graph.recycle_segments(&mut worker, 10);
    assert_eq!(stats.horizon, 2);
    assert_eq!(stats.freed, 0);

    // The old blocks are still intact for the pinned reader.
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push(iter.dst_id());
        iter.next();
    }
    assert_eq!(seen, vec![1, 2]);
    drop(iter);
    drop(reader);

    assert_eq!(graph.oldest_pinned_epoch(), None);
    let stats = graph.recycle_segments(&mut worker, 10);
    assert_eq!(stats.freed, 3);
    graph.retire_worker(worker);
    Ok(())
}

#[test]
fn retired_workers_leave_orphans_for_others() -> Result<()> {
    let graph = open(0, 1)?;
    let mut first = graph.register_worker();
    build_and_compact(&graph, &mut first)?;
    graph.retire_worker(first);
    assert_eq!(graph.orphaned_blocks(), 3);

    let mut second = graph.register_worker();
    let stats = graph.recycle_segments(&mut second, 5);
    assert_eq!(stats.orphans_freed, 0);

    graph.publish_epoch(6);
    let stats = graph.recycle_segments(&mut second, 6);
    assert_eq!(stats.orphans_freed, 3);
    assert_eq!(graph.orphaned_blocks(), 0);
    assert_eq!(second.cached_blocks(), 3);
    graph.retire_worker(second);
    Ok(())
}

#[test]
fn writer_creation_runs_the_trigger() -> Result<()> {
    let graph = open(1, 0)?;
    let mut worker = graph.register_worker();
    build_and_compact(&graph, &mut worker)?;
    assert_eq!(worker.pending().len(), 3);

    graph.publish_epoch(5);
    let writer = graph.create_graph_writer(&mut worker, 6);
    drop(writer);
    assert!(worker.pending().is_empty());
    assert_eq!(worker.cached_blocks(), 3);
    graph.retire_worker(worker);
    Ok(())
}

#[test]
fn recycled_blocks_are_reused() -> Result<()> {
    let graph = open(0, 0)?;
    let mut worker = graph.register_worker();
    let old: HashSet<BlockAddr> = build_and_compact(&graph, &mut worker)?.into_iter().collect();
    graph.publish_epoch(5);
    assert_eq!(graph.recycle_segments(&mut worker, 5).freed, 3);

    let before = graph.block_usage().used_bytes;
    append_at(&graph, &mut worker, 1, 6, 42)?;
    let head = graph.chain_head(1, LINKS, Dir::Out)?;
    assert!(old.contains(&head));
    assert!(graph.block_usage().used_bytes > before);

    let reader = graph.create_graph_reader(6);
    assert_eq!(reader.neighbors(1, LINKS, Dir::Out)?, vec![42]);
    assert_eq!(reader.neighbors(0, LINKS, Dir::Out)?, vec![100, 200, 300]);
    drop(reader);
    graph.retire_worker(worker);
    Ok(())
}
