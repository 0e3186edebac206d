use std::collections::BTreeMap;

use proptest::prelude::*;
use seggraph::storage::{BlockManager, DataType, GraphOptions, GraphSchema, LocalFreeLists, SegGraph};
use seggraph::types::{Dir, EpochId, VertexId};

#[derive(Debug, Clone)]
enum Operation {
    Commit(Vec<(VertexId, u32)>),
    Abort(Vec<(VertexId, u32)>),
    Compact,
    Recycle,
}

fn arb_batch() -> impl Strategy<Value = Vec<(VertexId, u32)>> {
    prop::collection::vec((0u64..1_000, any::<u32>()), 1..6)
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => arb_batch().prop_map(Operation::Commit),
        1 => arb_batch().prop_map(Operation::Abort),
        1 => Just(Operation::Compact),
        1 => Just(Operation::Recycle),
    ]
}

#[derive(Debug, Clone)]
enum AllocOp {
    Alloc(u8),
    Free(usize),
}

fn arb_alloc_op() -> impl Strategy<Value = AllocOp> {
    prop_oneof![
        3 => (3u8..=10).prop_map(AllocOp::Alloc),
        2 => any::<usize>().prop_map(AllocOp::Free),
    ]
}

proptest! {
    #[test]
    fn prop_every_epoch_reads_its_prefix(
        ops in prop::collection::vec(arb_operation(), 1..40),
        block_capacity in 1usize..5,
    ) {
        let schema = GraphSchema::new().edge_label("weighted", false, &[("w", DataType::U32)]);
        let graph = SegGraph::open(
            GraphOptions::new(schema, 2_000, 1 << 22)
                .initial_block_capacity(block_capacity)
                .max_block_capacity(block_capacity * 4),
        ).unwrap();
        let mut worker = graph.register_worker();

        // Entries committed so far, and the prefix length visible at each epoch.
        let mut model: Vec<(VertexId, u32)> = Vec::new();
        let mut visible_at: Vec<usize> = vec![0];

        for op in ops {
            let epoch: EpochId = graph.current_epoch() + 1;
            match op {
                Operation::Commit(batch) => {
                    let mut writer = graph.create_graph_writer(&mut worker, epoch);
                    for &(dst, w) in &batch {
                        writer.put_edge(0, 0, Dir::Out, dst, &w.to_le_bytes()).unwrap();
                    }
                    writer.commit().unwrap();
                    model.extend(batch);
                }
                Operation::Abort(batch) => {
                    let mut writer = graph.create_graph_writer(&mut worker, epoch);
                    for &(dst, w) in &batch {
                        writer.put_edge(0, 0, Dir::Out, dst, &w.to_le_bytes()).unwrap();
                    }
                    writer.abort();
                }
                Operation::Compact => {
                    let mut writer = graph.create_graph_writer(&mut worker, epoch);
                    writer.compact_chain(0, 0, Dir::Out).unwrap();
                    writer.commit().unwrap();
                }
                Operation::Recycle => {
                    graph.recycle_segments(&mut worker, graph.current_epoch());
                }
            }
            graph.publish_epoch(epoch);
            visible_at.push(model.len());
        }

        for (epoch, &len) in visible_at.iter().enumerate() {
            let reader = graph.create_graph_reader(epoch as EpochId);
            let got: Vec<(VertexId, u32)> = reader
                .edges(0, 0, Dir::Out)
                .unwrap()
                .edges()
                .map(|e| (e.dst, u32::from_le_bytes(e.data.try_into().unwrap())))
                .collect();
            prop_assert_eq!(&got[..], &model[..len], "epoch {}", epoch);
            prop_assert_eq!(reader.degree(0, 0, Dir::Out).unwrap(), len);
        }
        graph.verify_chain(0, 0, Dir::Out).unwrap();
        graph.retire_worker(worker);
    }

    #[test]
    fn prop_allocator_never_hands_out_overlapping_blocks(
        ops in prop::collection::vec(arb_alloc_op(), 1..200),
    ) {
        let bm = BlockManager::with_capacity(1 << 20).unwrap();
        let mut local = LocalFreeLists::new();
        // start offset -> (end offset, order)
        let mut live: BTreeMap<u64, (u64, u8)> = BTreeMap::new();

        for op in ops {
            match op {
                AllocOp::Alloc(order) => {
                    let addr = bm.alloc(&mut local, order).unwrap();
                    prop_assert!(!addr.is_null());
                    let start = addr.raw();
                    let end = start + (1u64 << order);
                    if let Some((_, &(prev_end, _))) = live.range(..=start).next_back() {
                        prop_assert!(prev_end <= start, "overlaps predecessor at {}", start);
                    }
                    if let Some((&next_start, _)) = live.range(start..).next() {
                        prop_assert!(end <= next_start, "overlaps successor at {}", start);
                    }
                    live.insert(start, (end, order));
                }
                AllocOp::Free(pick) => {
                    if live.is_empty() {
                        continue;
                    }
                    let key = *live.keys().nth(pick % live.len()).unwrap();
                    let (_, order) = live.remove(&key).unwrap();
                    bm.free(&mut local, seggraph::types::BlockAddr::from_raw(key), order);
                }
            }
        }
        let live_bytes: u64 = live.values().map(|&(_, order)| 1u64 << order).sum();
        prop_assert_eq!(bm.used_bytes() as u64, live_bytes);
    }
}
