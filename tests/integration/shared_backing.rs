use seggraph::storage::{ArenaOptions, BackingChoice, EdgeBlock, GraphOptions, GraphSchema, SegGraph};
use seggraph::types::{Dir, VertexId};
use seggraph::{Arena, BackingKind, Result, SharedBacking};

#[test]
fn blocks_are_readable_through_a_second_mapping() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.arena");
    let arena_opts = ArenaOptions::new(1 << 16)
        .name("shared-test")
        .backing(BackingChoice::Shared(path.clone()))
        .growth_increment(4096);
    let mapped_len = arena_opts.mapped_len();
    let schema = GraphSchema::new().opaque_edge_label("calls", 0);
    let graph = SegGraph::open(
        GraphOptions::new(schema, 8, 1 << 16)
            .arena(arena_opts)
            .initial_block_capacity(4)
            .max_block_capacity(4),
    )?;
    assert_eq!(graph.allocator().arena().kind(), BackingKind::Shared);

    let mut worker = graph.register_worker();
    let mut txn = graph.begin_transaction(&mut worker);
    for dst in [3, 5, 7, 9, 11] {
        txn.put_edge(1, 0, Dir::Out, dst, &[])?;
    }
    txn.commit()?;
    let head = graph.chain_head(1, 0, Dir::Out)?;

    let attached = Arena::new(Box::new(SharedBacking::open(&path, mapped_len)?));
    let newest = EdgeBlock::open(&attached, head)?;
    assert_eq!(newest.num_entries(), 1);
    assert_eq!(newest.prev_num_entries(), 4);
    assert_eq!(newest.dst(0), 11);

    let oldest = EdgeBlock::open(&attached, newest.prev_pointer())?;
    let dsts: Vec<VertexId> = (0..oldest.num_entries() as usize).map(|k| oldest.dst(k)).collect();
    assert_eq!(dsts, vec![3, 5, 7, 9]);
    assert!(oldest.prev_pointer().is_null());

    graph.retire_worker(worker);
    Ok(())
}

#[test]
fn shared_file_grows_in_increments() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("grow.arena");
    let backing = SharedBacking::create(&path, 1 << 16)?;
    assert_eq!(backing.file_len()?, 0);
    let arena = Arena::new(Box::new(backing));
    arena.extend_to(8192)?;
    assert!(arena.extend_to(1 << 20).is_err());

    let reopened = SharedBacking::open(&path, 1 << 16)?;
    assert_eq!(reopened.file_len()?, 8192);
    assert_eq!(reopened.path(), path.as_path());
    Ok(())
}

#[test]
fn non_edge_offsets_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("empty.arena");
    let backing = SharedBacking::create(&path, 1 << 12)?;
    let arena = Arena::new(Box::new(backing));
    arena.extend_to(1 << 12)?;
    let err = EdgeBlock::open(&arena, seggraph::types::BlockAddr::from_raw(64));
    assert!(matches!(err, Err(seggraph::SegGraphError::Corruption(_))));
    Ok(())
}
