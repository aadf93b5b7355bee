//! # Cooperative Writer Tests
//!
//! Several ranks of a `ThreadGroup` write one table together, each filling
//! its own rows; a single reader sees the merged stream.

use colstep_core::{
    make_object, register_colstep_manager, tags, Array, ColStepError, DataManager, EngineConfig,
    ManagerSpec, ProcessGroup, PropertyReader, PropertyWriter, StorageManager, ThreadGroup,
};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const RANKS: usize = 4;

fn rank_manager(base: &Path, group: ProcessGroup) -> StorageManager {
    let mut manager = StorageManager::with_group(EngineConfig::default(), group).unwrap();
    manager.set_file_name(base);
    manager.make_scalar_column("rank", tags::INT, "").unwrap();
    let cells = manager.make_dir_arr_column("cells", tags::DOUBLE, "").unwrap();
    manager.set_shape_column(cells, &[5, 6]).unwrap();
    manager
}

/// Run one writer per rank; returns rank 0's descriptor
fn write_table(base: &PathBuf, skip_rank: Option<usize>) -> Vec<u8> {
    let groups = ThreadGroup::new(RANKS);
    let descriptors: Vec<Vec<u8>> = thread::scope(|scope| {
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                scope.spawn(move || {
                    let rank = group.rank();
                    let mut manager = rank_manager(base, group);
                    manager.create(RANKS as u64).unwrap();

                    let row = rank as u64;
                    if Some(rank) != skip_rank {
                        manager
                            .column(0)
                            .unwrap()
                            .put_scalar(row, rank as i32)
                            .unwrap();
                        let cell = Array::from_fn(vec![5, 6], |i| (rank * 100 + i) as f64);
                        manager.column(1).unwrap().put_array(row, &cell).unwrap();
                    }

                    let mut out = PropertyWriter::new();
                    manager.flush(&mut out, true).unwrap();
                    manager.close().unwrap();
                    out.into_bytes().unwrap().to_vec()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    descriptors.into_iter().next().unwrap()
}

fn reader(base: &Path, descriptor: Vec<u8>) -> StorageManager {
    let mut manager = rank_manager(base, ProcessGroup::single());
    manager
        .open(RANKS as u64, &mut PropertyReader::new(descriptor))
        .unwrap();
    manager
}

#[test]
fn test_ranks_write_disjoint_rows() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("table.f0");
    let descriptor = write_table(&base, None);

    for rank in 0..RANKS {
        assert!(temp_dir
            .path()
            .join("table.f0.colstep")
            .join(format!("data.{}", rank))
            .exists());
    }

    let mut manager = reader(&base, descriptor);
    let ranks = manager.column(0).unwrap().get_scalar_column::<i32>().unwrap();
    assert_eq!(ranks, vec![0, 1, 2, 3]);

    let all = manager.column(1).unwrap().get_column::<f64>().unwrap();
    assert_eq!(all.shape(), &[RANKS as u64, 5, 6]);
    for rank in 0..RANKS {
        let cell = all.row(rank as u64).unwrap();
        assert_eq!(cell.as_slice()[0], (rank * 100) as f64);
        assert_eq!(cell.as_slice()[29], (rank * 100 + 29) as f64);
    }
}

#[test]
fn test_silent_rank_still_joins_steps() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("table.f0");
    let descriptor = write_table(&base, Some(2));

    let mut manager = reader(&base, descriptor);
    let mut column = manager.column(0).unwrap();
    assert_eq!(column.get_scalar::<i32>(3).unwrap(), 3);
    assert!(matches!(
        column.get_scalar::<i32>(2),
        Err(ColStepError::SelectionNotWritten { .. })
    ));
}

#[test]
fn test_departed_rank_aborts_peers() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("table.f0");
    let groups = ThreadGroup::with_timeout(2, Duration::from_millis(200));

    let results: Vec<Result<(), ColStepError>> = thread::scope(|scope| {
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let base = &base;
                scope.spawn(move || {
                    let rank = group.rank();
                    let mut manager = rank_manager(base, group);
                    manager.create(2)?;
                    if rank == 1 {
                        // leaves without joining the next step boundary
                        std::mem::forget(manager);
                        return Ok(());
                    }
                    manager.advance_step().map(|_| ())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(matches!(
        results[0],
        Err(ColStepError::CollectiveAborted(_))
    ));
    assert!(results[1].is_ok());
}

#[test]
fn test_failed_create_releases_peers() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("table.f0");
    let groups = ThreadGroup::new(2);

    let results: Vec<Result<(), ColStepError>> = thread::scope(|scope| {
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let base = &base;
                scope.spawn(move || {
                    let rank = group.rank();
                    let mut manager = if rank == 0 {
                        rank_manager(base, group)
                    } else {
                        let mut manager =
                            StorageManager::with_group(EngineConfig::default(), group).unwrap();
                        manager.make_scalar_column("rank", tags::INT, "").unwrap();
                        manager
                    };
                    manager.create(2)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(matches!(
        results[0],
        Err(ColStepError::CollectiveAborted(_))
    ));
    assert!(matches!(results[1], Err(ColStepError::UsageOrder(_))));
}

#[test]
fn test_registered_constructor() {
    register_colstep_manager();
    let spec = ManagerSpec::from_json(r#"{"EngineType": "Inline"}"#).unwrap();
    let mut manager = make_object("ColStepStMan", &spec).unwrap();
    manager.set_file_name(Path::new("mem/table.f0"));
    manager.make_scalar_column("x", tags::UINT, "").unwrap();
    manager.create(2).unwrap();

    let typed = manager
        .as_any_mut()
        .downcast_mut::<StorageManager>()
        .unwrap();
    typed.column(0).unwrap().put_scalar(1, 9u32).unwrap();
    assert_eq!(typed.column(0).unwrap().get_scalar::<u32>(1).unwrap(), 9);

    assert!(manager.add_row(1).is_err());
    manager.resync(2).unwrap();
}
