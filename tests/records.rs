use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use arbordb::error::DbError;
use arbordb::records::file::{RecordFile, UpdateOutcome};
use arbordb::records::Record;
use arbordb::storage::pager::OpenMode;

fn data_path(dir: &TempDir) -> PathBuf {
    dir.path().join("test.dat")
}

fn sample(id: u32, name: &str) -> Record {
    Record {
        id,
        year: 2020 + id % 5,
        amount: id as f32 * 1.5,
        name: name.to_string(),
        kind: "standard".to_string(),
    }
}

#[test]
fn insert_then_read_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut file = RecordFile::open(&data_path(&dir), OpenMode::ReadWrite).unwrap();

    let rec = sample(1, "alpha");
    let at = file.insert(&rec).unwrap();
    assert_eq!(file.read_at(at).unwrap(), rec);
    assert_eq!(file.header().n_valid, 1);
    file.close().unwrap();
}

#[test]
fn removed_record_is_unreadable_and_skipped_by_scan() {
    let dir = TempDir::new().unwrap();
    let mut file = RecordFile::open(&data_path(&dir), OpenMode::ReadWrite).unwrap();

    let a = file.insert(&sample(1, "alpha")).unwrap();
    let b = file.insert(&sample(2, "beta")).unwrap();
    file.remove_at(a).unwrap();

    assert!(matches!(file.read_at(a), Err(DbError::NoRecord(_))));
    let live = file.scan().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].0, b);
    assert_eq!(live[0].1.id, 2);
    assert_eq!(file.header().n_valid, 1);
    assert_eq!(file.header().n_removed, 1);
    file.close().unwrap();
}

#[test]
fn insert_reuses_first_fitting_freed_slot() {
    let dir = TempDir::new().unwrap();
    let mut file = RecordFile::open(&data_path(&dir), OpenMode::ReadWrite).unwrap();

    let a = file.insert(&sample(1, "a-rather-long-record-name")).unwrap();
    let _b = file.insert(&sample(2, "beta")).unwrap();
    file.remove_at(a).unwrap();

    // New record fits in the freed slot, so no bytes are appended.
    let len_before = fs::metadata(data_path(&dir)).unwrap().len();
    let c = file.insert(&sample(3, "gamma")).unwrap();
    assert_eq!(c, a);
    assert_eq!(fs::metadata(data_path(&dir)).unwrap().len(), len_before);
    assert_eq!(file.read_at(c).unwrap().name, "gamma");
    file.close().unwrap();
}

#[test]
fn free_list_skips_slots_that_are_too_small() {
    let dir = TempDir::new().unwrap();
    let mut file = RecordFile::open(&data_path(&dir), OpenMode::ReadWrite).unwrap();

    let a = file.insert(&sample(1, "tiny")).unwrap();
    let b = file.insert(&sample(2, "a-much-roomier-record-name")).unwrap();
    file.insert(&sample(3, "tail")).unwrap();
    file.remove_at(a).unwrap();
    file.remove_at(b).unwrap();

    // The roomy hole takes the big record, leaving the small one intact.
    let c = file.insert(&sample(4, "needs-more-room-than-tiny")).unwrap();
    assert_eq!(c, b);
    assert_eq!(file.read_at(c).unwrap().id, 4);
    let d = file.insert(&sample(5, "wee")).unwrap();
    assert_eq!(d, a);
    file.close().unwrap();
}

#[test]
fn update_in_place_when_the_slot_still_fits() {
    let dir = TempDir::new().unwrap();
    let mut file = RecordFile::open(&data_path(&dir), OpenMode::ReadWrite).unwrap();

    let at = file.insert(&sample(1, "original")).unwrap();
    let mut rec = sample(1, "orig");
    rec.amount = 9.25;
    assert!(matches!(
        file.update_at(at, &rec).unwrap(),
        UpdateOutcome::InPlace
    ));
    assert_eq!(file.read_at(at).unwrap(), rec);
    assert_eq!(file.header().n_valid, 1);
    file.close().unwrap();
}

#[test]
fn update_relocates_when_the_record_outgrows_its_slot() {
    let dir = TempDir::new().unwrap();
    let mut file = RecordFile::open(&data_path(&dir), OpenMode::ReadWrite).unwrap();

    let at = file.insert(&sample(1, "short")).unwrap();
    let grown = sample(1, "a-considerably-longer-name-that-cannot-fit");
    let outcome = file.update_at(at, &grown).unwrap();
    let UpdateOutcome::Relocated(new_at) = outcome else {
        panic!("expected relocation");
    };
    assert_ne!(new_at, at);
    assert_eq!(file.read_at(new_at).unwrap(), grown);
    assert!(matches!(file.read_at(at), Err(DbError::NoRecord(_))));
    assert_eq!(file.header().n_valid, 1);
    file.close().unwrap();
}

#[test]
fn header_counts_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);

    let mut file = RecordFile::open(&path, OpenMode::ReadWrite).unwrap();
    let a = file.insert(&sample(1, "alpha")).unwrap();
    file.insert(&sample(2, "beta")).unwrap();
    file.insert(&sample(3, "gamma")).unwrap();
    file.remove_at(a).unwrap();
    file.close().unwrap();

    let mut file = RecordFile::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(file.header().n_valid, 2);
    assert_eq!(file.header().n_removed, 1);
    assert_eq!(file.scan().unwrap().len(), 2);
    file.close().unwrap();
}

#[test]
fn inconsistent_data_file_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);

    let mut file = RecordFile::open(&path, OpenMode::ReadWrite).unwrap();
    file.insert(&sample(1, "alpha")).unwrap();
    drop(file);

    assert!(matches!(
        RecordFile::open(&path, OpenMode::ReadOnly),
        Err(DbError::Inconsistent)
    ));
}

#[test]
fn read_only_handle_rejects_mutation() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    RecordFile::open(&path, OpenMode::ReadWrite).unwrap().close().unwrap();

    let mut file = RecordFile::open(&path, OpenMode::ReadOnly).unwrap();
    assert!(matches!(file.insert(&sample(1, "x")), Err(DbError::ReadOnly)));
    assert!(matches!(file.remove_at(25), Err(DbError::ReadOnly)));
    file.close().unwrap();
}
