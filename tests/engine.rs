use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use arbordb::engine::Database;
use arbordb::error::DbError;
use arbordb::query::{Cond, Query};
use arbordb::records::Record;
use arbordb::storage::pager::OpenMode;

fn paths(dir: &TempDir) -> (PathBuf, PathBuf) {
    (dir.path().join("test.dat"), dir.path().join("test.idx"))
}

fn open_rw(dir: &TempDir) -> Database {
    let (data, index) = paths(dir);
    Database::open(&data, &index, OpenMode::ReadWrite).unwrap()
}

fn sample(id: u32, year: u32, name: &str, kind: &str) -> Record {
    Record {
        id,
        year,
        amount: id as f32 * 10.0,
        name: name.to_string(),
        kind: kind.to_string(),
    }
}

#[test]
fn insert_and_find_through_the_index() {
    let dir = TempDir::new().unwrap();
    let mut db = open_rw(&dir);

    db.insert(&sample(5, 2021, "acme", "retail")).unwrap();
    db.insert(&sample(2, 2019, "globex", "energy")).unwrap();
    db.insert(&sample(9, 2021, "initech", "tech")).unwrap();

    assert_eq!(db.find(2).unwrap().unwrap().name, "globex");
    assert_eq!(db.find(9).unwrap().unwrap().year, 2021);
    assert!(db.find(4).unwrap().is_none());
    db.close().unwrap();
}

#[test]
fn duplicate_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut db = open_rw(&dir);

    db.insert(&sample(1, 2020, "acme", "retail")).unwrap();
    assert!(matches!(
        db.insert(&sample(1, 2022, "other", "tech")),
        Err(DbError::DuplicateId(1))
    ));
    // The original record is untouched.
    assert_eq!(db.find(1).unwrap().unwrap().name, "acme");
    db.close().unwrap();
}

#[test]
fn remove_drops_record_and_index_entry() {
    let dir = TempDir::new().unwrap();
    let mut db = open_rw(&dir);

    db.insert(&sample(1, 2020, "acme", "retail")).unwrap();
    db.insert(&sample(2, 2020, "globex", "energy")).unwrap();

    assert!(db.remove(1).unwrap());
    assert!(db.find(1).unwrap().is_none());
    assert!(!db.remove(1).unwrap());
    assert_eq!(db.find(2).unwrap().unwrap().name, "globex");
    db.close().unwrap();
}

#[test]
fn update_that_relocates_repoints_the_index() {
    let dir = TempDir::new().unwrap();
    let mut db = open_rw(&dir);

    db.insert(&sample(1, 2020, "tiny", "x")).unwrap();
    db.insert(&sample(2, 2020, "padding-record", "y")).unwrap();

    // The grown name cannot fit the original slot, forcing relocation.
    let grown = sample(1, 2024, "a-very-long-replacement-name-indeed", "x");
    assert!(db.update(&grown).unwrap());
    assert_eq!(db.find(1).unwrap().unwrap(), grown);
    assert_eq!(db.find(2).unwrap().unwrap().name, "padding-record");

    assert!(!db.update(&sample(7, 2020, "missing", "z")).unwrap());
    db.close().unwrap();
}

#[test]
fn select_uses_the_index_when_an_id_condition_exists() {
    let dir = TempDir::new().unwrap();
    let mut db = open_rw(&dir);

    db.insert(&sample(1, 2020, "acme", "retail")).unwrap();
    db.insert(&sample(2, 2021, "globex", "energy")).unwrap();

    let q = Query::new()
        .with(Cond::parse("id", "2").unwrap())
        .with(Cond::parse("year", "2021").unwrap());
    let hits = db.select(&q).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "globex");

    // Same id, contradictory year: the indexed record fails the filter.
    let q = Query::new()
        .with(Cond::parse("id", "2").unwrap())
        .with(Cond::parse("year", "1999").unwrap());
    assert!(db.select(&q).unwrap().is_empty());
    db.close().unwrap();
}

#[test]
fn select_without_id_scans_every_live_record() {
    let dir = TempDir::new().unwrap();
    let mut db = open_rw(&dir);

    db.insert(&sample(1, 2020, "acme", "retail")).unwrap();
    db.insert(&sample(2, 2021, "globex", "energy")).unwrap();
    db.insert(&sample(3, 2021, "initech", "tech")).unwrap();
    db.remove(2).unwrap();

    let q = Query::new().with(Cond::parse("year", "2021").unwrap());
    let hits = db.select(&q).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 3);

    // An empty query matches everything still live.
    assert_eq!(db.select(&Query::new()).unwrap().len(), 2);
    db.close().unwrap();
}

#[test]
fn csv_load_populates_records_and_index() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("seed.csv");
    fs::write(
        &csv,
        "id,year,amount,name,kind\n\
         10,2018,150.5,acme,retail\n\
         4,2022,99.0,globex,energy\n\
         7,2020,12.25,initech,tech\n",
    )
    .unwrap();

    let mut db = open_rw(&dir);
    assert_eq!(db.load_csv(&csv).unwrap(), 3);

    assert_eq!(db.find(4).unwrap().unwrap().name, "globex");
    assert_eq!(db.find(7).unwrap().unwrap().amount, 12.25);
    assert_eq!(db.find(10).unwrap().unwrap().year, 2018);
    db.close().unwrap();
}

#[test]
fn database_survives_close_and_reopen() {
    let dir = TempDir::new().unwrap();
    let (data, index) = paths(&dir);

    let mut db = Database::open(&data, &index, OpenMode::ReadWrite).unwrap();
    for id in 1..=20u32 {
        db.insert(&sample(id, 2000 + id, "record", "kind")).unwrap();
    }
    db.remove(13).unwrap();
    db.close().unwrap();

    let mut db = Database::open(&data, &index, OpenMode::ReadOnly).unwrap();
    assert!(db.find(13).unwrap().is_none());
    for id in (1..=20u32).filter(|&id| id != 13) {
        assert_eq!(db.find(id).unwrap().unwrap().year, 2000 + id);
    }
    db.close().unwrap();
}
