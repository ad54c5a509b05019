use std::path::Path;

use log::info;

use crate::error::{DbError, DbResult};
use crate::records::Record;
use crate::records::file::RecordFile;
use crate::storage::btree::BTree;

/// Load a CSV dataset (`id,year,amount,name,kind` with a header row) into
/// the record file, indexing every row by id. Returns how many records
/// were loaded.
pub fn load_csv(path: &Path, records: &mut RecordFile, index: &mut BTree) -> DbResult<usize> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut loaded = 0usize;

    for row in reader.records() {
        let row = row?;
        let rec = record_from_row(&row)?;
        let offset = records.insert(&rec)?;
        index.insert(rec.id, offset)?;
        loaded += 1;
    }

    info!("csv ingest: {} records from {}", loaded, path.display());
    Ok(loaded)
}

fn record_from_row(row: &csv::StringRecord) -> DbResult<Record> {
    let field = |i: usize| -> DbResult<&str> {
        row.get(i).ok_or_else(|| DbError::BadValue(format!("missing column {}", i)))
    };

    Ok(Record {
        id: parse(field(0)?)?,
        year: parse(field(1)?)?,
        amount: parse(field(2)?)?,
        name: field(3)?.trim().to_string(),
        kind: field(4)?.trim().to_string(),
    })
}

fn parse<T: std::str::FromStr>(s: &str) -> DbResult<T> {
    s.trim().parse().map_err(|_| DbError::BadValue(s.to_string()))
}
