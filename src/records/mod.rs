pub mod file;
pub mod ingest;

use crate::error::{DbError, DbResult};

// ┌────────────────────────────────────────────────────────────────────────┐
// │ Offset │ Length │ Description                                          │
// │────────┼────────┼──────────────────────────────────────────────────────│
// │   0    │   1    │ REMOVED ('0' = live, '1' = logically removed)        │
// │   1    │   4    │ SIZE (u32): bytes occupied after this field          │
// │   5    │   8    │ NEXT_REMOVED (i64): free-list link, -1 = end         │
// │  13    │   4    │ ID (u32)                                             │
// │  17    │   4    │ YEAR (u32)                                           │
// │  21    │   4    │ AMOUNT (f32)                                         │
// │  25    │  var   │ NAME bytes, '|' terminated                           │
// │  ...   │  var   │ KIND bytes, '|' terminated                           │
// └────────────────────────────────────────────────────────────────────────┘
//
// SIZE describes the slot, not the payload: a record re-inserted into a
// freed slot keeps the slot's size and leaves garbage past its own tail.

pub const REC_LIVE: u8 = b'0';
pub const REC_REMOVED: u8 = b'1';

/// '|' closes every variable-length field.
pub const FIELD_DELIM: u8 = b'|';

/// Fixed bytes counted by the SIZE field: next-removed link + id + year
/// + amount.
pub const FIXED_TAIL: usize = 8 + 4 + 4 + 4;

/// One data record. `id` is the unique field the B-tree indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: u32,
    pub year: u32,
    pub amount: f32,
    pub name: String,
    pub kind: String,
}

impl Record {
    /// Bytes the record actually needs past the SIZE field.
    pub fn payload_size(&self) -> u32 {
        (FIXED_TAIL + self.name.len() + 1 + self.kind.len() + 1) as u32
    }

    /// Serialize into a slot of `slot_size` bytes (>= `payload_size`);
    /// the difference stays as garbage tail.
    pub(crate) fn encode(&self, slot_size: u32, next_removed: i64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 4 + slot_size as usize);
        buf.push(REC_LIVE);
        buf.extend_from_slice(&slot_size.to_le_bytes());
        buf.extend_from_slice(&next_removed.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.year.to_le_bytes());
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(FIELD_DELIM);
        buf.extend_from_slice(self.kind.as_bytes());
        buf.push(FIELD_DELIM);
        buf
    }

    /// Parse the SIZE-covered bytes of a record slot (everything after the
    /// removed flag and the size field).
    pub(crate) fn decode(body: &[u8], at: u64) -> DbResult<(Record, i64)> {
        if body.len() < FIXED_TAIL {
            return Err(DbError::CorruptRecord(at, "short record body".into()));
        }

        let next_removed = i64::from_le_bytes(body[0..8].try_into().unwrap());
        let id = u32::from_le_bytes(body[8..12].try_into().unwrap());
        let year = u32::from_le_bytes(body[12..16].try_into().unwrap());
        let amount = f32::from_le_bytes(body[16..20].try_into().unwrap());

        let mut rest = &body[FIXED_TAIL..];
        let mut take_field = |at: u64| -> DbResult<String> {
            let end = rest
                .iter()
                .position(|&b| b == FIELD_DELIM)
                .ok_or_else(|| DbError::CorruptRecord(at, "unterminated field".into()))?;
            let field = String::from_utf8(rest[..end].to_vec())
                .map_err(|_| DbError::CorruptRecord(at, "field is not UTF-8".into()))?;
            rest = &rest[end + 1..];
            Ok(field)
        };

        let name = take_field(at)?;
        let kind = take_field(at)?;

        Ok((Record { id, year, amount, name, kind }, next_removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let rec = Record {
            id: 7,
            year: 2021,
            amount: 1250.5,
            name: "acme".into(),
            kind: "retail".into(),
        };

        let bytes = rec.encode(rec.payload_size(), -1);
        assert_eq!(bytes[0], REC_LIVE);
        let size = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(size, rec.payload_size());

        let (back, next) = Record::decode(&bytes[5..], 0).unwrap();
        assert_eq!(back, rec);
        assert_eq!(next, -1);
    }

    #[test]
    fn oversized_slot_keeps_garbage_tail() {
        let rec = Record { id: 1, year: 2000, amount: 0.0, name: "a".into(), kind: "b".into() };
        let slot = rec.payload_size() + 16;
        let bytes = rec.encode(slot, -1);
        // Encoded length reflects the payload; the slot tail stays on disk.
        let (back, _) = Record::decode(&bytes[5..], 0).unwrap();
        assert_eq!(back.name, "a");
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), slot);
    }
}
