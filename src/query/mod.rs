use crate::error::{DbError, DbResult};
use crate::records::Record;

/// One field-equality condition of an ad-hoc query.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    IdEquals(u32),
    YearEquals(u32),
    AmountEquals(f32),
    NameEquals(String),
    KindEquals(String),
}

impl Cond {
    /// Build a condition from a textual `field` / `value` pair, as the
    /// driver reads them.
    pub fn parse(field: &str, value: &str) -> DbResult<Cond> {
        let bad = || DbError::BadValue(value.to_string());
        match field {
            "id" => Ok(Cond::IdEquals(value.parse().map_err(|_| bad())?)),
            "year" => Ok(Cond::YearEquals(value.parse().map_err(|_| bad())?)),
            "amount" => Ok(Cond::AmountEquals(value.parse().map_err(|_| bad())?)),
            "name" => Ok(Cond::NameEquals(value.to_string())),
            "kind" => Ok(Cond::KindEquals(value.to_string())),
            _ => Err(DbError::BadValue(format!("unknown field '{}'", field))),
        }
    }

    fn matches(&self, rec: &Record) -> bool {
        match self {
            Cond::IdEquals(v) => rec.id == *v,
            Cond::YearEquals(v) => rec.year == *v,
            Cond::AmountEquals(v) => rec.amount == *v,
            Cond::NameEquals(v) => rec.name == *v,
            Cond::KindEquals(v) => rec.kind == *v,
        }
    }
}

/// A conjunction of equality conditions. No conditions matches everything.
#[derive(Debug, Clone, Default)]
pub struct Query {
    conds: Vec<Cond>,
}

impl Query {
    pub fn new() -> Query {
        Query::default()
    }

    pub fn with(mut self, cond: Cond) -> Query {
        self.conds.push(cond);
        self
    }

    /// The id this query pins down, if any; lets the engine answer it
    /// through the index instead of a scan.
    pub fn unique_id(&self) -> Option<u32> {
        self.conds.iter().find_map(|c| match c {
            Cond::IdEquals(id) => Some(*id),
            _ => None,
        })
    }

    pub fn matches(&self, rec: &Record) -> bool {
        self.conds.iter().all(|c| c.matches(rec))
    }
}
