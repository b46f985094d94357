//! Result-row processors.
//!
//! A processor is fed decoded rows one at a time, in query order, until it
//! signals that it is done or rows run out; its accumulated output is the
//! result of the query call. `AllRows` and `FirstRow` cover the common cases;
//! callers implement the trait for custom reducers.

use crate::error::DbResult;
use crate::value::{SqlRow, SqlValue};

/// A reducer over the rows of a query result.
pub trait ResultProcessor {
    type Output;

    /// Process one row.
    ///
    /// Return `Ok(true)` to receive the next row, `Ok(false)` to stop early.
    /// Rows arrive in the order produced by the query.
    fn process(&mut self, row: SqlRow) -> DbResult<bool>;

    /// The accumulated result, consumed after the last row.
    fn into_result(self) -> Self::Output;
}

/// Collects every row, reduced to a scalar (one column) or ordered list.
#[derive(Debug, Default)]
pub struct AllRows {
    rows: Vec<SqlValue>,
}

impl AllRows {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultProcessor for AllRows {
    type Output = Vec<SqlValue>;

    fn process(&mut self, row: SqlRow) -> DbResult<bool> {
        self.rows.push(row.reduce());
        Ok(true)
    }

    fn into_result(self) -> Vec<SqlValue> {
        self.rows
    }
}

/// Keeps the first row only and stops reading further rows.
#[derive(Debug, Default)]
pub struct FirstRow {
    value: Option<SqlValue>,
}

impl FirstRow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultProcessor for FirstRow {
    type Output = Option<SqlValue>;

    fn process(&mut self, row: SqlRow) -> DbResult<bool> {
        self.value = Some(row.reduce());
        Ok(false)
    }

    fn into_result(self) -> Option<SqlValue> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<SqlValue>) -> SqlRow {
        let columns = (0..values.len()).map(|i| format!("c{i}")).collect();
        SqlRow::new(columns, values)
    }

    #[test]
    fn test_all_rows_collects_in_order() {
        let mut p = AllRows::new();
        assert!(p.process(row(vec![SqlValue::Int(1)])).unwrap());
        assert!(p.process(row(vec![SqlValue::Int(2)])).unwrap());
        assert_eq!(p.into_result(), vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_first_row_stops_after_one() {
        let mut p = FirstRow::new();
        assert!(!p.process(row(vec![SqlValue::Int(9)])).unwrap());
        assert_eq!(p.into_result(), Some(SqlValue::Int(9)));
    }

    #[test]
    fn test_first_row_empty_result() {
        let p = FirstRow::new();
        assert_eq!(p.into_result(), None);
    }
}
