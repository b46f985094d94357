//! Transaction isolation levels.

/// The closed set of transaction isolation levels.
///
/// The numeric ids match the constants used by common driver interfaces so
/// that levels stored in configuration survive a round-trip through
/// [`TransactionIsolation::from_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionIsolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TransactionIsolation {
    /// The numeric driver-level id for this level.
    pub fn id(self) -> i32 {
        match self {
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }

    /// Look up a level by its numeric id.
    pub fn from_id(id: i32) -> Option<Self> {
        [
            Self::ReadUncommitted,
            Self::ReadCommitted,
            Self::RepeatableRead,
            Self::Serializable,
        ]
        .into_iter()
        .find(|level| level.id() == id)
    }

    /// The level as it appears in `SET TRANSACTION ISOLATION LEVEL ...`.
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_id_round_trip() {
        for level in [
            TransactionIsolation::ReadUncommitted,
            TransactionIsolation::ReadCommitted,
            TransactionIsolation::RepeatableRead,
            TransactionIsolation::Serializable,
        ] {
            assert_eq!(TransactionIsolation::from_id(level.id()), Some(level));
        }
    }

    #[test]
    fn test_from_id_unknown() {
        assert_eq!(TransactionIsolation::from_id(0), None);
        assert_eq!(TransactionIsolation::from_id(3), None);
        assert_eq!(TransactionIsolation::from_id(16), None);
    }

    #[test]
    fn test_sql_rendering() {
        assert_eq!(
            TransactionIsolation::ReadCommitted.as_sql(),
            "READ COMMITTED"
        );
        assert_eq!(TransactionIsolation::Serializable.as_sql(), "SERIALIZABLE");
    }
}
