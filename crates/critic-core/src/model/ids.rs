//! Typed row identifiers.
//!
//! Every persisted entity is addressed by an `i64` row id wrapped in its own
//! newtype, so a commit id can never be passed where a user id is expected.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw row id.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

define_id!(
    /// A registered user.
    UserId,
    "u"
);
define_id!(
    /// A review.
    ReviewId,
    "r"
);
define_id!(
    /// A comment chain.
    ChainId,
    "ch"
);
define_id!(
    /// A single comment inside a chain.
    CommentId,
    "c"
);
define_id!(
    /// A commit tracked by at least one review.
    CommitId,
    "co"
);
define_id!(
    /// A repository path.
    FileId,
    "f"
);
define_id!(
    /// A (parent, child) commit pair within a review.
    ChangesetId,
    "cs"
);
define_id!(
    /// A (changeset, file) pair within a review; the unit of assignment.
    ReviewFileId,
    "rf"
);
define_id!(
    /// A persisted review filter.
    FilterId,
    "flt"
);
define_id!(
    /// A rebase recorded in a review's history.
    RebaseId,
    "rb"
);
define_id!(
    /// A finished batch of comment operations.
    BatchId,
    "b"
);
define_id!(
    /// A finished batch of assignment and filter changes.
    TransactionId,
    "tx"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_prefix() {
        assert_eq!(CommitId(42).to_string(), "co-42");
        assert_eq!(ReviewFileId(7).to_string(), "rf-7");
    }

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&BatchId(12)).unwrap();
        assert_eq!(json, "12");
        let parsed: ChainId = serde_json::from_str("99").unwrap();
        assert_eq!(parsed, ChainId(99));
    }

    #[test]
    fn test_sql_roundtrip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let value: UserId = conn
            .query_row("SELECT ?1", [UserId(5)], |row| row.get(0))
            .unwrap();
        assert_eq!(value, UserId(5));
    }
}
