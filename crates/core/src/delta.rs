//! Signed row deltas (specification §4.7 "IVM store & delta engine").
//!
//! A delta is the unit the scheduler batches and the IVM store applies: a
//! row id paired with a sign denoting insertion (`+1`) or deletion (`−1`).

use crate::row_id::RowId;

/// The sign of a delta: insertion or deletion of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    /// Row insertion.
    Plus,
    /// Row deletion.
    Minus,
}

impl Sign {
    /// The signed integer this sign represents.
    pub fn as_i8(self) -> i8 {
        match self {
            Sign::Plus => 1,
            Sign::Minus => -1,
        }
    }

    /// The opposite sign.
    pub fn flip(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }
}

/// A signed change to the live set: insertion or deletion of `row_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delta {
    /// The row this delta concerns.
    pub row_id: RowId,
    /// Whether the row is being added or removed.
    pub sign: Sign,
}

impl Delta {
    /// A `+1` delta for `row_id`.
    pub fn insert(row_id: RowId) -> Self {
        Delta { row_id, sign: Sign::Plus }
    }

    /// A `-1` delta for `row_id`.
    pub fn remove(row_id: RowId) -> Self {
        Delta { row_id, sign: Sign::Minus }
    }

    /// `true` for a `+1` delta.
    pub fn is_insert(&self) -> bool {
        self.sign == Sign::Plus
    }

    /// `true` for a `-1` delta.
    pub fn is_remove(&self) -> bool {
        self.sign == Sign::Minus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_construct_opposite_signs() {
        let row = RowId::physical(1);
        assert!(Delta::insert(row).is_insert());
        assert!(Delta::remove(row).is_remove());
    }

    #[test]
    fn flip_inverts_sign() {
        assert_eq!(Sign::Plus.flip(), Sign::Minus);
        assert_eq!(Sign::Minus.flip(), Sign::Plus);
    }

    #[test]
    fn as_i8_matches_sign_semantics() {
        assert_eq!(Sign::Plus.as_i8(), 1);
        assert_eq!(Sign::Minus.as_i8(), -1);
    }
}
