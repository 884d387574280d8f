//! Engine lock identifiers.
//!
//! Table locks are named `<trx_id>:<table_id>`, record locks
//! `<trx_id>:<space_id>:<page_no>:<heap_no>`. The same strings identify the
//! two ends of a lock wait.

use std::fmt;
use std::str::FromStr;

use falcon_common::error::LockIdError;
use falcon_common::types::{HeapNo, PageNo, SpaceId, TableId, TxnId};
use falcon_txn::{Lock, LockKind};

/// Decoded identity of one table lock or one row slot of a record lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockIdKey {
    Table {
        trx_id: TxnId,
        table_id: TableId,
    },
    Record {
        trx_id: TxnId,
        space_id: SpaceId,
        page_no: PageNo,
        heap_no: HeapNo,
    },
}

impl LockIdKey {
    /// Key of `lock` as owned by `trx_id`. `heap_no` selects the row slot of a
    /// record lock and is ignored for table locks.
    pub fn of(lock: &Lock, trx_id: TxnId, heap_no: HeapNo) -> Self {
        match lock.kind() {
            LockKind::Table { table_id } => LockIdKey::Table {
                trx_id,
                table_id: *table_id,
            },
            LockKind::Record(rec) => LockIdKey::Record {
                trx_id,
                space_id: rec.space_id,
                page_no: rec.page_no,
                heap_no,
            },
        }
    }

    pub fn trx_id(&self) -> TxnId {
        match self {
            LockIdKey::Table { trx_id, .. } | LockIdKey::Record { trx_id, .. } => *trx_id,
        }
    }

    pub fn heap_no(&self) -> Option<HeapNo> {
        match self {
            LockIdKey::Table { .. } => None,
            LockIdKey::Record { heap_no, .. } => Some(*heap_no),
        }
    }

    /// Same lock kind on the same table, or the same page for record locks.
    /// Row slots are compared separately.
    pub fn matches_resource(&self, lock: &Lock) -> bool {
        match (self, lock.kind()) {
            (LockIdKey::Table { table_id, .. }, LockKind::Table { table_id: t }) => table_id == t,
            (
                LockIdKey::Record {
                    space_id, page_no, ..
                },
                LockKind::Record(rec),
            ) => *space_id == rec.space_id && *page_no == rec.page_no,
            _ => false,
        }
    }
}

impl fmt::Display for LockIdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockIdKey::Table { trx_id, table_id } => write!(f, "{}:{}", trx_id, table_id),
            LockIdKey::Record {
                trx_id,
                space_id,
                page_no,
                heap_no,
            } => write!(f, "{}:{}:{}:{}", trx_id, space_id, page_no, heap_no),
        }
    }
}

impl FromStr for LockIdKey {
    type Err = LockIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(LockIdError::Empty);
        }
        let fields: Vec<&str> = s.split(':').collect();
        let wide = |index: usize| parse_wide(s, index, fields[index]);
        let narrow = |index: usize| parse_narrow(s, index, fields[index]);

        match fields.len() {
            2 => Ok(LockIdKey::Table {
                trx_id: TxnId(wide(0)?),
                table_id: TableId(wide(1)?),
            }),
            4 => Ok(LockIdKey::Record {
                trx_id: TxnId(wide(0)?),
                space_id: SpaceId(narrow(1)?),
                page_no: PageNo(narrow(2)?),
                heap_no: HeapNo(narrow(3)?),
            }),
            n => Err(LockIdError::FieldCount(s.to_string(), n)),
        }
    }
}

/// Parse a 64-bit field. Values above `i64::MAX` are taken as unsigned so
/// synthetic transaction ids round-trip; negative values wrap.
fn parse_wide(id: &str, index: usize, field: &str) -> Result<u64, LockIdError> {
    if !field.bytes().all(|b| b.is_ascii_digit() || b == b'-' || b == b'+') {
        return Err(LockIdError::InvalidField {
            id: id.to_string(),
            index,
        });
    }
    if let Ok(v) = field.parse::<u64>() {
        return Ok(v);
    }
    match field.parse::<i64>() {
        Ok(v) => Ok(v as u64),
        Err(e) => match e.kind() {
            std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
                Err(LockIdError::OutOfRange {
                    id: id.to_string(),
                    index,
                })
            }
            _ => Err(LockIdError::InvalidField {
                id: id.to_string(),
                index,
            }),
        },
    }
}

fn parse_narrow(id: &str, index: usize, field: &str) -> Result<u32, LockIdError> {
    let wide = parse_wide(id, index, field)?;
    u32::try_from(wide).map_err(|_| LockIdError::OutOfRange {
        id: id.to_string(),
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lock_id() {
        let key: LockIdKey = "1234:77".parse().unwrap();
        assert_eq!(
            key,
            LockIdKey::Table {
                trx_id: TxnId(1234),
                table_id: TableId(77),
            }
        );
        assert_eq!(key.to_string(), "1234:77");
        assert_eq!(key.heap_no(), None);
    }

    #[test]
    fn test_record_lock_id() {
        let key: LockIdKey = "9:4:7:2".parse().unwrap();
        assert_eq!(
            key,
            LockIdKey::Record {
                trx_id: TxnId(9),
                space_id: SpaceId(4),
                page_no: PageNo(7),
                heap_no: HeapNo(2),
            }
        );
        assert_eq!(key.to_string(), "9:4:7:2");
        assert_eq!(key.trx_id(), TxnId(9));
        assert_eq!(key.heap_no(), Some(HeapNo(2)));
    }

    #[test]
    fn test_synthetic_trx_id_round_trips() {
        let id = format!("{}:3", (1u64 << 63) | 5);
        let key: LockIdKey = id.parse().unwrap();
        assert_eq!(key.trx_id(), TxnId((1u64 << 63) | 5));
        assert_eq!(key.to_string(), id);
    }

    #[test]
    fn test_negative_wraps() {
        let key: LockIdKey = "-1:3".parse().unwrap();
        assert_eq!(key.trx_id(), TxnId(u64::MAX));
    }

    #[test]
    fn test_malformed_ids() {
        assert_eq!("".parse::<LockIdKey>(), Err(LockIdError::Empty));
        for bad in ["12", "1:2:3", "1:2:3:4:5", "1::2", ":1", "1:2:"] {
            assert!(bad.parse::<LockIdKey>().is_err(), "{bad}");
        }
        assert!(matches!(
            "1:2:3".parse::<LockIdKey>(),
            Err(LockIdError::FieldCount(_, 3))
        ));
        for bad in ["1:2x", "1: 2", " 1:2", "1:2 ", "a:b", "1:0x10"] {
            assert!(
                matches!(bad.parse::<LockIdKey>(), Err(LockIdError::InvalidField { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_out_of_range_fields() {
        assert!(matches!(
            "1:4294967296:0:2".parse::<LockIdKey>(),
            Err(LockIdError::OutOfRange { index: 1, .. })
        ));
        assert!(matches!(
            "1:4:-7:2".parse::<LockIdKey>(),
            Err(LockIdError::OutOfRange { index: 2, .. })
        ));
        assert!(matches!(
            "99999999999999999999:1".parse::<LockIdKey>(),
            Err(LockIdError::OutOfRange { index: 0, .. })
        ));
    }
}
