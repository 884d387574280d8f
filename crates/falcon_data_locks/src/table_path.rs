//! Decomposition of a table path into the object columns of a lock row.

use serde::Serialize;

const PARTITION_SEP: &str = "#P#";
const SUBPARTITION_SEP: &str = "#SP#";

/// Schema, table, partition and subpartition of a locked table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableObject {
    pub schema: String,
    pub table: String,
    pub partition: Option<String>,
    pub subpartition: Option<String>,
}

impl TableObject {
    /// Split `schema/table[#P#partition[#SP#subpartition]]`. A path without
    /// a schema separator yields an empty schema. Each part is decoded from
    /// the on-disk filename encoding.
    pub fn parse(path: &str) -> Self {
        let (schema, rest) = path.split_once('/').unwrap_or(("", path));
        let (table, partition) = match split_marker(rest, PARTITION_SEP) {
            Some((table, part)) => (table, Some(part)),
            None => (rest, None),
        };
        let (partition, subpartition) = match partition {
            Some(part) => match split_marker(part, SUBPARTITION_SEP) {
                Some((p, sp)) => (Some(p), Some(sp)),
                None => (Some(part), None),
            },
            None => (None, None),
        };

        Self {
            schema: decode_filename(schema),
            table: decode_filename(table),
            partition: partition.map(decode_filename),
            subpartition: subpartition.map(decode_filename),
        }
    }
}

/// Case-insensitive split on the first `marker`.
fn split_marker<'a>(s: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let upper = s.to_ascii_uppercase();
    let pos = upper.find(marker)?;
    Some((&s[..pos], &s[pos + marker.len()..]))
}

/// Decode `@XXXX` escapes (four hex digits naming a code point). Anything
/// that does not form a valid escape is kept verbatim.
fn decode_filename(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('@') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let decoded = tail
            .get(..4)
            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[4..];
            }
            None => {
                out.push('@');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_table() {
        let obj = TableObject::parse("shop/orders");
        assert_eq!(obj.schema, "shop");
        assert_eq!(obj.table, "orders");
        assert_eq!(obj.partition, None);
        assert_eq!(obj.subpartition, None);
    }

    #[test]
    fn test_partitions() {
        let obj = TableObject::parse("shop/items#P#p0");
        assert_eq!(obj.table, "items");
        assert_eq!(obj.partition.as_deref(), Some("p0"));
        assert_eq!(obj.subpartition, None);

        let obj = TableObject::parse("shop/items#p#p1#sp#p1sp0");
        assert_eq!(obj.partition.as_deref(), Some("p1"));
        assert_eq!(obj.subpartition.as_deref(), Some("p1sp0"));
    }

    #[test]
    fn test_escapes() {
        let obj = TableObject::parse("my@002ddb/t@0020x");
        assert_eq!(obj.schema, "my-db");
        assert_eq!(obj.table, "t x");
        assert_eq!(decode_filename("a@zz"), "a@zz");
        assert_eq!(decode_filename("tail@00"), "tail@00");
    }

    #[test]
    fn test_no_schema() {
        let obj = TableObject::parse("orphan");
        assert_eq!(obj.schema, "");
        assert_eq!(obj.table, "orphan");
    }
}
