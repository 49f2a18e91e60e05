//! Canonical row encoding
//!
//! Range hashes are computed over the concatenation of these encodings, so
//! both endpoints must produce byte-identical output for identical rows.
//! Layout: u32 LE field count, then per field a tag byte (0 = null, 1 = text)
//! and, for text, a u64 LE byte length followed by the UTF-8 bytes.

use crate::types::{Row, Value};

const TAG_NULL: u8 = 0;
const TAG_TEXT: u8 = 1;

/// Append the canonical encoding of `row` to `buf`
pub fn encode_row_into(row: &Row, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(row.len() as u32).to_le_bytes());
    for value in row.values() {
        match value {
            Value::Null => buf.push(TAG_NULL),
            Value::Text(s) => {
                buf.push(TAG_TEXT);
                buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }
}

/// Canonical encoding of a single row
pub fn encode_row(row: &Row) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(row));
    encode_row_into(row, &mut buf);
    buf
}

fn encoded_len(row: &Row) -> usize {
    4 + row
        .values()
        .iter()
        .map(|v| match v {
            Value::Null => 1,
            Value::Text(s) => 9 + s.len(),
        })
        .sum::<usize>()
}
