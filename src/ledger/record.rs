//! Tagged, length-prefixed record codec for ledger files.
//!
//! A file starts with [`LEDGER_MAGIC`] and a big-endian `u16` version,
//! followed by records. Each record is `tag: u32, body_len: u32, body`, and
//! a body is a run of fields laid out the same way:
//! `field_tag: u32, field_len: u32, bytes`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::LedgerError;
use crate::constants::{LEDGER_MAGIC, LEDGER_VERSION};

pub const TAG_FILE_ENTRY: u32 = 0x01;
pub const TAG_BLOCK_ENTRY: u32 = 0x02;

pub const FIELD_FILENAME: u32 = 0x10;
pub const FIELD_LAST_MODIFIED: u32 = 0x11;
pub const FIELD_FILE_LENGTH: u32 = 0x12;
pub const FIELD_BLOCK_NUMBER: u32 = 0x20;
pub const FIELD_BLOCK_STATUS: u32 = 0x21;

const HEADER_LEN: usize = 6;
const PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    File {
        filename: String,
        last_modified: u32,
        length: u64,
    },
    Block { number: u32, status: u32 },
}

impl Record {
    fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        let tag = match self {
            Record::File {
                filename,
                last_modified,
                length,
            } => {
                put_field(&mut body, FIELD_FILENAME, filename.as_bytes());
                put_field(&mut body, FIELD_LAST_MODIFIED, &last_modified.to_be_bytes());
                put_field(&mut body, FIELD_FILE_LENGTH, &length.to_be_bytes());
                TAG_FILE_ENTRY
            }
            Record::Block { number, status } => {
                put_field(&mut body, FIELD_BLOCK_NUMBER, &number.to_be_bytes());
                put_field(&mut body, FIELD_BLOCK_STATUS, &status.to_be_bytes());
                TAG_BLOCK_ENTRY
            }
        };

        buf.put_u32(tag);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
    }
}

fn put_field(buf: &mut BytesMut, tag: u32, value: &[u8]) {
    buf.put_u32(tag);
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

/// Encodes a complete ledger file.
pub fn encode<'a, I>(records: I) -> Bytes
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut buf = BytesMut::with_capacity(64);
    buf.put_slice(LEDGER_MAGIC);
    buf.put_u16(LEDGER_VERSION);
    for record in records {
        record.encode(&mut buf);
    }
    buf.freeze()
}

/// Streams records out of a ledger file.
pub struct RecordReader<'a> {
    buf: &'a [u8],
}

impl<'a> RecordReader<'a> {
    /// Checks the header and positions the reader at the first record.
    pub fn new(data: &'a [u8]) -> Result<Self, LedgerError> {
        if data.len() < HEADER_LEN {
            return Err(corrupt("truncated header"));
        }
        let mut buf = data;
        if &buf[..4] != LEDGER_MAGIC {
            return Err(corrupt("bad magic"));
        }
        buf.advance(4);

        let version = buf.get_u16();
        if version != LEDGER_VERSION {
            return Err(corrupt(format!("unsupported version {version}")));
        }
        Ok(Self { buf })
    }

    /// Returns the next known record, skipping records with unknown tags.
    pub fn next_record(&mut self) -> Result<Option<Record>, LedgerError> {
        loop {
            let Some((tag, body)) = take_chunk(&mut self.buf)? else {
                return Ok(None);
            };
            match tag {
                TAG_FILE_ENTRY => return parse_file(body).map(Some),
                TAG_BLOCK_ENTRY => return parse_block(body).map(Some),
                other => tracing::trace!(tag = other, "skipping unknown ledger record"),
            }
        }
    }
}

/// Splits one `tag, len, bytes` chunk off the front of `buf`.
fn take_chunk<'a>(buf: &mut &'a [u8]) -> Result<Option<(u32, &'a [u8])>, LedgerError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() < PREFIX_LEN {
        return Err(corrupt("truncated record prefix"));
    }
    let tag = buf.get_u32();
    let len = buf.get_u32() as usize;
    if buf.len() < len {
        return Err(corrupt(format!("record {tag:#x} claims {len} bytes")));
    }
    let data: &'a [u8] = *buf;
    let (chunk, rest) = data.split_at(len);
    *buf = rest;
    Ok(Some((tag, chunk)))
}

fn parse_file(mut body: &[u8]) -> Result<Record, LedgerError> {
    let mut filename = None;
    let mut last_modified = None;
    let mut length = 0;

    while let Some((tag, value)) = take_chunk(&mut body)? {
        match tag {
            FIELD_FILENAME => {
                let name = std::str::from_utf8(value)
                    .map_err(|_| corrupt("filename is not utf-8"))?;
                filename = Some(name.to_string());
            }
            FIELD_LAST_MODIFIED => last_modified = Some(read_u32(value)?),
            FIELD_FILE_LENGTH => length = read_u64(value)?,
            _ => {}
        }
    }

    Ok(Record::File {
        filename: filename.ok_or_else(|| corrupt("file entry without filename"))?,
        last_modified: last_modified.ok_or_else(|| corrupt("file entry without date"))?,
        length,
    })
}

fn parse_block(mut body: &[u8]) -> Result<Record, LedgerError> {
    let mut number = None;
    let mut status = None;

    while let Some((tag, value)) = take_chunk(&mut body)? {
        match tag {
            FIELD_BLOCK_NUMBER => number = Some(read_u32(value)?),
            FIELD_BLOCK_STATUS => status = Some(read_u32(value)?),
            _ => {}
        }
    }

    Ok(Record::Block {
        number: number.ok_or_else(|| corrupt("block entry without number"))?,
        status: status.ok_or_else(|| corrupt("block entry without status"))?,
    })
}

fn read_u32(mut value: &[u8]) -> Result<u32, LedgerError> {
    if value.len() != 4 {
        return Err(corrupt(format!("expected 4-byte integer, got {}", value.len())));
    }
    Ok(value.get_u32())
}

fn read_u64(mut value: &[u8]) -> Result<u64, LedgerError> {
    if value.len() != 8 {
        return Err(corrupt(format!("expected 8-byte integer, got {}", value.len())));
    }
    Ok(value.get_u64())
}

fn corrupt(reason: impl Into<String>) -> LedgerError {
    LedgerError::Corruption(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(data: &[u8]) -> Result<Vec<Record>, LedgerError> {
        let mut reader = RecordReader::new(data)?;
        let mut records = Vec::new();
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn test_layout() {
        let data = encode(&[Record::Block { number: 1, status: 1 }]);

        assert_eq!(&data[..4], b"RBLG");
        assert_eq!(&data[4..6], &[0, 1]);
        // tag, body_len, then two 12-byte fields
        assert_eq!(&data[6..14], &[0, 0, 0, 2, 0, 0, 0, 24]);
        assert_eq!(data.len(), 6 + 8 + 24);
    }

    #[test]
    fn test_skips_unknown_records() {
        let mut buf = BytesMut::from(&encode(&[])[..]);
        buf.put_u32(0x7f);
        buf.put_u32(3);
        buf.put_slice(b"xyz");
        Record::Block { number: 4, status: 1 }.encode(&mut buf);

        let records = read_all(&buf).unwrap();
        assert_eq!(records, vec![Record::Block { number: 4, status: 1 }]);
    }

    #[test]
    fn test_rejects_truncation() {
        let data = encode(&[Record::File {
            filename: "a.bin".into(),
            last_modified: 7,
            length: 120,
        }]);

        for cut in [3, data.len() - 1, data.len() - 5] {
            assert!(matches!(
                read_all(&data[..cut]),
                Err(LedgerError::Corruption(_))
            ));
        }
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(
            read_all(b"NOPE\x00\x01"),
            Err(LedgerError::Corruption(_))
        ));
        assert!(matches!(
            read_all(b"RBLG\x00\x09"),
            Err(LedgerError::Corruption(_))
        ));
    }

    #[test]
    fn test_file_length_is_optional() {
        let mut buf = BytesMut::from(&encode(&[])[..]);
        let mut body = BytesMut::new();
        put_field(&mut body, FIELD_FILENAME, b"a.bin");
        put_field(&mut body, FIELD_LAST_MODIFIED, &9u32.to_be_bytes());
        buf.put_u32(TAG_FILE_ENTRY);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);

        assert_eq!(
            read_all(&buf).unwrap(),
            vec![Record::File {
                filename: "a.bin".into(),
                last_modified: 9,
                length: 0,
            }]
        );
    }

    #[test]
    fn test_rejects_missing_field() {
        let mut buf = BytesMut::from(&encode(&[])[..]);
        let mut body = BytesMut::new();
        put_field(&mut body, FIELD_BLOCK_NUMBER, &1u32.to_be_bytes());
        buf.put_u32(TAG_BLOCK_ENTRY);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);

        assert!(matches!(read_all(&buf), Err(LedgerError::Corruption(_))));
    }
}
