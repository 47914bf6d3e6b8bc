//! Log records and their CSV row encoding.
//!
//! Store layout:
//!
//! ```text
//! time,topic,data\r\n
//! 2024-05-01T10:00:00.123456Z,/devices/dev-1/config,hello\r\n
//! 2024-05-01T10:00:01.5Z,"a,b","x""y"\r\n
//! ```
//!
//! Fields are written as raw bytes. A field is quoted when it contains the
//! delimiter, a double quote, CR or LF; embedded quotes are doubled. Rows end
//! with CRLF, the line ending spreadsheet tools expect. The decoder accepts
//! CRLF and bare LF, and quoted fields may span lines.

use std::{fs, path::Path};

use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Column names of every store, in order.
pub const HEADER: [&str; 3] = ["time", "topic", "data"];

const DELIMITER: u8 = b',';
const QUOTE: u8 = b'"';
const TERMINATOR: &[u8] = b"\r\n";

#[derive(Debug, Error)]
pub enum RecordError {
    /// Every row needs all three fields; a message without a topic is refused.
    #[error("Message topic is empty")]
    EmptyTopic,

    #[error("Timestamp error: {0}")]
    Timestamp(String),

    #[error("Row {row}: unterminated quoted field")]
    UnterminatedQuote { row: usize },

    #[error("Row {row}: unexpected byte after closing quote")]
    TrailingAfterQuote { row: usize },

    #[error("Row {row}: expected 3 fields, found {found}")]
    FieldCount { row: usize, found: usize },

    #[error("Row {row}: topic is not valid UTF-8")]
    TopicEncoding { row: usize },

    #[error("Store header mismatch: expected time,topic,data, found {0}")]
    HeaderMismatch(String),

    #[error("Store is empty")]
    MissingHeader,

    #[error("IO error reading store: {0}")]
    Io(#[from] std::io::Error),
}

/// One received message as stored: arrival time, topic, payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    timestamp: OffsetDateTime,
    topic: String,
    payload: Vec<u8>,
}

impl LogRecord {
    /// Stamps a message with the current UTC time.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<Self, RecordError> {
        Self::with_timestamp(OffsetDateTime::now_utc(), topic, payload)
    }

    pub fn with_timestamp(
        timestamp: OffsetDateTime,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, RecordError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(RecordError::EmptyTopic);
        }
        Ok(Self {
            timestamp,
            topic,
            payload: payload.into(),
        })
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// RFC 3339 UTC timestamp with sub-second digits, e.g. `2024-05-01T10:00:00.5Z`.
    pub fn formatted_timestamp(&self) -> Result<String, RecordError> {
        self.timestamp
            .format(&Rfc3339)
            .map_err(|e| RecordError::Timestamp(e.to_string()))
    }

    /// Encodes the record as one terminated CSV row.
    pub fn to_row(&self) -> Result<Vec<u8>, RecordError> {
        let timestamp = self.formatted_timestamp()?;
        let mut row = Vec::with_capacity(timestamp.len() + self.topic.len() + self.payload.len() + 8);
        encode_row(
            &[timestamp.as_bytes(), self.topic.as_bytes(), &self.payload],
            &mut row,
        );
        Ok(row)
    }

    fn from_fields(row: usize, mut fields: Vec<Vec<u8>>) -> Result<Self, RecordError> {
        if fields.len() != HEADER.len() {
            return Err(RecordError::FieldCount {
                row,
                found: fields.len(),
            });
        }
        let payload = fields.pop().unwrap_or_default();
        let topic = String::from_utf8(fields.pop().unwrap_or_default())
            .map_err(|_| RecordError::TopicEncoding { row })?;
        let time_field = fields.pop().unwrap_or_default();
        let timestamp = std::str::from_utf8(&time_field)
            .map_err(|e| RecordError::Timestamp(format!("row {row}: {e}")))
            .and_then(|s| {
                OffsetDateTime::parse(s, &Rfc3339)
                    .map_err(|e| RecordError::Timestamp(format!("row {row}: {e}")))
            })?;

        Self::with_timestamp(timestamp, topic, payload)
    }
}

/// Header row, terminated.
pub fn header_row() -> Vec<u8> {
    let mut row = Vec::new();
    let fields: Vec<&[u8]> = HEADER.iter().map(|f| f.as_bytes()).collect();
    encode_row(&fields, &mut row);
    row
}

fn needs_quoting(field: &[u8]) -> bool {
    field
        .iter()
        .any(|&b| b == DELIMITER || b == QUOTE || b == b'\r' || b == b'\n')
}

/// Appends `fields` to `out` as a single CSV row, including the terminator.
pub fn encode_row(fields: &[&[u8]], out: &mut Vec<u8>) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        if needs_quoting(field) {
            out.push(QUOTE);
            for &b in field.iter() {
                if b == QUOTE {
                    out.push(QUOTE);
                }
                out.push(b);
            }
            out.push(QUOTE);
        } else {
            out.extend_from_slice(field);
        }
    }
    out.extend_from_slice(TERMINATOR);
}

/// Splits CSV content into rows of raw field bytes. Blank lines are skipped.
pub fn decode_rows(data: &[u8]) -> Result<Vec<Vec<Vec<u8>>>, RecordError> {
    let mut rows = Vec::new();
    let mut fields: Vec<Vec<u8>> = Vec::new();
    let mut field = Vec::new();
    let mut row_started = false;
    let mut in_quotes = false;
    let mut after_quote = false;

    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        i += 1;

        if in_quotes {
            if b == QUOTE {
                if data.get(i) == Some(&QUOTE) {
                    field.push(QUOTE);
                    i += 1;
                } else {
                    in_quotes = false;
                    after_quote = true;
                }
            } else {
                field.push(b);
            }
            continue;
        }

        match b {
            DELIMITER => {
                fields.push(std::mem::take(&mut field));
                row_started = true;
                after_quote = false;
            }
            b'\r' if data.get(i) == Some(&b'\n') => {}
            b'\n' => {
                if row_started || !field.is_empty() {
                    fields.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut fields));
                }
                row_started = false;
                after_quote = false;
            }
            QUOTE if field.is_empty() && !after_quote => {
                in_quotes = true;
                row_started = true;
            }
            _ if after_quote => {
                return Err(RecordError::TrailingAfterQuote { row: rows.len() + 1 });
            }
            _ => {
                field.push(b);
                row_started = true;
            }
        }
    }

    if in_quotes {
        return Err(RecordError::UnterminatedQuote { row: rows.len() + 1 });
    }
    if row_started || !field.is_empty() {
        fields.push(field);
        rows.push(fields);
    }
    Ok(rows)
}

/// Decoded store: header names plus data rows in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreContents {
    pub header: Vec<String>,
    pub records: Vec<LogRecord>,
}

/// Parses a whole store, checking the header.
pub fn decode_store(data: &[u8]) -> Result<StoreContents, RecordError> {
    let mut rows = decode_rows(data)?.into_iter();
    let header: Vec<String> = rows
        .next()
        .ok_or(RecordError::MissingHeader)?
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f).into_owned())
        .collect();
    if header != HEADER {
        return Err(RecordError::HeaderMismatch(header.join(",")));
    }

    let records = rows
        .enumerate()
        .map(|(i, fields)| LogRecord::from_fields(i + 2, fields))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StoreContents { header, records })
}

/// Reads and decodes the store at `path`.
pub fn read_store(path: impl AsRef<Path>) -> Result<StoreContents, RecordError> {
    decode_store(&fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn row(fields: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_row(fields, &mut out);
        out
    }

    #[test]
    fn test_header_row() {
        assert_eq!(header_row(), b"time,topic,data\r\n");
    }

    #[test]
    fn test_plain_fields_are_not_quoted() {
        assert_eq!(row(&[b"a", b"b", b"c"]), b"a,b,c\r\n");
    }

    #[test]
    fn test_special_characters_are_quoted() {
        assert_eq!(row(&[b"t", b"a,b", b"x\"y"]), b"t,\"a,b\",\"x\"\"y\"\r\n");
        assert_eq!(row(&[b"t", b"line1\nline2", b"cr\r"]), b"t,\"line1\nline2\",\"cr\r\"\r\n");
    }

    #[test]
    fn test_empty_payload_is_an_empty_field() {
        assert_eq!(row(&[b"t", b"topic", b""]), b"t,topic,\r\n");
        let rows = decode_rows(b"t,topic,\r\n").unwrap();
        assert_eq!(rows, vec![vec![b"t".to_vec(), b"topic".to_vec(), Vec::new()]]);
    }

    #[test]
    fn test_decode_handles_quotes_and_newlines() {
        let data = b"a,\"b,\"\"c\"\"\",\"multi\r\nline\"\r\nd,e,f\n";
        let rows = decode_rows(data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], b"b,\"c\"".to_vec());
        assert_eq!(rows[0][2], b"multi\r\nline".to_vec());
        assert_eq!(rows[1], vec![b"d".to_vec(), b"e".to_vec(), b"f".to_vec()]);
    }

    #[test]
    fn test_decode_without_trailing_newline() {
        let rows = decode_rows(b"a,b,c").unwrap();
        assert_eq!(rows, vec![vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]]);
    }

    #[test]
    fn test_decode_rejects_unterminated_quote() {
        assert!(matches!(
            decode_rows(b"a,\"b,c\r\n"),
            Err(RecordError::UnterminatedQuote { row: 1 })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage_after_quote() {
        assert!(matches!(
            decode_rows(b"h,h,h\r\na,\"b\"x,c\r\n"),
            Err(RecordError::TrailingAfterQuote { row: 2 })
        ));
    }

    #[test]
    fn test_record_row_and_back() {
        let ts = datetime!(2024-05-01 10:00:00.25 UTC);
        let record = LogRecord::with_timestamp(ts, "a,b", b"x\"y\x00\xff".to_vec()).unwrap();

        let row = record.to_row().unwrap();
        assert!(row.starts_with(b"2024-05-01T10:00:00.25Z,\"a,b\",\"x\"\"y"));

        let mut data = header_row();
        data.extend_from_slice(&row);
        let store = decode_store(&data).unwrap();
        assert_eq!(store.header, HEADER);
        assert_eq!(store.records, vec![record]);
    }

    #[test]
    fn test_empty_topic_rejected() {
        assert!(matches!(LogRecord::new("", b"x".to_vec()), Err(RecordError::EmptyTopic)));
    }

    #[test]
    fn test_timestamp_is_utc_with_designator() {
        let record = LogRecord::new("t", Vec::new()).unwrap();
        let formatted = record.formatted_timestamp().unwrap();
        assert!(formatted.ends_with('Z'), "{formatted}");
        assert!(formatted.contains('T'));
    }

    #[test]
    fn test_store_header_checked() {
        assert!(matches!(decode_store(b""), Err(RecordError::MissingHeader)));
        assert!(matches!(
            decode_store(b"when,what\r\n"),
            Err(RecordError::HeaderMismatch(h)) if h == "when,what"
        ));
    }

    #[test]
    fn test_store_row_field_count() {
        let data = b"time,topic,data\r\n2024-05-01T10:00:00Z,t\r\n";
        assert!(matches!(
            decode_store(data),
            Err(RecordError::FieldCount { row: 2, found: 2 })
        ));
    }
}
