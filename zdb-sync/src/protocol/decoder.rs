//! Typed response decoding
//!
//! Every command has exactly one parser, registered in a [`DecoderTable`] when the
//! client is constructed. The table is never modified afterwards.

use super::command::CommandKind;
use crate::error::ProtocolError;
use crate::position::{NamespaceSnapshot, Position};
use redis::Value;
use std::collections::HashMap;

/// NSINFO field holding the current data segment id
pub const FIELD_SEGMENT: &str = "data_current_id";
/// NSINFO field holding the offset inside the current segment
pub const FIELD_OFFSET: &str = "data_current_offset";
/// NSINFO field holding the namespace's total data size
pub const FIELD_SIZE: &str = "data_size_bytes";

/// Single record returned by `DATA RAW`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub is_delete: bool,
    pub position: Position,
    /// Opaque marker forwarded with SET/DEL so the slave tags the entry like the master did
    pub marker: Vec<u8>,
    /// Present only for SET records
    pub value: Option<Vec<u8>>,
}

/// Decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Info(NamespaceSnapshot),
    Blob(Vec<u8>),
    Text(String),
    Record(Record),
}

pub type Decoder = fn(Value) -> Result<Reply, ProtocolError>;

/// Immutable mapping from command to its reply parser
#[derive(Debug, Clone)]
pub struct DecoderTable {
    decoders: HashMap<CommandKind, Decoder>,
}

impl DecoderTable {
    /// Table covering every command of the sync protocol
    pub fn standard() -> Self {
        let mut decoders: HashMap<CommandKind, Decoder> = HashMap::new();

        decoders.insert(CommandKind::NsInfo, decode_nsinfo);
        decoders.insert(CommandKind::NsSet, decode_ack);
        decoders.insert(CommandKind::NsJump, decode_ack);
        decoders.insert(CommandKind::DataExport, decode_blob);
        decoders.insert(CommandKind::DataImport, decode_ack);
        decoders.insert(CommandKind::DataRaw, decode_record);
        decoders.insert(CommandKind::Set, decode_blob);
        decoders.insert(CommandKind::Del, decode_ack);
        decoders.insert(CommandKind::AuthChallenge, decode_text);
        decoders.insert(CommandKind::AuthSecure, decode_ack);
        decoders.insert(CommandKind::Select, decode_ack);

        Self { decoders }
    }

    pub fn decode(&self, kind: CommandKind, value: Value) -> Result<Reply, ProtocolError> {
        let decoder = self
            .decoders
            .get(&kind)
            .ok_or_else(|| ProtocolError::unexpected(kind.name(), "no decoder registered"))?;

        decoder(value).map_err(|e| match e {
            ProtocolError::UnexpectedReply { reason, .. } => {
                ProtocolError::unexpected(kind.name(), reason)
            }
            other => other,
        })
    }
}

impl Default for DecoderTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn describe(value: &Value) -> String {
    let text = format!("{:?}", value);
    if text.chars().count() > 64 {
        format!("{}...", text.chars().take(64).collect::<String>())
    } else {
        text
    }
}

fn as_text(value: Value) -> Result<String, ProtocolError> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes)
            .map_err(|e| ProtocolError::unexpected("", format!("invalid utf-8: {}", e))),
        Value::SimpleString(text) => Ok(text),
        Value::VerbatimString { text, .. } => Ok(text),
        Value::Okay => Ok("OK".to_string()),
        other => Err(ProtocolError::unexpected(
            "",
            format!("expected string, got {}", describe(&other)),
        )),
    }
}

fn as_bytes(value: Value) -> Result<Vec<u8>, ProtocolError> {
    match value {
        Value::BulkString(bytes) => Ok(bytes),
        Value::SimpleString(text) => Ok(text.into_bytes()),
        Value::Int(n) => Ok(n.to_string().into_bytes()),
        other => Err(ProtocolError::unexpected(
            "",
            format!("expected bytes, got {}", describe(&other)),
        )),
    }
}

fn as_u64(value: Value, field: &str) -> Result<u64, ProtocolError> {
    match value {
        Value::Int(n) => u64::try_from(n)
            .map_err(|_| ProtocolError::unexpected("", format!("negative {}: {}", field, n))),
        other => {
            let text = as_text(other)?;
            text.trim().parse::<u64>().map_err(|e| {
                ProtocolError::unexpected("", format!("invalid {} '{}': {}", field, text, e))
            })
        }
    }
}

fn decode_ack(value: Value) -> Result<Reply, ProtocolError> {
    match value {
        Value::Okay => Ok(Reply::Ack),
        Value::SimpleString(ref text) if text.eq_ignore_ascii_case("OK") => Ok(Reply::Ack),
        other => Err(ProtocolError::unexpected(
            "",
            format!("expected OK, got {}", describe(&other)),
        )),
    }
}

fn decode_text(value: Value) -> Result<Reply, ProtocolError> {
    as_text(value).map(Reply::Text)
}

fn decode_blob(value: Value) -> Result<Reply, ProtocolError> {
    as_bytes(value).map(Reply::Blob)
}

/// Parse a `key: value` block as returned by NSINFO
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn required<'a>(info: &'a HashMap<String, String>, field: &str) -> Result<&'a str, ProtocolError> {
    info.get(field)
        .map(String::as_str)
        .ok_or_else(|| ProtocolError::unexpected("", format!("missing field {}", field)))
}

fn numeric<T>(info: &HashMap<String, String>, field: &str) -> Result<T, ProtocolError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = required(info, field)?;
    raw.parse::<T>()
        .map_err(|e| ProtocolError::unexpected("", format!("invalid {} '{}': {}", field, raw, e)))
}

fn decode_nsinfo(value: Value) -> Result<Reply, ProtocolError> {
    let info = parse_info(&as_text(value)?);

    let segment: u32 = numeric(&info, FIELD_SEGMENT)?;
    let offset: u64 = numeric(&info, FIELD_OFFSET)?;
    let size: u64 = numeric(&info, FIELD_SIZE)?;

    Ok(Reply::Info(NamespaceSnapshot::new(
        Position::new(segment, offset),
        size,
    )))
}

/// `[key, segment, offset, flag, marker, value]`, flag 0 is a SET
fn decode_record(value: Value) -> Result<Reply, ProtocolError> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(ProtocolError::unexpected(
                "",
                format!("expected array, got {}", describe(&other)),
            ));
        }
    };

    if items.len() < 5 {
        return Err(ProtocolError::unexpected(
            "",
            format!("expected at least 5 elements, got {}", items.len()),
        ));
    }

    let mut items = items.into_iter();
    let mut next = || items.next().unwrap_or(Value::Nil);

    let key = as_bytes(next())?;
    let segment = as_u64(next(), "segment")?;
    let segment = u32::try_from(segment)
        .map_err(|_| ProtocolError::unexpected("", format!("segment out of range: {}", segment)))?;
    let offset = as_u64(next(), "offset")?;
    let is_delete = as_u64(next(), "flag")? != 0;
    let marker = as_bytes(next())?;
    let value = match next() {
        Value::Nil => None,
        other => Some(as_bytes(other)?),
    };

    if !is_delete && value.is_none() {
        return Err(ProtocolError::unexpected("", "SET record without value"));
    }

    Ok(Reply::Record(Record {
        key,
        is_delete,
        position: Position::new(segment, offset),
        marker,
        value: if is_delete { None } else { value },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NSINFO: &str = "# namespace\nname: default\nentries: 12\npublic: yes\npassword: no\n\
                          data_size_bytes: 5242880\ndata_size_mb: 5.00\n\
                          data_current_id: 2\ndata_current_offset: 500\nmode: userkey\n";

    #[test]
    fn test_decode_nsinfo() {
        let table = DecoderTable::standard();
        let reply = table
            .decode(CommandKind::NsInfo, Value::BulkString(NSINFO.as_bytes().to_vec()))
            .unwrap();

        assert_eq!(
            reply,
            Reply::Info(NamespaceSnapshot::new(Position::new(2, 500), 5_242_880))
        );
    }

    #[test]
    fn test_decode_nsinfo_missing_field() {
        let table = DecoderTable::standard();
        let text = "name: default\ndata_current_id: 2\ndata_size_bytes: 10\n";
        let err = table
            .decode(CommandKind::NsInfo, Value::BulkString(text.as_bytes().to_vec()))
            .unwrap_err();

        match err {
            ProtocolError::UnexpectedReply { command, reason } => {
                assert_eq!(command, "NSINFO");
                assert!(reason.contains(FIELD_OFFSET));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_set_record() {
        let table = DecoderTable::standard();
        let raw = Value::Array(vec![
            Value::BulkString(b"user:1".to_vec()),
            Value::Int(2),
            Value::Int(100),
            Value::Int(0),
            Value::Int(1_700_000_000),
            Value::BulkString(b"hello".to_vec()),
        ]);

        let reply = table.decode(CommandKind::DataRaw, raw).unwrap();
        assert_eq!(
            reply,
            Reply::Record(Record {
                key: b"user:1".to_vec(),
                is_delete: false,
                position: Position::new(2, 100),
                marker: b"1700000000".to_vec(),
                value: Some(b"hello".to_vec()),
            })
        );
    }

    #[test]
    fn test_decode_delete_record_without_value() {
        let table = DecoderTable::standard();
        let raw = Value::Array(vec![
            Value::BulkString(b"user:1".to_vec()),
            Value::Int(0),
            Value::Int(64),
            Value::Int(1),
            Value::Int(42),
        ]);

        match table.decode(CommandKind::DataRaw, raw).unwrap() {
            Reply::Record(record) => {
                assert!(record.is_delete);
                assert_eq!(record.value, None);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_decode_record_rejects_short_array() {
        let table = DecoderTable::standard();
        let raw = Value::Array(vec![Value::BulkString(b"k".to_vec()), Value::Int(0)]);
        assert!(table.decode(CommandKind::DataRaw, raw).is_err());
    }

    #[test]
    fn test_decode_ack() {
        let table = DecoderTable::standard();
        assert_eq!(table.decode(CommandKind::NsJump, Value::Okay).unwrap(), Reply::Ack);
        assert_eq!(
            table
                .decode(CommandKind::Select, Value::SimpleString("OK".into()))
                .unwrap(),
            Reply::Ack
        );
        assert!(
            table
                .decode(CommandKind::Del, Value::SimpleString("QUEUED".into()))
                .is_err()
        );
    }

    #[test]
    fn test_decode_challenge() {
        let table = DecoderTable::standard();
        let reply = table
            .decode(
                CommandKind::AuthChallenge,
                Value::SimpleString("a1b2c3d4e5f60718".into()),
            )
            .unwrap();
        assert_eq!(reply, Reply::Text("a1b2c3d4e5f60718".into()));
    }

    #[test]
    fn test_every_command_has_a_decoder() {
        let table = DecoderTable::standard();
        for kind in CommandKind::ALL {
            assert!(table.decoders.contains_key(&kind), "{:?}", kind);
        }
    }

    #[test]
    fn test_parse_info_skips_comments() {
        let info = parse_info("# section\nkey: value: with colon\n\nother:1\n");
        assert_eq!(info.get("key").map(String::as_str), Some("value: with colon"));
        assert_eq!(info.get("other").map(String::as_str), Some("1"));
        assert_eq!(info.len(), 2);
    }
}
