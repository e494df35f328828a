//! Serialization of cached values.
//!
//! Three formats live here:
//!
//! - **Values** map onto `serde_json::Value` with one explicit arm per
//!   [`CacheValue`] variant. Integers and floats stay distinct. Tables become
//!   a tagged object in split orientation:
//!   `{"__memora_table__": 1, "orient": "split", "columns": [..], "dtypes": [..], "data": [[row]..]}`.
//! - **Snapshots** (disk backend) are gzip-compressed JSON:
//!   `{"version": 1, "key_list": [..], "cache": {key: {"value": .., "cached_at": rfc3339}}}`.
//!   A bad entry is skipped and reported; it never fails the whole snapshot.
//! - **Entry bytes** (remote backend): `[cached_at millis: i64 LE][JSON value]`.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use memora_core::{
    CacheEntry, CacheError, CacheKey, CacheValue, Column, ColumnData, DType, MemoraError, Table,
};
use serde_json::{json, Map, Number, Value};

/// Reserved object key marking an encoded table.
pub const TABLE_MARKER: &str = "__memora_table__";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u64 = 1;

/// Error type for codec operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// NaN or infinity cannot be represented in JSON.
    #[error("Non-finite float at {path}")]
    NonFiniteFloat { path: String },

    /// A mapping used the key reserved for tables.
    #[error("Mapping uses reserved key __memora_table__")]
    ReservedKey,

    /// Encoded table is malformed.
    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u64),

    /// Malformed JSON or envelope.
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// Compression stream error.
    #[error("Compression error: {0}")]
    Compression(String),
}

impl CodecError {
    /// Attach the cache key this error belongs to.
    pub fn for_key(self, key: &CacheKey) -> MemoraError {
        MemoraError::serialization(key.as_str(), self)
    }
}

/// Convert CodecError to MemoraError for snapshot-level failures.
impl From<CodecError> for MemoraError {
    fn from(e: CodecError) -> Self {
        CacheError::Serialization {
            key: "<snapshot>".to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}

// ============================================================================
// VALUES
// ============================================================================

/// Encode a value into its JSON representation.
pub fn encode_value(value: &CacheValue) -> Result<Value, CodecError> {
    encode_at(value, "$")
}

fn encode_at(value: &CacheValue, path: &str) -> Result<Value, CodecError> {
    match value {
        CacheValue::Null => Ok(Value::Null),
        CacheValue::Bool(b) => Ok(Value::Bool(*b)),
        CacheValue::Int(i) => Ok(Value::Number((*i).into())),
        CacheValue::Float(f) => finite(*f, path).map(Value::Number),
        CacheValue::Text(s) => Ok(Value::String(s.clone())),
        CacheValue::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| encode_at(item, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        CacheValue::Mapping(map) => {
            if map.contains_key(TABLE_MARKER) {
                return Err(CodecError::ReservedKey);
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), encode_at(v, &format!("{}.{}", path, k))?);
            }
            Ok(Value::Object(out))
        }
        CacheValue::Table(table) => encode_table(table, path),
    }
}

fn finite(f: f64, path: &str) -> Result<Number, CodecError> {
    Number::from_f64(f).ok_or_else(|| CodecError::NonFiniteFloat {
        path: path.to_string(),
    })
}

fn encode_table(table: &Table, path: &str) -> Result<Value, CodecError> {
    let columns: Vec<&str> = table.column_names();
    let dtypes: Vec<&str> = table.columns().iter().map(|c| c.dtype().as_str()).collect();

    let mut rows: Vec<Vec<Value>> = (0..table.num_rows())
        .map(|_| Vec::with_capacity(table.num_columns()))
        .collect();

    for column in table.columns() {
        let cell_path = format!("{}.{}", path, column.name);
        match &column.data {
            ColumnData::Int(cells) => {
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row.push(cell.map_or(Value::Null, |i| Value::Number(i.into())));
                }
            }
            ColumnData::Float(cells) => {
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row.push(match cell {
                        Some(f) => Value::Number(finite(*f, &cell_path)?),
                        None => Value::Null,
                    });
                }
            }
            ColumnData::Text(cells) => {
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row.push(cell.as_ref().map_or(Value::Null, |s| Value::String(s.clone())));
                }
            }
            ColumnData::Bool(cells) => {
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row.push(cell.map_or(Value::Null, Value::Bool));
                }
            }
            ColumnData::Timestamp(cells) => {
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row.push(match cell {
                        Some(t) => Value::String(format_timestamp(*t)?),
                        None => Value::Null,
                    });
                }
            }
        }
    }

    Ok(json!({
        TABLE_MARKER: 1,
        "orient": "split",
        "columns": columns,
        "dtypes": dtypes,
        "data": rows,
    }))
}

/// Decode a value from its JSON representation.
pub fn decode_value(value: &Value) -> Result<CacheValue, CodecError> {
    match value {
        Value::Null => Ok(CacheValue::Null),
        Value::Bool(b) => Ok(CacheValue::Bool(*b)),
        Value::Number(n) => Ok(match n.as_i64() {
            Some(i) => CacheValue::Int(i),
            None => CacheValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        }),
        Value::String(s) => Ok(CacheValue::Text(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(decode_value)
            .collect::<Result<Vec<_>, _>>()
            .map(CacheValue::List),
        Value::Object(map) if map.contains_key(TABLE_MARKER) => {
            decode_table(map).map(CacheValue::Table)
        }
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| decode_value(v).map(|v| (k.clone(), v)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(CacheValue::Mapping),
    }
}

fn decode_table(map: &Map<String, Value>) -> Result<Table, CodecError> {
    let bad = |reason: &str| CodecError::InvalidTable(reason.to_string());

    let strings = |field: &str| -> Result<Vec<String>, CodecError> {
        map.get(field)
            .and_then(Value::as_array)
            .ok_or_else(|| bad(&format!("missing {}", field)))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| bad(&format!("non-string entry in {}", field)))
            })
            .collect()
    };

    let names = strings("columns")?;
    let dtypes = strings("dtypes")?
        .iter()
        .map(|d| d.parse::<DType>().map_err(CodecError::InvalidTable))
        .collect::<Result<Vec<_>, _>>()?;
    if names.len() != dtypes.len() {
        return Err(bad("columns and dtypes differ in length"));
    }

    let rows = map
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| bad("missing data"))?;

    let mut data: Vec<ColumnData> = dtypes.iter().map(|d| ColumnData::empty(*d)).collect();
    for row in rows {
        let cells = row.as_array().ok_or_else(|| bad("row is not an array"))?;
        if cells.len() != names.len() {
            return Err(bad("row width does not match columns"));
        }
        for (column, cell) in data.iter_mut().zip(cells) {
            push_cell(column, cell)?;
        }
    }

    let columns = names
        .into_iter()
        .zip(data)
        .map(|(name, data)| Column::new(name, data))
        .collect();
    Table::new(columns).map_err(|e| CodecError::InvalidTable(e.to_string()))
}

fn push_cell(column: &mut ColumnData, cell: &Value) -> Result<(), CodecError> {
    let mismatch = || CodecError::InvalidTable(format!("cell {} does not fit column", cell));
    let null = cell.is_null();
    match column {
        ColumnData::Int(v) => v.push(if null { None } else { Some(cell.as_i64().ok_or_else(mismatch)?) }),
        ColumnData::Float(v) => v.push(if null { None } else { Some(cell.as_f64().ok_or_else(mismatch)?) }),
        ColumnData::Text(v) => v.push(if null {
            None
        } else {
            Some(cell.as_str().ok_or_else(mismatch)?.to_string())
        }),
        ColumnData::Bool(v) => v.push(if null { None } else { Some(cell.as_bool().ok_or_else(mismatch)?) }),
        ColumnData::Timestamp(v) => v.push(if null {
            None
        } else {
            Some(parse_timestamp(cell.as_str().ok_or_else(mismatch)?)?)
        }),
    }
    Ok(())
}

/// RFC 3339 has no room for years outside 0000..=9999, so those are refused
/// here rather than written in a form the decoder cannot read back.
fn format_timestamp(t: DateTime<Utc>) -> Result<String, CodecError> {
    if !(0..=9999).contains(&t.year()) {
        return Err(CodecError::InvalidTimestamp(t.to_string()));
    }
    Ok(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CodecError::InvalidTimestamp(raw.to_string()))
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Result of [`encode_snapshot`].
#[derive(Debug)]
pub struct EncodedSnapshot {
    /// Compressed snapshot bytes.
    pub bytes: Vec<u8>,
    /// Number of entries written.
    pub saved: usize,
    /// Entries that could not be encoded and were left out.
    pub failed: Vec<(CacheKey, CodecError)>,
}

/// Result of [`decode_snapshot`].
#[derive(Debug, Default)]
pub struct DecodedSnapshot {
    pub entries: HashMap<CacheKey, CacheEntry>,
    /// Persisted recency order, oldest first.
    pub key_list: Vec<CacheKey>,
    /// Entries that could not be decoded and were skipped.
    pub skipped: Vec<(String, CodecError)>,
}

/// Encode `(key, entry)` pairs (in recency order) into a gzip snapshot.
pub fn encode_snapshot(entries: &[(CacheKey, CacheEntry)]) -> Result<EncodedSnapshot, CodecError> {
    let mut key_list = Vec::with_capacity(entries.len());
    let mut cache = Map::with_capacity(entries.len());
    let mut failed = Vec::new();

    for (key, entry) in entries {
        let record = encode_value(entry.value()).and_then(|value| {
            Ok(json!({
                "value": value,
                "cached_at": format_timestamp(entry.cached_at())?,
            }))
        });
        match record {
            Ok(record) => {
                key_list.push(Value::String(key.as_str().to_string()));
                cache.insert(key.as_str().to_string(), record);
            }
            Err(e) => failed.push((key.clone(), e)),
        }
    }

    let saved = key_list.len();
    let envelope = json!({
        "version": SNAPSHOT_VERSION,
        "key_list": key_list,
        "cache": cache,
    });

    let json = serde_json::to_vec(&envelope).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4 + 64), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    let bytes = encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))?;

    Ok(EncodedSnapshot {
        bytes,
        saved,
        failed,
    })
}

/// Decode a gzip snapshot. Fails only when the envelope itself is unusable.
pub fn decode_snapshot(bytes: &[u8]) -> Result<DecodedSnapshot, CodecError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| CodecError::Compression(e.to_string()))?;

    let envelope: Value =
        serde_json::from_slice(&json).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let envelope = envelope
        .as_object()
        .ok_or_else(|| CodecError::Malformed("snapshot is not an object".to_string()))?;

    let version = envelope
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(SNAPSHOT_VERSION);
    if version != SNAPSHOT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let cache = envelope
        .get("cache")
        .and_then(Value::as_object)
        .ok_or_else(|| CodecError::Malformed("missing cache map".to_string()))?;

    let key_list = envelope
        .get("key_list")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(Value::as_str)
                .map(CacheKey::new)
                .collect()
        })
        .unwrap_or_default();

    let mut snapshot = DecodedSnapshot {
        key_list,
        ..DecodedSnapshot::default()
    };

    for (key, record) in cache {
        match decode_record(record) {
            Ok(entry) => {
                snapshot.entries.insert(CacheKey::new(key.clone()), entry);
            }
            Err(e) => snapshot.skipped.push((key.clone(), e)),
        }
    }

    Ok(snapshot)
}

fn decode_record(record: &Value) -> Result<CacheEntry, CodecError> {
    let value = record
        .get("value")
        .ok_or_else(|| CodecError::Malformed("entry without value".to_string()))?;
    let cached_at = record
        .get("cached_at")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::Malformed("entry without cached_at".to_string()))?;
    Ok(CacheEntry::with_timestamp(
        decode_value(value)?,
        parse_timestamp(cached_at)?,
    ))
}

// ============================================================================
// REMOTE ENTRY BYTES
// ============================================================================

/// Encode an entry as `[cached_at millis: 8 bytes LE][json value]`.
pub fn encode_entry_bytes(entry: &CacheEntry) -> Result<Vec<u8>, CodecError> {
    let timestamp_bytes = entry.cached_at().timestamp_millis().to_le_bytes();
    let value = encode_value(entry.value())?;
    let value_bytes = serde_json::to_vec(&value).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let mut full_bytes = Vec::with_capacity(8 + value_bytes.len());
    full_bytes.extend_from_slice(&timestamp_bytes);
    full_bytes.extend_from_slice(&value_bytes);
    Ok(full_bytes)
}

/// Read only the timestamp header of entry bytes.
pub fn decode_entry_timestamp(bytes: &[u8]) -> Result<DateTime<Utc>, CodecError> {
    let timestamp_bytes: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| CodecError::Malformed("entry shorter than its timestamp".to_string()))?;
    let timestamp_millis = i64::from_le_bytes(timestamp_bytes);
    DateTime::from_timestamp_millis(timestamp_millis)
        .ok_or_else(|| CodecError::InvalidTimestamp(timestamp_millis.to_string()))
}

/// Decode bytes written by [`encode_entry_bytes`].
pub fn decode_entry_bytes(bytes: &[u8]) -> Result<CacheEntry, CodecError> {
    let cached_at = decode_entry_timestamp(bytes)?;
    let value: Value =
        serde_json::from_slice(&bytes[8..]).map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(CacheEntry::with_timestamp(decode_value(&value)?, cached_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_table() -> Table {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Table::new(vec![
            Column::text("committer", vec![Some("ada"), None, Some("grace|hopper")]),
            Column::int("lines", vec![Some(10), Some(-3), None]),
            Column::float("ratio", vec![Some(0.25), None, Some(1.0)]),
            Column::bool("merge", vec![Some(true), Some(false), None]),
            Column::timestamp("date", vec![Some(t0), None, Some(t0)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_table_split_layout() {
        let encoded = encode_value(&CacheValue::Table(sample_table())).unwrap();
        assert_eq!(encoded[TABLE_MARKER], json!(1));
        assert_eq!(encoded["orient"], json!("split"));
        assert_eq!(
            encoded["dtypes"],
            json!(["string", "int64", "float64", "bool", "datetime"])
        );
        assert_eq!(encoded["data"][0][0], json!("ada"));
        assert_eq!(encoded["data"][1][0], Value::Null);
        assert_eq!(encoded["data"][0][4], json!("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn test_table_preserves_shape_types_and_nulls() {
        let table = sample_table();
        let decoded = decode_value(&encode_value(&CacheValue::Table(table.clone())).unwrap()).unwrap();
        assert_eq!(decoded, CacheValue::Table(table));
    }

    #[test]
    fn test_empty_table() {
        let table = Table::new(vec![Column::new("file", ColumnData::empty(DType::Text))]).unwrap();
        let decoded = decode_value(&encode_value(&table.clone().into()).unwrap()).unwrap();
        assert_eq!(decoded.as_table().map(Table::num_columns), Some(1));
        assert_eq!(decoded, CacheValue::Table(table));
    }

    #[test]
    fn test_ints_and_floats_stay_distinct() {
        let value = CacheValue::List(vec![CacheValue::Int(1), CacheValue::Float(1.0)]);
        assert_eq!(decode_value(&encode_value(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_nested_mapping() {
        let mut inner = BTreeMap::new();
        inner.insert("count".to_string(), CacheValue::Int(3));
        inner.insert("table".to_string(), CacheValue::Table(sample_table()));
        let value = CacheValue::Mapping(inner);
        assert_eq!(decode_value(&encode_value(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_non_finite_float_rejected() {
        let err = encode_value(&CacheValue::List(vec![CacheValue::Float(f64::NAN)])).unwrap_err();
        assert_eq!(err, CodecError::NonFiniteFloat { path: "$[0]".to_string() });

        let table = Table::new(vec![Column::float("x", vec![Some(f64::INFINITY)])]).unwrap();
        assert!(matches!(
            encode_value(&table.into()),
            Err(CodecError::NonFiniteFloat { .. })
        ));
    }

    #[test]
    fn test_reserved_key_rejected() {
        let mut map = BTreeMap::new();
        map.insert(TABLE_MARKER.to_string(), CacheValue::Int(1));
        assert_eq!(encode_value(&CacheValue::Mapping(map)), Err(CodecError::ReservedKey));
    }

    #[test]
    fn test_snapshot_skips_bad_entries() {
        let now = Utc::now();
        let entries = vec![
            (CacheKey::new("good|/r"), CacheEntry::with_timestamp(CacheValue::Int(1), now)),
            (CacheKey::new("bad|/r"), CacheEntry::with_timestamp(CacheValue::Float(f64::NAN), now)),
            (CacheKey::new("table|/r"), CacheEntry::with_timestamp(sample_table().into(), now)),
        ];
        let encoded = encode_snapshot(&entries).unwrap();
        assert_eq!(encoded.saved, 2);
        assert_eq!(encoded.failed.len(), 1);
        assert_eq!(encoded.failed[0].0, CacheKey::new("bad|/r"));

        let decoded = decode_snapshot(&encoded.bytes).unwrap();
        assert_eq!(decoded.key_list, vec![CacheKey::new("good|/r"), CacheKey::new("table|/r")]);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(
            decoded.entries[&CacheKey::new("good|/r")].cached_at(),
            now
        );
        assert!(decoded.skipped.is_empty());
    }

    #[test]
    fn test_timestamp_past_year_9999_is_refused() {
        let far = chrono::NaiveDate::from_ymd_opt(10000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let table = Table::new(vec![Column::timestamp("date", vec![Some(far)])]).unwrap();
        assert!(matches!(
            encode_value(&CacheValue::Table(table.clone())),
            Err(CodecError::InvalidTimestamp(_))
        ));

        let now = Utc::now();
        let entries = vec![
            (CacheKey::new("far|/r"), CacheEntry::with_timestamp(table.into(), now)),
            (CacheKey::new("stamp|/r"), CacheEntry::with_timestamp(CacheValue::Int(1), far)),
            (CacheKey::new("near|/r"), CacheEntry::with_timestamp(CacheValue::Int(2), now)),
        ];
        let encoded = encode_snapshot(&entries).unwrap();
        assert_eq!(encoded.saved, 1);
        assert_eq!(encoded.failed.len(), 2);
        let decoded = decode_snapshot(&encoded.bytes).unwrap();
        assert_eq!(decoded.key_list, vec![CacheKey::new("near|/r")]);
        assert!(decoded.skipped.is_empty());
    }

    #[test]
    fn test_snapshot_with_corrupt_record() {
        let envelope = json!({
            "version": 1,
            "key_list": ["a", "b"],
            "cache": {
                "a": {"value": 1, "cached_at": "2024-01-01T00:00:00Z"},
                "b": {"value": 2, "cached_at": "yesterday"},
            }
        });
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(envelope.to_string().as_bytes()).unwrap();
        let bytes = encoder.finish().unwrap();

        let decoded = decode_snapshot(&bytes).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.skipped.len(), 1);
        assert_eq!(decoded.skipped[0].0, "b");
    }

    #[test]
    fn test_snapshot_garbage_is_an_error() {
        assert!(decode_snapshot(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_entry_bytes() {
        let entry = CacheEntry::with_timestamp(
            CacheValue::Table(sample_table()),
            Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        );
        let bytes = encode_entry_bytes(&entry).unwrap();
        assert_eq!(&bytes[..8], &1_700_000_000_123i64.to_le_bytes());
        assert_eq!(decode_entry_bytes(&bytes).unwrap(), entry);

        assert_eq!(decode_entry_timestamp(&bytes).unwrap(), entry.cached_at());
        assert!(decode_entry_bytes(&bytes[..5]).is_err());
    }
}
