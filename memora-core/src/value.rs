//! Cached payloads.

use std::collections::BTreeMap;

use crate::table::Table;

/// A value produced by a memoized computation.
///
/// Payloads are a closed set of variants so that every storage codec can
/// handle each one with an explicit match arm.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CacheValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<CacheValue>),
    Mapping(BTreeMap<String, CacheValue>),
    Table(Table),
}

impl CacheValue {
    /// Short variant name, used in log fields and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::Null => "null",
            CacheValue::Bool(_) => "bool",
            CacheValue::Int(_) => "int",
            CacheValue::Float(_) => "float",
            CacheValue::Text(_) => "text",
            CacheValue::List(_) => "list",
            CacheValue::Mapping(_) => "mapping",
            CacheValue::Table(_) => "table",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, CacheValue::Table(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CacheValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CacheValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CacheValue::Float(f) => Some(*f),
            CacheValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CacheValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[CacheValue]> {
        match self {
            CacheValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, CacheValue>> {
        match self {
            CacheValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            CacheValue::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl From<bool> for CacheValue {
    fn from(value: bool) -> Self {
        CacheValue::Bool(value)
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Int(value)
    }
}

impl From<i32> for CacheValue {
    fn from(value: i32) -> Self {
        CacheValue::Int(value.into())
    }
}

impl From<u32> for CacheValue {
    fn from(value: u32) -> Self {
        CacheValue::Int(value.into())
    }
}

impl From<f64> for CacheValue {
    fn from(value: f64) -> Self {
        CacheValue::Float(value)
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Text(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Text(value.to_string())
    }
}

impl From<Table> for CacheValue {
    fn from(value: Table) -> Self {
        CacheValue::Table(value)
    }
}

impl<T: Into<CacheValue>> From<Vec<T>> for CacheValue {
    fn from(value: Vec<T>) -> Self {
        CacheValue::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<CacheValue>> From<BTreeMap<String, T>> for CacheValue {
    fn from(value: BTreeMap<String, T>) -> Self {
        CacheValue::Mapping(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<CacheValue>> From<Option<T>> for CacheValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CacheValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    #[test]
    fn test_conversions() {
        assert_eq!(CacheValue::from(3i64), CacheValue::Int(3));
        assert_eq!(CacheValue::from(3i32), CacheValue::Int(3));
        assert_eq!(CacheValue::from(true), CacheValue::Bool(true));
        assert_eq!(CacheValue::from("main"), CacheValue::Text("main".into()));
        assert_eq!(CacheValue::from(None::<i64>), CacheValue::Null);
        assert_eq!(
            CacheValue::from(vec!["main", "dev"]),
            CacheValue::List(vec!["main".into(), "dev".into()])
        );

        let mut counts = BTreeMap::new();
        counts.insert("ada".to_string(), 4i64);
        let value = CacheValue::from(counts);
        assert_eq!(
            value.as_mapping().and_then(|m| m.get("ada")),
            Some(&CacheValue::Int(4))
        );
    }

    #[test]
    fn test_kind_and_accessors() {
        let table = Table::new(vec![Column::int("n", vec![Some(1)])]).unwrap();
        let value = CacheValue::from(table.clone());
        assert_eq!(value.kind(), "table");
        assert!(value.is_table());
        assert_eq!(value.as_table(), Some(&table));
        assert_eq!(value.as_int(), None);

        assert_eq!(CacheValue::Int(2).as_float(), Some(2.0));
        assert_eq!(CacheValue::default().kind(), "null");
        assert!(CacheValue::Null.is_null());
    }
}
