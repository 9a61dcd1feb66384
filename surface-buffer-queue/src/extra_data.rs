//! Typed key/value metadata that travels with a buffer.
//!
//! A producer attaches [`BufferExtraData`] on cancel or flush; the consumer
//! reads it back from the acquired buffer, and the producer gets it again on
//! the next request for the same slot.

use crate::error::{SurfaceError, SurfaceResult};
use std::collections::BTreeMap;
use std::fmt;

/// One stored value. The variant is the value's type.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraValue {
    Int32(i32),
    Int64(i64),
    Double(f64),
    Str(String),
}

impl ExtraValue {
    fn kind(&self) -> &'static str {
        match self {
            ExtraValue::Int32(_) => "int32",
            ExtraValue::Int64(_) => "int64",
            ExtraValue::Double(_) => "double",
            ExtraValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Int32(v) => write!(f, "{}", v),
            ExtraValue::Int64(v) => write!(f, "{}", v),
            ExtraValue::Double(v) => write!(f, "{}", v),
            ExtraValue::Str(v) => write!(f, "\"{}\"", v),
        }
    }
}

/// Types that can be read back out of [`BufferExtraData`].
pub trait ExtraKind: Sized {
    fn from_value(value: &ExtraValue) -> Option<Self>;
}

macro_rules! impl_extra_kind {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for ExtraValue {
            fn from(v: $ty) -> Self {
                ExtraValue::$variant(v)
            }
        }

        impl ExtraKind for $ty {
            fn from_value(value: &ExtraValue) -> Option<Self> {
                match value {
                    ExtraValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_extra_kind!(i32, Int32);
impl_extra_kind!(i64, Int64);
impl_extra_kind!(f64, Double);
impl_extra_kind!(String, Str);

impl From<&str> for ExtraValue {
    fn from(v: &str) -> Self {
        ExtraValue::Str(v.to_string())
    }
}

/// String-keyed extra data attached to a buffer.
///
/// # Examples
///
/// ```
/// use surface_buffer_queue::extra_data::BufferExtraData;
///
/// let mut data = BufferExtraData::new();
/// data.extra_set("frame", 7i32);
/// data.extra_set("label", "preview");
/// assert_eq!(data.extra_get::<i32>("frame").unwrap(), 7);
/// assert_eq!(data.extra_get::<String>("label").unwrap(), "preview");
/// assert!(data.extra_get::<i64>("frame").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferExtraData {
    values: BTreeMap<String, ExtraValue>,
}

impl BufferExtraData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value of any type.
    pub fn extra_set(&mut self, key: impl Into<String>, value: impl Into<ExtraValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Reads the value under `key` as `V`.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::NoEntry`] if the key is absent, [`SurfaceError::TypeError`]
    /// if it holds another type.
    pub fn extra_get<V: ExtraKind>(&self, key: &str) -> SurfaceResult<V> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| SurfaceError::NoEntry(format!("extra data key '{}'", key)))?;
        V::from_value(value).ok_or_else(|| {
            tracing::debug!(key, stored = value.kind(), "extra data type mismatch");
            SurfaceError::TypeError(key.to_string())
        })
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtraValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extra_set_and_get_each_kind() {
        let mut data = BufferExtraData::new();
        data.extra_set("a", 0x123i32);
        data.extra_set("b", 0x345i64);
        data.extra_set("c", 1.5f64);
        data.extra_set("d", String::from("567"));

        assert_eq!(data.extra_get::<i32>("a").unwrap(), 0x123);
        assert_eq!(data.extra_get::<i64>("b").unwrap(), 0x345);
        assert_eq!(data.extra_get::<f64>("c").unwrap(), 1.5);
        assert_eq!(data.extra_get::<String>("d").unwrap(), "567");
        assert_eq!(data.len(), 4);
    }

    #[test]
    fn test_extra_get_missing_key() {
        let data = BufferExtraData::new();
        assert!(matches!(data.extra_get::<i32>("nothing"), Err(SurfaceError::NoEntry(_))));
    }

    #[test]
    fn test_extra_get_wrong_type() {
        let mut data = BufferExtraData::new();
        data.extra_set("n", 1i32);
        assert_eq!(data.extra_get::<i64>("n"), Err(SurfaceError::TypeError("n".into())));
        assert_eq!(data.extra_get::<String>("n"), Err(SurfaceError::TypeError("n".into())));
    }

    #[test]
    fn test_extra_set_overwrites_with_new_type() {
        let mut data = BufferExtraData::new();
        data.extra_set("k", 1i32);
        data.extra_set("k", "now a string");
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("k"), Some(&ExtraValue::Str("now a string".into())));
    }

    #[test]
    fn test_extra_value_display() {
        assert_eq!(ExtraValue::Int64(-3).to_string(), "-3");
        assert_eq!(ExtraValue::Str("x".into()).to_string(), "\"x\"");
    }
}
