//! Mapping of RESP replies onto the facade's return types.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::{CacheError, CacheResult};
use crate::resp::RespValue;

/// Conversion from a non-error reply. `None` means the reply had the wrong
/// shape for the requested type.
pub trait FromReply: Sized {
    fn from_reply(reply: RespValue) -> Option<Self>;
}

/// Converts `reply` for `command`, turning error replies into
/// `StoreCommand` and shape mismatches into `UnexpectedReply`.
pub(crate) fn convert<T: FromReply>(command: &[u8], reply: RespValue) -> CacheResult<T> {
    if let Some(message) = reply.error_message() {
        return Err(CacheError::StoreCommand { message });
    }
    T::from_reply(reply).ok_or_else(|| CacheError::unexpected(command))
}

impl FromReply for RespValue {
    fn from_reply(reply: RespValue) -> Option<Self> {
        Some(reply)
    }
}

impl FromReply for () {
    fn from_reply(reply: RespValue) -> Option<Self> {
        match reply {
            RespValue::Simple(_) => Some(()),
            _ => None,
        }
    }
}

impl FromReply for String {
    fn from_reply(reply: RespValue) -> Option<Self> {
        match reply {
            RespValue::Simple(bytes) | RespValue::Bulk(Some(bytes)) => String::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

impl FromReply for i64 {
    fn from_reply(reply: RespValue) -> Option<Self> {
        match reply {
            RespValue::Integer(value) => Some(value),
            _ => None,
        }
    }
}

/// `1`/`0` integer replies, or a status reply such as `OK`.
impl FromReply for bool {
    fn from_reply(reply: RespValue) -> Option<Self> {
        match reply {
            RespValue::Integer(value) => Some(value != 0),
            RespValue::Simple(_) => Some(true),
            _ => None,
        }
    }
}

impl FromReply for f64 {
    fn from_reply(reply: RespValue) -> Option<Self> {
        match reply {
            RespValue::Bulk(Some(bytes)) | RespValue::Simple(bytes) => {
                std::str::from_utf8(&bytes).ok()?.parse().ok()
            }
            _ => None,
        }
    }
}

/// Null bulk and null array replies are the absent value.
impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: RespValue) -> Option<Self> {
        if reply.is_null() {
            return Some(None);
        }
        T::from_reply(reply).map(Some)
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(reply: RespValue) -> Option<Self> {
        match reply {
            RespValue::Array(Some(items)) => items.into_iter().map(T::from_reply).collect(),
            RespValue::Array(None) => Some(Vec::new()),
            _ => None,
        }
    }
}

impl<T: FromReply + Eq + Hash> FromReply for HashSet<T> {
    fn from_reply(reply: RespValue) -> Option<Self> {
        Vec::<T>::from_reply(reply).map(|items| items.into_iter().collect())
    }
}

/// Flat `field, value, field, value, ...` arrays.
impl FromReply for HashMap<String, String> {
    fn from_reply(reply: RespValue) -> Option<Self> {
        pairs(reply)?
            .into_iter()
            .map(|(field, value)| Some((String::from_reply(field)?, String::from_reply(value)?)))
            .collect()
    }
}

/// Splits a flat array into consecutive pairs; odd lengths are malformed.
pub(crate) fn pairs(reply: RespValue) -> Option<Vec<(RespValue, RespValue)>> {
    let items = match reply {
        RespValue::Array(Some(items)) => items,
        RespValue::Array(None) => return Some(Vec::new()),
        _ => return None,
    };
    if items.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(first), Some(second)) = (iter.next(), iter.next()) {
        out.push((first, second));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(data: &str) -> RespValue {
        RespValue::Bulk(Some(data.as_bytes().to_vec()))
    }

    #[test]
    fn error_reply_becomes_store_command_error() {
        let err = convert::<String>(b"GET", RespValue::Error(b"WRONGTYPE bad".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::StoreCommand { ref message } if message == "WRONGTYPE bad"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn shape_mismatch_is_unexpected_reply() {
        let err = convert::<i64>(b"INCR", bulk("x")).err().unwrap();
        assert!(matches!(err, CacheError::UnexpectedReply { ref command } if command == "INCR"));
    }

    #[test]
    fn null_bulk_is_absent() {
        let value: Option<String> = convert(b"GET", RespValue::Bulk(None)).unwrap();
        assert_eq!(value, None);
        let value: Option<String> = convert(b"GET", bulk("v")).unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[test]
    fn maps_collections() {
        let reply = RespValue::Array(Some(vec![bulk("a"), RespValue::Bulk(None), bulk("c")]));
        let values: Vec<Option<String>> = convert(b"MGET", reply).unwrap();
        assert_eq!(values, vec![Some("a".to_string()), None, Some("c".to_string())]);

        let reply = RespValue::Array(Some(vec![bulk("f1"), bulk("v1"), bulk("f2"), bulk("v2")]));
        let map: HashMap<String, String> = convert(b"HGETALL", reply).unwrap();
        assert_eq!(map.get("f2").map(String::as_str), Some("v2"));

        let odd = RespValue::Array(Some(vec![bulk("f1")]));
        assert!(convert::<HashMap<String, String>>(b"HGETALL", odd).is_err());
    }

    #[test]
    fn parses_scores() {
        assert_eq!(convert::<f64>(b"ZSCORE", bulk("1.5")).unwrap(), 1.5);
        assert_eq!(convert::<f64>(b"ZSCORE", bulk("-inf")).unwrap(), f64::NEG_INFINITY);
        assert_eq!(convert::<Option<f64>>(b"ZSCORE", RespValue::Bulk(None)).unwrap(), None);
    }
}
