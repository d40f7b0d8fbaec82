use std::borrow::Cow;
use std::fmt;
use std::slice;

use crate::error::{Error, Result};

/// How the keys of a database are interpreted by typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    Binary,
    String,
    /// Native-endian `u32`; implies integer key ordering.
    Uint32,
}

/// A decoded key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Binary(Vec<u8>),
    String(String),
    Uint32(u32),
}

impl Key {
    pub fn decode(key_type: KeyType, bytes: &[u8]) -> Result<Key> {
        match key_type {
            KeyType::Binary => Ok(Key::Binary(bytes.to_vec())),
            KeyType::String => Ok(Key::String(decode_str(bytes)?.to_owned())),
            KeyType::Uint32 => {
                let raw: [u8; 4] = bytes.try_into().map_err(|_| Error::InvalidValue("u32 key"))?;
                Ok(Key::Uint32(u32::from_ne_bytes(raw)))
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Key::Binary(b) => b.clone(),
            Key::String(s) => s.as_bytes().to_vec(),
            Key::Uint32(n) => n.to_ne_bytes().to_vec(),
        }
    }
}

/// A typed value and its stored representation.
///
/// Strings are stored as raw UTF-8, numbers as 8-byte little-endian `f64`,
/// booleans as a single byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Binary(&'a [u8]),
    String(&'a str),
    Number(f64),
    Boolean(bool),
}

impl<'a> Value<'a> {
    pub fn encode(&self) -> Cow<'a, [u8]> {
        match *self {
            Value::Binary(b) => Cow::Borrowed(b),
            Value::String(s) => Cow::Borrowed(s.as_bytes()),
            Value::Number(n) => Cow::Owned(n.to_le_bytes().to_vec()),
            Value::Boolean(b) => Cow::Owned(vec![b as u8]),
        }
    }
}

pub fn decode_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::InvalidValue("utf-8 string"))
}

pub fn decode_number(bytes: &[u8]) -> Result<f64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| Error::InvalidValue("number"))?;
    Ok(f64::from_le_bytes(raw))
}

pub fn decode_boolean(bytes: &[u8]) -> Result<bool> {
    match bytes {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(Error::InvalidValue("boolean")),
    }
}

/// Zero-copy view into the memory map, detached from any borrow.
///
/// The view points straight into a mapped page. It stays valid only until
/// the next operation that can remap the file or recycle the page: ending
/// the transaction it came from, a write through that transaction, or
/// [`Environment::resize`](crate::Environment::resize). The engine cannot
/// track this; callers must [`detach`](UnsafeView::detach) the view before
/// any such operation and never read it afterwards.
pub struct UnsafeView {
    ptr: *const u8,
    len: usize,
}

impl UnsafeView {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        UnsafeView {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// # Safety
    ///
    /// The page behind the view must still be mapped and unchanged: the
    /// originating transaction is alive, has not written since the view was
    /// taken, and the map has not been resized.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        slice::from_raw_parts(self.ptr, self.len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Release the view.
    pub fn detach(self) {}
}

impl fmt::Debug for UnsafeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsafeView").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_decode_back() {
        assert_eq!(decode_number(&Value::Number(2.5).encode()).unwrap(), 2.5);
        assert!(decode_boolean(&Value::Boolean(true).encode()).unwrap());
        assert_eq!(decode_str(&Value::String("hé").encode()).unwrap(), "hé");
        assert!(matches!(decode_number(b"abc"), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn uint32_keys_use_native_order_bytes() {
        let key = Key::Uint32(7);
        assert_eq!(Key::decode(KeyType::Uint32, &key.to_bytes()).unwrap(), key);
        assert!(Key::decode(KeyType::Uint32, b"toolong").is_err());
    }
}
