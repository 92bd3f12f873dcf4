// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical JSON encoding for signed bytes and key IDs.
//!
//! Signature correctness depends on every party producing the same byte
//! sequence for the same logical document, so the signed portion of metadata
//! is never serialized through an order-preserving general serializer.
//! [`CanonicalFormatter`] plugs into `serde_json`'s `Serializer` and emits:
//!
//! * object keys in lexicographic byte order,
//! * no insignificant whitespace,
//! * integers in minimal decimal form,
//! * strings with the standard JSON escape set (`\"`, `\\`, control
//!   characters as `\uXXXX`),
//! * arrays in input order.
//!
//! Floating point numbers have no canonical form and are rejected.

use serde_json::ser::{CharEscape, CompactFormatter, Formatter};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// A `serde_json` [`Formatter`] that produces canonical JSON.
///
/// ```
/// use rampart::encode::CanonicalFormatter;
/// use serde::Serialize;
///
/// let value = serde_json::json!({ "b": 1, "a": { "d": [1, 2], "c": "x" } });
/// let mut bytes = Vec::new();
/// let mut ser = serde_json::Serializer::with_formatter(&mut bytes, CanonicalFormatter::new());
/// value.serialize(&mut ser).unwrap();
/// assert_eq!(bytes, br#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
/// ```
#[derive(Debug, Default)]
pub struct CanonicalFormatter {
    /// Objects currently being collected, innermost last. While this is
    /// non-empty, all output is buffered so the innermost object's entries
    /// can be reordered before they are written out.
    stack: Vec<ObjectEntries>,
}

#[derive(Debug, Default)]
struct ObjectEntries {
    /// Completed entries, keyed by the serialized key bytes. `BTreeMap`
    /// iteration order is the output order.
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    key: Vec<u8>,
    value: Vec<u8>,
    writing_key: bool,
}

impl CanonicalFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer output should currently be routed to, if any object is
    /// still being collected.
    fn buffer(&mut self) -> Option<&mut Vec<u8>> {
        self.stack.last_mut().map(|object| {
            if object.writing_key {
                &mut object.key
            } else {
                &mut object.value
            }
        })
    }

    fn write<W>(&mut self, writer: &mut W, bytes: &[u8]) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        match self.buffer() {
            Some(buffer) => buffer.write_all(bytes),
            None => writer.write_all(bytes),
        }
    }

    fn unbalanced() -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, "unbalanced object markers")
    }
}

/// Forwards a scalar-emitting `Formatter` method to [`CompactFormatter`],
/// routed into the current object buffer when one is open.
macro_rules! forward {
    ($(fn $name:ident $(, $arg:ident : $ty:ty)*;)+) => {
        $(fn $name<W>(&mut self, writer: &mut W $(, $arg: $ty)*) -> io::Result<()>
        where
            W: ?Sized + Write,
        {
            match self.buffer() {
                Some(buffer) => CompactFormatter.$name(buffer $(, $arg)*),
                None => CompactFormatter.$name(writer $(, $arg)*),
            }
        })+
    };
}

impl Formatter for CanonicalFormatter {
    forward! {
        fn write_null;
        fn write_bool, value: bool;
        fn write_i8, value: i8;
        fn write_i16, value: i16;
        fn write_i32, value: i32;
        fn write_i64, value: i64;
        fn write_i128, value: i128;
        fn write_u8, value: u8;
        fn write_u16, value: u16;
        fn write_u32, value: u32;
        fn write_u64, value: u64;
        fn write_u128, value: u128;
        fn write_number_str, value: &str;
        fn begin_string;
        fn end_string;
        fn write_string_fragment, fragment: &str;
        fn begin_array;
        fn end_array;
        fn begin_array_value, first: bool;
        fn end_array_value;
    }

    fn write_f32<W>(&mut self, _writer: &mut W, _value: f32) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "floating point numbers have no canonical form",
        ))
    }

    fn write_f64<W>(&mut self, _writer: &mut W, _value: f64) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "floating point numbers have no canonical form",
        ))
    }

    /// Short escapes (`\n`, `\t`, ...) are normalized to their `\uXXXX` form
    /// so that equivalent strings cannot encode two different ways.
    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let char_escape = match char_escape {
            CharEscape::Backspace => CharEscape::AsciiControl(0x08),
            CharEscape::Tab => CharEscape::AsciiControl(0x09),
            CharEscape::LineFeed => CharEscape::AsciiControl(0x0a),
            CharEscape::FormFeed => CharEscape::AsciiControl(0x0c),
            CharEscape::CarriageReturn => CharEscape::AsciiControl(0x0d),
            other => other,
        };
        match self.buffer() {
            Some(buffer) => CompactFormatter.write_char_escape(buffer, char_escape),
            None => CompactFormatter.write_char_escape(writer, char_escape),
        }
    }

    fn begin_object<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.stack.push(ObjectEntries::default());
        Ok(())
    }

    fn begin_object_key<W>(&mut self, _writer: &mut W, _first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let object = self.stack.last_mut().ok_or_else(Self::unbalanced)?;
        object.writing_key = true;
        object.key.clear();
        Ok(())
    }

    fn end_object_key<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let object = self.stack.last_mut().ok_or_else(Self::unbalanced)?;
        object.writing_key = false;
        Ok(())
    }

    fn begin_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        Ok(())
    }

    fn end_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let object = self.stack.last_mut().ok_or_else(Self::unbalanced)?;
        let key = std::mem::take(&mut object.key);
        let value = std::mem::take(&mut object.value);
        object.entries.insert(key, value);
        Ok(())
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let object = self.stack.pop().ok_or_else(Self::unbalanced)?;
        let mut out = Vec::new();
        out.push(b'{');
        for (i, (key, value)) in object.entries.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(key);
            out.push(b':');
            out.extend_from_slice(value);
        }
        out.push(b'}');
        self.write(writer, &out)
    }
}
