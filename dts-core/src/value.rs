//! Typed property values.
//!
//! Every property in a device tree is classified into exactly one
//! [`PropertyValue`] variant when it is decoded. The variants map one-to-one
//! onto the DTS value encodings, so the encoder never has to guess how to
//! render a value.

use serde::{Deserialize, Serialize};

/// A single element of a `<...>` cell array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cell {
    /// A 32-bit numeric cell.
    #[serde(rename = "num")]
    Num(u32),
    /// A `&label` phandle reference embedded in the array.
    #[serde(rename = "ref")]
    Ref(String),
}

impl From<u32> for Cell {
    fn from(n: u32) -> Self {
        Cell::Num(n)
    }
}

/// The value of a device tree property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum PropertyValue {
    /// A boolean marker property, written `name;`.
    Empty,
    /// A single string, written `name = "value";`.
    Text(String),
    /// Two or more strings, written `name = "a", "b";`.
    TextList(Vec<String>),
    /// A cell array, written `name = <0x1 &label>;`.
    Cells(Vec<Cell>),
    /// A bare phandle reference, written `name = &label;`.
    PhandleRef(String),
    /// A byte string, written `name = [00 ff];`.
    Bytes(Vec<u8>),
}

impl PropertyValue {
    /// Builds a string value from a list of strings, picking `Text` for a
    /// single string and `Empty` for none.
    pub fn strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyValue::TextList(strings.into_iter().map(Into::into).collect()).normalized()
    }

    /// Builds a cell array of plain numbers.
    pub fn cells(values: impl IntoIterator<Item = u32>) -> Self {
        PropertyValue::Cells(values.into_iter().map(Cell::Num).collect())
    }

    /// Collapses string lists that have a shorter canonical spelling.
    ///
    /// A one-element `TextList` encodes exactly like a `Text` and an empty one
    /// has no textual form at all, so both are rewritten.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            PropertyValue::TextList(mut list) => match list.len() {
                0 => PropertyValue::Empty,
                1 => PropertyValue::Text(list.remove(0)),
                _ => PropertyValue::TextList(list),
            },
            other => other,
        }
    }

    /// Returns a short name of the variant, as used in the JSON exchange shape.
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Empty => "empty",
            PropertyValue::Text(_) => "text",
            PropertyValue::TextList(_) => "textList",
            PropertyValue::Cells(_) => "cells",
            PropertyValue::PhandleRef(_) => "phandleRef",
            PropertyValue::Bytes(_) => "bytes",
        }
    }

    /// Returns the value as a string if it is a `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a single `u32` if it is a one-cell numeric array.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::Cells(cells) => match cells.as_slice() {
                [Cell::Num(n)] => Some(*n),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<u32> for PropertyValue {
    fn from(n: u32) -> Self {
        PropertyValue::Cells(vec![Cell::Num(n)])
    }
}

impl From<Vec<u32>> for PropertyValue {
    fn from(values: Vec<u32>) -> Self {
        PropertyValue::cells(values)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(bytes: Vec<u8>) -> Self {
        PropertyValue::Bytes(bytes)
    }
}

/// A named property. The order of entries within a node is the declaration
/// order and is preserved through encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub name: String,
    pub value: PropertyValue,
}

impl PropertyEntry {
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates a boolean marker property.
    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, PropertyValue::Empty)
    }
}

/// A `/memreserve/` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryReservation {
    pub address: u64,
    pub size: u64,
}

impl MemoryReservation {
    pub fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }
}
