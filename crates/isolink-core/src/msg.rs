//! Message envelope exchanged with the remote counterparty.
//!
//! An [`IsoMsg`] is a set of numbered string fields in the ISO-8583 style;
//! field 0 carries the message type indicator (MTI). The gateway never
//! interprets field contents beyond the MTI, but it does copy configured
//! "handback" fields from a request into its response, because the remote
//! endpoint does not echo them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field number that carries the message type indicator.
pub const MTI_FIELD: u32 = 0;

/// A structured request or response message with numbered fields.
///
/// Mutated only by the component that currently holds it; the gateway clones
/// it when a copy must outlive the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IsoMsg {
    fields: BTreeMap<u32, String>,
}

impl IsoMsg {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message with the given MTI, e.g. `IsoMsg::with_mti("0800")`.
    pub fn with_mti(mti: impl Into<String>) -> Self {
        let mut msg = Self::new();
        msg.set_mti(mti);
        msg
    }

    /// Returns the MTI, if set.
    pub fn mti(&self) -> Option<&str> {
        self.get(MTI_FIELD)
    }

    pub fn set_mti(&mut self, mti: impl Into<String>) {
        self.set(MTI_FIELD, mti);
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, field: u32, value: impl Into<String>) {
        self.fields.insert(field, value.into());
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with_field(mut self, field: u32, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: u32) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn has(&self, field: u32) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn unset(&mut self, field: u32) {
        self.fields.remove(&field);
    }

    /// Field numbers present in this message, in ascending order.
    pub fn field_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.fields.keys().copied()
    }

    /// All fields as (number, value) pairs, in ascending field order.
    pub fn fields(&self) -> impl Iterator<Item = (u32, &str)> {
        self.fields.iter().map(|(n, v)| (*n, v.as_str()))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Clones only the listed fields into a new message.
    ///
    /// Fields absent from this message are absent from the clone; the
    /// gateway uses this to capture handback fields before a send.
    pub fn clone_fields(&self, fields: &[u32]) -> IsoMsg {
        let mut subset = IsoMsg::new();
        for &field in fields {
            if let Some(value) = self.get(field) {
                subset.set(field, value);
            }
        }
        subset
    }

    /// Merges another message into this one.
    ///
    /// Every field present in `other` is copied over, replacing any value
    /// already held under the same number.
    pub fn merge(&mut self, other: &IsoMsg) {
        for (field, value) in other.fields() {
            self.set(field, value);
        }
    }
}

impl fmt::Display for IsoMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.mti().unwrap_or("----"))?;
        for (field, value) in self.fields() {
            if field != MTI_FIELD {
                write!(f, " {field}={value}")?;
            }
        }
        Ok(())
    }
}
