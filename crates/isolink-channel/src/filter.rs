//! Message filters.
//!
//! Filters run around each exchange: outgoing filters before a message is
//! encoded, incoming filters after one is decoded. A filter either passes the
//! message through (possibly modified) or vetoes it with
//! [`ChannelError::Veto`], which fails that send or receive without touching
//! the connection.

use isolink_core::config::FilterDirection;
use isolink_core::error::ChannelError;
use isolink_core::msg::IsoMsg;
use std::sync::Arc;
use tracing::debug;

/// One filter step.
pub trait MsgFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Passes the message through, returning it (possibly modified) or a
    /// veto error.
    fn filter(&self, msg: IsoMsg) -> Result<IsoMsg, ChannelError>;
}

/// Ordered filters for each traffic direction.
#[derive(Clone, Default)]
pub struct FilterChain {
    incoming: Vec<Arc<dyn MsgFilter>>,
    outgoing: Vec<Arc<dyn MsgFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter to the direction(s) it is tagged with.
    pub fn add(&mut self, direction: FilterDirection, filter: Arc<dyn MsgFilter>) {
        if direction.applies_incoming() {
            self.incoming.push(Arc::clone(&filter));
        }
        if direction.applies_outgoing() {
            self.outgoing.push(filter);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }

    /// Runs the outgoing filters in declared order.
    pub fn apply_outgoing(&self, msg: IsoMsg) -> Result<IsoMsg, ChannelError> {
        Self::apply(&self.outgoing, msg)
    }

    /// Runs the incoming filters in declared order.
    pub fn apply_incoming(&self, msg: IsoMsg) -> Result<IsoMsg, ChannelError> {
        Self::apply(&self.incoming, msg)
    }

    fn apply(filters: &[Arc<dyn MsgFilter>], mut msg: IsoMsg) -> Result<IsoMsg, ChannelError> {
        for filter in filters {
            msg = filter.filter(msg).map_err(|e| {
                debug!(filter = filter.name(), error = %e, "filter rejected message");
                e
            })?;
        }
        Ok(msg)
    }
}

/// Vetoes any message whose MTI is not in the allow list.
pub struct MtiAllowFilter {
    allowed: Vec<String>,
}

impl MtiAllowFilter {
    pub fn new(mtis: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: mtis.into_iter().collect(),
        }
    }
}

impl MsgFilter for MtiAllowFilter {
    fn name(&self) -> &'static str {
        "mti-allow"
    }

    fn filter(&self, msg: IsoMsg) -> Result<IsoMsg, ChannelError> {
        match msg.mti() {
            Some(mti) if self.allowed.iter().any(|a| a == mti) => Ok(msg),
            Some(mti) => Err(ChannelError::veto(
                self.name(),
                format!("mti {mti} not in allow list"),
            )),
            None => Err(ChannelError::veto(self.name(), "message has no mti")),
        }
    }
}

/// Removes the configured fields from every message it sees.
///
/// Typically tagged `outgoing` to keep operator-only fields off the wire.
pub struct FieldScrubFilter {
    fields: Vec<u32>,
}

impl FieldScrubFilter {
    pub fn new(fields: impl IntoIterator<Item = u32>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }
}

impl MsgFilter for FieldScrubFilter {
    fn name(&self) -> &'static str {
        "field-scrub"
    }

    fn filter(&self, mut msg: IsoMsg) -> Result<IsoMsg, ChannelError> {
        for &field in &self.fields {
            msg.unset(field);
        }
        Ok(msg)
    }
}
