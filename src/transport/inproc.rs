//! In-process endpoint registry.
//!
//! Binding records `name → channel`; connecting looks the name up and wires the two
//! channels as peers. Entries whose channel has closed count as free.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::channel::{Channel, WeakChannel};
use crate::error::TransportError;

#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<String, WeakChannel>>,
}

impl Registry {
    pub(crate) fn bind(&self, name: &str, channel: &Channel) -> Result<(), TransportError> {
        let mut entries = self.entries.lock();
        let taken = entries
            .get(name)
            .and_then(WeakChannel::upgrade)
            .is_some_and(|bound| !bound.is_closed());
        if taken {
            return Err(TransportError::AddressInUse(name.to_string()));
        }
        entries.insert(name.to_string(), channel.downgrade());
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<Channel, TransportError> {
        let mut entries = self.entries.lock();
        let bound = entries.get(name).and_then(WeakChannel::upgrade);
        match bound {
            Some(bound) if !bound.is_closed() => Ok(bound),
            _ => {
                entries.remove(name);
                Err(TransportError::ConnectionRefused(name.to_string()))
            }
        }
    }

    /// Drops `name` if it still points at `channel`.
    pub(crate) fn release(&self, name: &str, channel: &Channel) {
        let mut entries = self.entries.lock();
        let ours = entries
            .get(name)
            .and_then(WeakChannel::upgrade)
            .is_some_and(|bound| bound.same(channel));
        if ours {
            entries.remove(name);
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}
