// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! UI-facing event port.
//!
//! The worker rebroadcasts socket events that only concern the UI
//! (`sessionExpiration`, `notificationActive`, `textUpdated`, …). Widgets read
//! them through [`EventPort`] without knowing about the worker channel.

use serde_json::Value;
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};

/// One rebroadcast event.
#[derive(Debug, Clone, PartialEq)]
pub struct UiEvent {
    /// Event name.
    pub name: String,
    /// Event payload.
    pub data: Value,
}

/// Source of rebroadcast events.
pub trait EventPort {
    /// Drain up to `max` pending events.
    fn drain_events(&mut self, max: usize) -> Vec<UiEvent>;
    /// Stop listening; later drains return nothing.
    fn close(&mut self);
}

/// Channel-backed [`EventPort`].
#[derive(Debug, Default)]
pub struct ChannelEvents {
    rx: Option<UnboundedReceiver<UiEvent>>,
}

impl ChannelEvents {
    /// Port with no channel yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the channel events arrive on.
    pub fn set_channel(&mut self, rx: UnboundedReceiver<UiEvent>) {
        self.rx = Some(rx);
    }

    /// Wait for the next event; `None` once the channel is closed or absent.
    pub async fn next(&mut self) -> Option<UiEvent> {
        self.rx.as_mut()?.recv().await
    }
}

impl EventPort for ChannelEvents {
    fn drain_events(&mut self, max: usize) -> Vec<UiEvent> {
        let mut out = Vec::new();
        let Some(rx) = self.rx.as_mut() else {
            return out;
        };
        while out.len() < max {
            match rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    fn close(&mut self) {
        self.rx = None;
    }
}
