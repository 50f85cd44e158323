// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Main-thread side of the strand bridge: request router, mirrored state,
//! and a port for events the worker rebroadcasts.

mod error;

pub mod client;
pub mod events;
pub mod mirror;
pub mod router;

pub use client::{Client, ClientOptions};
pub use error::RequestError;
pub use events::{ChannelEvents, EventPort, UiEvent};
pub use mirror::MirrorStore;
pub use router::{PendingRequest, RequestRouter};
