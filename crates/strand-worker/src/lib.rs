// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker side of the strand bridge.
//!
//! [`spawn`] starts the loop that owns the canonical store. The main thread
//! talks to it with [`MainMessage`](strand_proto::MainMessage)s and hears back
//! through [`WorkerMessage`](strand_proto::WorkerMessage)s.

mod error;
pub mod runtime;
pub mod service;
pub mod socket;

pub use error::ServiceError;
pub use runtime::{spawn, WorkerChannels, WorkerConfig};
pub use service::{
    CallContext, RestService, Route, Service, ServiceExtension, ServiceRegistry, SERVICE_POINT,
};
pub use socket::{Reaction, SocketHandler, SocketRouter, SOCKET_POINT};
