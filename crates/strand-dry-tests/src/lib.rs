// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for strand crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`transport`] - Scripted backend fake with a call log
//! - [`fixtures`] - Vertex, edge, and product JSON builders

pub mod config;
pub mod fixtures;
pub mod transport;

pub use config::InMemoryConfigStore;
pub use transport::{FakeTransport, RecordedCall};
