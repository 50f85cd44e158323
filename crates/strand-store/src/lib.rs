// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical worker-side store for strand.
//!
//! [`Store`] owns the [`RootState`] tree: normalized elements, products,
//! workspaces, undo history, and a few session slices. Every dispatch is
//! diffed and mirrored to the main thread. Network-backed operations
//! (loading elements, product lists, graph edits) are [`Command`]s run by
//! [`Effects`].

pub mod command;
pub mod configuration;
pub mod debounce;
pub mod effects;
pub mod element;
mod error;
pub mod graph;
pub mod ontology;
pub mod product;
pub mod state;
pub mod store;
pub mod undo;
pub mod workspace;

pub use command::Command;
pub use debounce::{DebounceConfig, Debouncer};
pub use effects::Effects;
pub use error::StoreError;
pub use state::RootState;
pub use store::{Reducer, Store, StoreExtension, UndoFn, UndoPair, STORE_POINT};
