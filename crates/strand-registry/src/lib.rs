// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Extension-point registry.
//!
//! Plugins register values against a named [`ExtensionPoint`]; consumers read
//! them back with [`ExtensionRegistry::extensions_for`]. A point may be
//! documented with a description and a validator; registered values that fail
//! the validator are logged and left out. Undocumented points return every
//! registration and warn once.
//!
//! The registry is an ordinary value: build one with [`ExtensionRegistry::new`]
//! and hand it out as `Arc<ExtensionRegistry>`. Tests build their own.

use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

type Erased = Arc<dyn Any + Send + Sync>;
type Validator = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> bool + Send + Sync>;

/// Registry usage errors. These indicate programming mistakes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Extension point name was empty.
    #[error("extension point name is required")]
    PointRequired,
    /// Extension id was empty.
    #[error("extension id is required")]
    IdRequired,
    /// Extension id is not registered.
    #[error("no extension registered with id {0}")]
    UnknownId(String),
    /// Documentation without a description.
    #[error("extension point {0} needs a description")]
    DescriptionRequired(String),
}

/// Typed handle naming an extension point.
///
/// `E` is the type of value registered at the point.
pub struct ExtensionPoint<E> {
    name: Cow<'static, str>,
    _marker: PhantomData<fn() -> E>,
}

impl<E> ExtensionPoint<E> {
    /// Point with a static name, usable in `const` items.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _marker: PhantomData,
        }
    }

    /// Point with a runtime name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _marker: PhantomData,
        }
    }

    /// Point name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<E> Clone for ExtensionPoint<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E> fmt::Debug for ExtensionPoint<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtensionPoint").field(&self.name).finish()
    }
}

/// Identifier returned by [`ExtensionRegistry::register`]; `"<point>-<n>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(String);

impl ExtensionId {
    /// Id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExtensionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional documentation fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocOptions {
    /// Link to longer documentation.
    pub url: Option<String>,
    /// Older name of the point; registrations made under it are redirected.
    pub legacy_name: Option<String>,
}

/// Documentation of one point, as listed by [`ExtensionRegistry::documentation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointDocumentation {
    /// Canonical point name.
    pub extension_point: String,
    /// Human description.
    pub description: String,
    /// Optional documentation link.
    pub url: Option<String>,
    /// Legacy name, if any.
    pub legacy_name: Option<String>,
    /// Registered values currently passing validation.
    pub registered: usize,
}

/// Broadcast after any registration change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionsChanged {
    /// Point whose registrations changed.
    pub extension_point: String,
}

struct Entry {
    id: ExtensionId,
    value: Erased,
}

struct Documentation {
    description: String,
    url: Option<String>,
    legacy_name: Option<String>,
    validator: Validator,
}

#[derive(Default)]
struct Inner {
    points: HashMap<String, Vec<Entry>>,
    owners: HashMap<ExtensionId, String>,
    docs: HashMap<String, Documentation>,
    legacy: HashMap<String, String>,
    warned: HashSet<String>,
    next_id: u64,
}

impl Inner {
    fn canonical(&mut self, name: &str) -> String {
        match self.legacy.get(name) {
            Some(canonical) => {
                let canonical = canonical.clone();
                if self.warned.insert(format!("legacy:{name}")) {
                    warn!(
                        legacy_name = name,
                        extension_point = %canonical,
                        "extension point renamed; update the plugin to the new name"
                    );
                }
                canonical
            }
            None => name.to_owned(),
        }
    }
}

/// Registry of extension points.
pub struct ExtensionRegistry {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<ExtensionsChanged>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ExtensionRegistry")
            .field("points", &inner.points.len())
            .field("documented", &inner.docs.len())
            .finish()
    }
}

impl ExtensionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, point: &str) {
        // No subscribers is fine.
        let _ = self.changes.send(ExtensionsChanged {
            extension_point: point.to_owned(),
        });
    }

    /// Subscribe to registration changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionsChanged> {
        self.changes.subscribe()
    }

    /// Drop every registration and all documentation. Ids keep counting up.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let next_id = inner.next_id;
        *inner = Inner {
            next_id,
            ..Inner::default()
        };
    }

    /// Canonical name for `name`, resolving legacy point names.
    pub fn canonical_name(&self, name: &str) -> String {
        self.lock().canonical(name)
    }

    /// Append `extension` to `point`.
    pub fn register<E>(
        &self,
        point: &ExtensionPoint<E>,
        extension: E,
    ) -> Result<ExtensionId, RegistryError>
    where
        E: Send + Sync + 'static,
    {
        if point.name().is_empty() {
            return Err(RegistryError::PointRequired);
        }
        let (canonical, id) = {
            let mut inner = self.lock();
            let canonical = inner.canonical(point.name());
            inner.next_id += 1;
            let id = ExtensionId(format!("{canonical}-{}", inner.next_id));
            inner.owners.insert(id.clone(), canonical.clone());
            inner.points.entry(canonical.clone()).or_default().push(Entry {
                id: id.clone(),
                value: Arc::new(extension),
            });
            (canonical, id)
        };
        self.notify(&canonical);
        Ok(id)
    }

    /// Remove exactly one registration.
    pub fn unregister(&self, id: &ExtensionId) -> Result<(), RegistryError> {
        if id.as_str().is_empty() {
            return Err(RegistryError::IdRequired);
        }
        let point = {
            let mut inner = self.lock();
            let point = inner
                .owners
                .remove(id)
                .ok_or_else(|| RegistryError::UnknownId(id.to_string()))?;
            if let Some(entries) = inner.points.get_mut(&point) {
                entries.retain(|entry| &entry.id != id);
            }
            point
        };
        self.notify(&point);
        Ok(())
    }

    /// Remove every registration and the documentation of `point`.
    pub fn unregister_all<E>(&self, point: &ExtensionPoint<E>) -> Result<(), RegistryError> {
        if point.name().is_empty() {
            return Err(RegistryError::PointRequired);
        }
        let canonical = {
            let mut inner = self.lock();
            let canonical = inner.canonical(point.name());
            if let Some(entries) = inner.points.remove(&canonical) {
                for entry in entries {
                    inner.owners.remove(&entry.id);
                }
            }
            inner.docs.remove(&canonical);
            inner.warned.remove(&canonical);
            canonical
        };
        self.notify(&canonical);
        Ok(())
    }

    /// Document `point` with a description and a validator.
    ///
    /// Registrations already made under `options.legacy_name` move to `point`.
    pub fn document<E, F>(
        &self,
        point: &ExtensionPoint<E>,
        description: &str,
        validator: F,
        options: DocOptions,
    ) -> Result<(), RegistryError>
    where
        E: Send + Sync + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if point.name().is_empty() {
            return Err(RegistryError::PointRequired);
        }
        if description.trim().is_empty() {
            return Err(RegistryError::DescriptionRequired(point.name().to_owned()));
        }
        let canonical = point.name().to_owned();
        let mut inner = self.lock();
        if let Some(legacy) = options.legacy_name.as_ref().filter(|l| **l != canonical) {
            inner.legacy.insert(legacy.clone(), canonical.clone());
            if let Some(moved) = inner.points.remove(legacy) {
                for entry in &moved {
                    inner.owners.insert(entry.id.clone(), canonical.clone());
                }
                inner.points.entry(canonical.clone()).or_default().extend(moved);
            }
        }
        let validator: Validator = Arc::new(move |value: &(dyn Any + Send + Sync)| {
            value.downcast_ref::<E>().is_some_and(&validator)
        });
        inner.docs.insert(
            canonical,
            Documentation {
                description: description.to_owned(),
                url: options.url,
                legacy_name: options.legacy_name,
                validator,
            },
        );
        Ok(())
    }

    /// Silence the missing-documentation warning for `point`.
    pub fn mark_undocumented<E>(&self, point: &ExtensionPoint<E>) {
        let mut inner = self.lock();
        let canonical = inner.canonical(point.name());
        inner.warned.insert(canonical);
    }

    /// Registered values of `point` in registration order.
    ///
    /// With documentation, values failing the validator are logged and
    /// skipped. Without it, every value is returned after a one-time warning.
    pub fn extensions_for<E>(&self, point: &ExtensionPoint<E>) -> Vec<Arc<E>>
    where
        E: Send + Sync + 'static,
    {
        let (canonical, entries, validator) = {
            let mut inner = self.lock();
            let canonical = inner.canonical(point.name());
            let entries: Vec<(ExtensionId, Erased)> = inner
                .points
                .get(&canonical)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| (entry.id.clone(), Arc::clone(&entry.value)))
                        .collect()
                })
                .unwrap_or_default();
            let validator = inner.docs.get(&canonical).map(|doc| Arc::clone(&doc.validator));
            if validator.is_none() && inner.warned.insert(canonical.clone()) {
                warn!(
                    extension_point = %canonical,
                    "extension point is not documented; call ExtensionRegistry::document"
                );
            }
            (canonical, entries, validator)
        };

        entries
            .into_iter()
            .filter_map(|(id, value)| {
                if let Some(valid) = &validator {
                    if !valid(value.as_ref()) {
                        warn!(extension_point = %canonical, extension_id = %id, "extension failed validation");
                        return None;
                    }
                }
                match value.downcast::<E>() {
                    Ok(typed) => Some(typed),
                    Err(_) => {
                        warn!(extension_point = %canonical, extension_id = %id, "extension has an unexpected type");
                        None
                    }
                }
            })
            .collect()
    }

    /// [`extensions_for`](Self::extensions_for) over several points at once.
    pub fn extensions_for_points<E>(
        &self,
        points: &[ExtensionPoint<E>],
    ) -> BTreeMap<String, Vec<Arc<E>>>
    where
        E: Send + Sync + 'static,
    {
        points
            .iter()
            .map(|point| (self.canonical_name(point.name()), self.extensions_for(point)))
            .collect()
    }

    /// Every documented point, sorted by name.
    ///
    /// Validators run after the registry lock is released.
    pub fn documentation(&self) -> Vec<PointDocumentation> {
        let snapshot: Vec<(PointDocumentation, Validator, Vec<Erased>)> = {
            let inner = self.lock();
            inner
                .docs
                .iter()
                .map(|(point, doc)| {
                    let values = inner
                        .points
                        .get(point)
                        .map(|entries| entries.iter().map(|entry| Arc::clone(&entry.value)).collect())
                        .unwrap_or_default();
                    let listed = PointDocumentation {
                        extension_point: point.clone(),
                        description: doc.description.clone(),
                        url: doc.url.clone(),
                        legacy_name: doc.legacy_name.clone(),
                        registered: 0,
                    };
                    (listed, Arc::clone(&doc.validator), values)
                })
                .collect()
        };
        let mut listed: Vec<PointDocumentation> = snapshot
            .into_iter()
            .map(|(mut listed, validator, values)| {
                listed.registered = values.iter().filter(|value| validator(value.as_ref())).count();
                listed
            })
            .collect();
        listed.sort_by(|a, b| a.extension_point.cmp(&b.extension_point));
        listed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Named {
        identifier: &'static str,
    }

    const POINT: ExtensionPoint<Named> = ExtensionPoint::new("pt");

    fn ids(found: &[Arc<Named>]) -> Vec<&'static str> {
        found.iter().map(|n| n.identifier).collect()
    }

    #[test]
    fn register_then_unregister_leaves_point_empty() {
        let registry = ExtensionRegistry::new();
        let id = registry.register(&POINT, Named { identifier: "x" }).unwrap();
        assert!(id.as_str().starts_with("pt-"));
        registry.unregister(&id).unwrap();
        assert!(registry.extensions_for(&POINT).is_empty());
    }

    #[test]
    fn validator_filters_and_keeps_order() {
        let registry = ExtensionRegistry::new();
        registry
            .document(
                &POINT,
                "named things",
                |n: &Named| !n.identifier.is_empty(),
                DocOptions::default(),
            )
            .unwrap();
        for identifier in ["a", "", "c"] {
            registry.register(&POINT, Named { identifier }).unwrap();
        }
        assert_eq!(ids(&registry.extensions_for(&POINT)), vec!["a", "c"]);
        assert_eq!(registry.documentation()[0].registered, 2);
    }

    #[test]
    fn undocumented_points_return_everything() {
        let registry = ExtensionRegistry::new();
        registry.register(&POINT, Named { identifier: "" }).unwrap();
        registry.register(&POINT, Named { identifier: "b" }).unwrap();
        assert_eq!(registry.extensions_for(&POINT).len(), 2);
        assert_eq!(registry.extensions_for(&POINT).len(), 2);
    }

    #[test]
    fn usage_errors() {
        let registry = ExtensionRegistry::new();
        let empty: ExtensionPoint<Named> = ExtensionPoint::new("");
        assert_eq!(
            registry.register(&empty, Named { identifier: "x" }),
            Err(RegistryError::PointRequired)
        );
        assert_eq!(
            registry.unregister(&ExtensionId::from("")),
            Err(RegistryError::IdRequired)
        );
        assert_eq!(
            registry.unregister(&ExtensionId::from("pt-99")),
            Err(RegistryError::UnknownId("pt-99".into()))
        );
        assert_eq!(registry.unregister_all(&empty), Err(RegistryError::PointRequired));
        assert!(matches!(
            registry.document(&POINT, " ", |_: &Named| true, DocOptions::default()),
            Err(RegistryError::DescriptionRequired(_))
        ));
    }

    #[test]
    fn unregister_all_clears_entries_and_docs() {
        let registry = ExtensionRegistry::new();
        registry
            .document(&POINT, "d", |_: &Named| true, DocOptions::default())
            .unwrap();
        let id = registry.register(&POINT, Named { identifier: "a" }).unwrap();
        registry.unregister_all(&POINT).unwrap();
        assert!(registry.extensions_for(&POINT).is_empty());
        assert!(registry.documentation().is_empty());
        assert_eq!(
            registry.unregister(&id),
            Err(RegistryError::UnknownId(id.to_string()))
        );
    }

    #[test]
    fn ids_are_unique_across_clear() {
        let registry = ExtensionRegistry::new();
        let first = registry.register(&POINT, Named { identifier: "a" }).unwrap();
        registry.clear();
        let second = registry.register(&POINT, Named { identifier: "a" }).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.extensions_for(&POINT).len(), 1);
    }

    #[test]
    fn legacy_names_redirect_to_the_canonical_point() {
        let registry = ExtensionRegistry::new();
        let old: ExtensionPoint<Named> = ExtensionPoint::new("old.pt");
        registry.register(&old, Named { identifier: "early" }).unwrap();
        registry
            .document(
                &POINT,
                "renamed",
                |_: &Named| true,
                DocOptions {
                    url: None,
                    legacy_name: Some("old.pt".into()),
                },
            )
            .unwrap();
        registry.register(&old, Named { identifier: "late" }).unwrap();
        assert_eq!(registry.canonical_name("old.pt"), "pt");
        assert_eq!(ids(&registry.extensions_for(&POINT)), vec!["early", "late"]);
        assert_eq!(registry.extensions_for(&old).len(), 2);
    }

    #[test]
    fn validators_may_call_back_into_the_registry() {
        let registry = Arc::new(ExtensionRegistry::new());
        let weak = Arc::downgrade(&registry);
        registry
            .document(
                &POINT,
                "re-entrant validator",
                move |named: &Named| {
                    weak.upgrade()
                        .is_some_and(|registry| registry.canonical_name(named.identifier) == "ok")
                },
                DocOptions::default(),
            )
            .unwrap();
        registry.register(&POINT, Named { identifier: "ok" }).unwrap();
        registry.register(&POINT, Named { identifier: "no" }).unwrap();
        let listed = registry.documentation();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].registered, 1);
    }

    #[test]
    fn unregister_all_rearms_the_missing_docs_warning() {
        let registry = ExtensionRegistry::new();
        registry.register(&POINT, Named { identifier: "a" }).unwrap();
        registry.extensions_for(&POINT);
        assert!(registry.lock().warned.contains("pt"));
        registry.unregister_all(&POINT).unwrap();
        assert!(!registry.lock().warned.contains("pt"));
    }

    #[test]
    fn changes_are_broadcast() {
        let registry = ExtensionRegistry::new();
        let mut rx = registry.subscribe();
        let id = registry.register(&POINT, Named { identifier: "a" }).unwrap();
        registry.unregister(&id).unwrap();
        assert_eq!(rx.try_recv().unwrap().extension_point, "pt");
        assert_eq!(rx.try_recv().unwrap().extension_point, "pt");
        assert!(rx.try_recv().is_err());
    }
}
