// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Async commands the main thread can ask the worker to run.
//!
//! Commands travel as ordinary actions whose type is a dotted name
//! (`element.get`, `product.list`, …); reducer actions use SCREAMING_CASE.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strand_proto::Action;

use crate::configuration::Locale;
use crate::element::{DeleteElements, GetElements};
use crate::product::ElementSelection;
use crate::StoreError;

/// `element.setFocus` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusRequest {
    /// Ids to focus; empty clears the focus.
    #[serde(default)]
    pub element_ids: Vec<String>,
}

/// `product.list` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    /// Product to select once the list is loaded.
    #[serde(default)]
    pub initial_product_id: Option<String>,
}

/// Arguments naming one product.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    /// Target product.
    pub product_id: String,
    /// Refetch even when loaded (`product.get` only).
    #[serde(default)]
    pub invalidate: bool,
}

/// `product.select` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    /// Product to select; `None` picks the first one.
    #[serde(default)]
    pub product_id: Option<String>,
}

/// `product.updateTitle` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TitleRequest {
    /// Target product.
    pub product_id: String,
    /// New title.
    pub title: String,
}

/// `product.graph.setPositions` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionsRequest {
    /// Target product.
    pub product_id: String,
    /// Id → record with `pos` (and `type` for new entries).
    pub update_vertices: Map<String, Value>,
}

/// `product.graph.removeElements` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemovalRequest {
    /// Target product.
    pub product_id: String,
    /// What to remove.
    pub elements: ElementSelection,
}

/// `ontology.get` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OntologyRequest {
    /// Workspace; the current one when `None`.
    #[serde(default)]
    pub workspace_id: Option<String>,
}
/// `product.graph.collapseNodes` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollapseRequest {
    /// Target product.
    pub product_id: String,
    /// Entries to fold together.
    pub children: Vec<String>,
    /// Where the new node is drawn.
    pub pos: Value,
    /// Enclosing node; top level when absent.
    #[serde(default)]
    pub parent: Option<String>,
}

/// `product.graph.uncollapseNodes` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UncollapseRequest {
    /// Target product.
    pub product_id: String,
    /// Compound node to dissolve.
    pub collapsed_node_id: String,
}

/// `product.graph.snapToGrid` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapRequest {
    /// Target product; the selected one when absent.
    #[serde(default)]
    pub product_id: Option<String>,
}

/// `product.graph.dropElements` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DropRequest {
    /// Target product.
    pub product_id: String,
    /// Dropped vertices and edges.
    pub elements: ElementSelection,
    /// Drop point `{x, y}`; below the existing vertices when absent.
    #[serde(default)]
    pub position: Option<DropPosition>,
}

/// Drop point of a [`DropRequest`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DropPosition {
    /// Horizontal coordinate.
    pub x: i64,
    /// Vertical coordinate.
    pub y: i64,
}

/// `product.graph.addRelated` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelatedRequest {
    /// Target product.
    pub product_id: String,
    /// Full vertex records to add.
    pub vertices: Vec<Value>,
}

/// `configuration.get` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationRequest {
    /// Locale for messages.
    #[serde(default)]
    pub locale: Option<Locale>,
}

/// A worker command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    /// Load elements into the cache.
    #[serde(rename = "element.get")]
    ElementGet(GetElements),
    /// Refetch an element after a server property change.
    #[serde(rename = "element.propertyChange")]
    ElementPropertyChange(Value),
    /// Confirm and tombstone deleted elements.
    #[serde(rename = "element.deleteElements")]
    ElementDelete(DeleteElements),
    /// Debounced focus change.
    #[serde(rename = "element.setFocus")]
    ElementFocus(FocusRequest),
    /// Cache search hits.
    #[serde(rename = "element.putSearchResults")]
    SearchResults(Vec<Value>),
    /// Load the product list.
    #[serde(rename = "product.list")]
    ProductList(ListRequest),
    /// Load one product.
    #[serde(rename = "product.get")]
    ProductGet(ProductRequest),
    /// Server changed a product.
    #[serde(rename = "product.changedOnServer")]
    ProductChanged(ProductRequest),
    /// Select a product.
    #[serde(rename = "product.select")]
    ProductSelect(SelectRequest),
    /// Rename a product.
    #[serde(rename = "product.updateTitle")]
    ProductUpdateTitle(TitleRequest),
    /// Server deleted a product.
    #[serde(rename = "product.remove")]
    ProductRemove(ProductRequest),
    /// Move graph entries (undoable).
    #[serde(rename = "product.graph.setPositions")]
    GraphSetPositions(PositionsRequest),
    /// Remove graph entries (undoable).
    #[serde(rename = "product.graph.removeElements")]
    GraphRemoveElements(RemovalRequest),
    /// Fold graph entries into a compound node (undoable).
    #[serde(rename = "product.graph.collapseNodes")]
    GraphCollapse(CollapseRequest),
    /// Dissolve a compound node (undoable).
    #[serde(rename = "product.graph.uncollapseNodes")]
    GraphUncollapse(UncollapseRequest),
    /// Snap every vertex to the grid (undoable).
    #[serde(rename = "product.graph.snapToGrid")]
    GraphSnapToGrid(SnapRequest),
    /// Lay out dropped elements on a product.
    #[serde(rename = "product.graph.dropElements")]
    GraphDropElements(DropRequest),
    /// Add related vertices below the existing ones.
    #[serde(rename = "product.graph.addRelated")]
    GraphAddRelated(RelatedRequest),
    /// Load an ontology.
    #[serde(rename = "ontology.get")]
    OntologyGet(OntologyRequest),
    /// Load configuration.
    #[serde(rename = "configuration.get")]
    ConfigurationGet(ConfigurationRequest),
}

/// True for dotted command types.
pub fn is_command_type(kind: &str) -> bool {
    kind.contains('.')
}

impl Command {
    /// Decode `action` as a command. `None` for reducer actions.
    pub fn from_action(action: &Action) -> Option<Result<Self, StoreError>> {
        if !is_command_type(&action.kind) {
            return None;
        }
        let framed = serde_json::json!({ "type": action.kind, "payload": action.payload });
        Some(serde_json::from_value(framed).map_err(|err| StoreError::invalid(&action.kind, err)))
    }

    /// Encode as an action for the worker channel.
    pub fn into_action(self) -> Result<Action, StoreError> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}
