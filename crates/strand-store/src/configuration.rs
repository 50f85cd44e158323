// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Screen metrics and server configuration slices.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strand_proto::Action;
use strand_transport::{AjaxRequest, Transport};

use crate::state::payload;
use crate::{Store, StoreError};

/// Sets the device pixel ratio.
pub const SCREEN_PIXEL_RATIO: &str = "SCREEN_PIXEL_RATIO";
/// Replaces configuration properties and messages.
pub const CONFIGURATION_UPDATE: &str = "CONFIGURATION_UPDATE";

/// Screen slice.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenState {
    /// Device pixel ratio of the main display.
    pub pixel_ratio: f64,
}

impl Default for ScreenState {
    fn default() -> Self {
        Self { pixel_ratio: 1.0 }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PixelRatio {
    pixel_ratio: f64,
}

impl ScreenState {
    pub(crate) fn reduce(&mut self, action: &Action) {
        if action.kind == SCREEN_PIXEL_RATIO {
            if let Some(PixelRatio { pixel_ratio }) = payload(action) {
                self.pixel_ratio = pixel_ratio;
            }
        }
    }
}

/// `SCREEN_PIXEL_RATIO` action.
pub fn set_pixel_ratio(pixel_ratio: f64) -> Action {
    Action::new(SCREEN_PIXEL_RATIO, json!({ "pixelRatio": pixel_ratio }))
}

/// Language/country/variant triple sent with configuration requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locale {
    /// ISO language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// ISO country code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Locale variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Configuration slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationState {
    /// Server properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Localized messages.
    #[serde(default)]
    pub messages: Map<String, Value>,
}

impl ConfigurationState {
    pub(crate) fn reduce(&mut self, action: &Action) {
        if action.kind == CONFIGURATION_UPDATE {
            if let Some(update) = payload::<Self>(action) {
                *self = update;
            }
        }
    }
}

/// Fetch configuration for `locale` and store it.
pub async fn get(
    store: &Store,
    transport: &dyn Transport,
    locale: Option<Locale>,
) -> Result<(), StoreError> {
    let fields = match locale.map(serde_json::to_value).transpose()? {
        Some(Value::Object(fields)) => fields,
        _ => Map::new(),
    };
    let body = transport
        .send(AjaxRequest::get("/configuration").with_fields(fields))
        .await?
        .into_json();
    store.dispatch(Action::new(
        CONFIGURATION_UPDATE,
        json!({
            "properties": body.get("properties").cloned().unwrap_or_else(|| json!({})),
            "messages": body.get("messages").cloned().unwrap_or_else(|| json!({})),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_ratio_defaults_to_one() {
        let mut screen = ScreenState::default();
        assert!((screen.pixel_ratio - 1.0).abs() < f64::EPSILON);
        screen.reduce(&set_pixel_ratio(2.0));
        assert!((screen.pixel_ratio - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn configuration_update_replaces_both_maps() {
        let mut config = ConfigurationState::default();
        config.reduce(&Action::new(
            CONFIGURATION_UPDATE,
            json!({"properties": {"a": "1"}, "messages": {"hello": "Hi"}}),
        ));
        assert_eq!(config.properties["a"], "1");
        assert_eq!(config.messages["hello"], "Hi");
    }
}
