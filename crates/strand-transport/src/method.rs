// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `METHOD` / `METHOD->HTML` parsing.

use std::fmt;
use std::str::FromStr;

use reqwest::Method;

use crate::AjaxError;

const HTML_SUFFIX: &str = "->HTML";

/// HTTP verb plus the response mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AjaxMethod {
    /// HTTP verb.
    pub verb: Method,
    /// Return the raw body text instead of parsed JSON.
    pub html: bool,
}

impl AjaxMethod {
    /// JSON-mode method.
    pub fn json(verb: Method) -> Self {
        Self { verb, html: false }
    }

    /// True for verbs whose parameters travel in the query string.
    pub fn uses_query(&self) -> bool {
        self.verb == Method::GET || self.verb == Method::DELETE
    }
}

impl FromStr for AjaxMethod {
    type Err = AjaxError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let upper = raw.trim().to_ascii_uppercase();
        let (verb, html) = match upper.strip_suffix(HTML_SUFFIX) {
            Some(verb) => (verb, true),
            None => (upper.as_str(), false),
        };
        if verb.is_empty() {
            return Err(AjaxError::Build(format!("missing HTTP method in {raw:?}")));
        }
        let verb = Method::from_bytes(verb.as_bytes())
            .map_err(|_| AjaxError::Build(format!("bad HTTP method {raw:?}")))?;
        Ok(Self { verb, html })
    }
}

impl fmt::Display for AjaxMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.html {
            write!(f, "{}{HTML_SUFFIX}", self.verb)
        } else {
            write!(f, "{}", self.verb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_suffix_switches_mode() {
        let method: AjaxMethod = "get->html".parse().unwrap();
        assert_eq!(method.verb, Method::GET);
        assert!(method.html);
        assert_eq!(method.to_string(), "GET->HTML");
    }

    #[test]
    fn plain_verbs_stay_json() {
        let method: AjaxMethod = "post".parse().unwrap();
        assert_eq!(method, AjaxMethod::json(Method::POST));
        assert!(!method.uses_query());
    }

    #[test]
    fn empty_method_is_rejected() {
        assert!(matches!("->HTML".parse::<AjaxMethod>(), Err(AjaxError::Build(_))));
    }
}
