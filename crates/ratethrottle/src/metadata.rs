//! The typed metadata bag passed alongside an identifier on `Check`.

use std::collections::HashMap;

/// Request-scoped context supplied by the caller of `Check`.
///
/// Kept as an enumerated, typed set rather than a free-form map: the scope
/// resolver and traffic analyzer recognize `endpoint`, `method`, `user_id`,
/// and `api_key` directly; anything else goes in `custom` and is passed
/// through opaquely to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metadata {
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub custom: HashMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}
