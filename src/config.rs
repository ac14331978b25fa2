//! Which parts of the EME surface to spy on.

use serde::{Deserialize, Serialize};

/// Configuration for which spies `start` installs.
/// Every spy is enabled by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpyConfig {
    /// `MediaKeys` constructor and instance methods.
    pub media_keys: bool,
    /// `MediaKeySession` constructor, properties and methods.
    pub media_key_session: bool,
    /// `MediaKeySystemAccess` constructor, properties and methods.
    pub media_key_system_access: bool,
    /// `navigator.requestMediaKeySystemAccess`.
    pub request_media_key_system_access: bool,
    /// `HTMLMediaElement.prototype.setMediaKeys`.
    pub set_media_keys: bool,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            media_keys: true,
            media_key_session: true,
            media_key_system_access: true,
            request_media_key_system_access: true,
            set_media_keys: true,
        }
    }
}

impl SpyConfig {
    /// A configuration with every spy disabled, to opt in selectively.
    pub fn none() -> Self {
        Self {
            media_keys: false,
            media_key_session: false,
            media_key_system_access: false,
            request_media_key_system_access: false,
            set_media_keys: false,
        }
    }
}
