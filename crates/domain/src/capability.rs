//! Provider capability resolution.
//!
//! Effective capabilities are `defaults(family) ⊕ profile hints ⊕ adapter
//! override`, resolved once when a profile is bound to an adapter.

use serde::{Deserialize, Serialize};

/// Provider families with known capability defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Openai,
    Anthropic,
    Local,
    #[default]
    Unknown,
}

/// Resolved capability set for one provider binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub native_tool_calls: bool,
    pub streaming: bool,
    pub vision: bool,
}

impl Capabilities {
    pub fn defaults(family: ProviderFamily) -> Self {
        match family {
            ProviderFamily::Openai | ProviderFamily::Anthropic => Self {
                native_tool_calls: true,
                streaming: true,
                vision: true,
            },
            ProviderFamily::Local => Self {
                native_tool_calls: false,
                streaming: true,
                vision: false,
            },
            ProviderFamily::Unknown => Self {
                native_tool_calls: false,
                streaming: false,
                vision: false,
            },
        }
    }
}

/// Per-profile capability hints layered over the family defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision: Option<bool>,
}

/// Resolve the effective capability set.
///
/// `adapter_override` is the adapter's own `supports_native_tool_calls`
/// claim; when present it wins over both defaults and hints.
pub fn resolve(
    family: ProviderFamily,
    hints: Option<&CapabilityHints>,
    adapter_override: Option<bool>,
) -> Capabilities {
    let mut caps = Capabilities::defaults(family);
    if let Some(h) = hints {
        if let Some(v) = h.native_tool_calls {
            caps.native_tool_calls = v;
        }
        if let Some(v) = h.streaming {
            caps.streaming = v;
        }
        if let Some(v) = h.vision {
            caps.vision = v;
        }
    }
    if let Some(v) = adapter_override {
        caps.native_tool_calls = v;
    }
    caps
}
