//! Typed wire payloads
//!
//! Shapes for the initialize handshake, session lifecycle, and tool
//! discovery. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Browser engine the worker should drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    /// Chromium (default)
    Chromium,
    /// Firefox
    Firefox,
    /// WebKit
    Webkit,
}

impl Default for BrowserEngine {
    fn default() -> Self {
        Self::Chromium
    }
}

/// How the worker captures page snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    /// Accessibility-tree snapshots (default)
    Aria,
    /// Raw DOM snapshots
    Dom,
}

impl Default for SnapshotMode {
    fn default() -> Self {
        Self::Aria
    }
}

/// Browser configuration sent in the initialize handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Engine choice
    #[serde(default)]
    pub engine: BrowserEngine,
    /// Snapshot capture mode
    #[serde(default)]
    pub snapshot_mode: SnapshotMode,
    /// Whether accessibility-tree features are enabled
    #[serde(default = "default_true")]
    pub aria_enabled: bool,
    /// Whether selector fallback resolution is enabled
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::default(),
            snapshot_mode: SnapshotMode::default(),
            aria_enabled: true,
            fallback_enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version
    pub protocol_version: String,
    /// Client capabilities
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client info
    pub client_info: ClientInfo,
    /// Browser configuration for this session
    pub browser_config: BrowserConfig,
}

/// Client capability flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Tool-related capabilities
    #[serde(default)]
    pub tools: Option<HashMap<String, Value>>,
}

/// Client information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "drover".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Initialize response
///
/// Lenient on purpose: the handshake only has to succeed, the worker's
/// self-description is informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the worker speaks
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Worker capabilities
    #[serde(default)]
    pub capabilities: Option<Value>,
    /// Worker info
    #[serde(default)]
    pub server_info: Option<WorkerInfo>,
}

/// Worker self-identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Worker name
    pub name: String,
    /// Worker version
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for `browser/createContext`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContextParams {
    /// Whether to record video for this run
    pub video: bool,
    /// Identifier of the test run owning the context
    pub run_id: String,
}

/// Tool definition returned by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: Option<String>,
    /// Input schema (JSON Schema)
    #[serde(default)]
    pub input_schema: Value,
}

/// Result shape of `tools/list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolListing {
    /// Tools the worker exposes
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_params_wire_shape() {
        let params = InitializeParams {
            protocol_version: crate::protocol::PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
            browser_config: BrowserConfig::default(),
        };

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"protocolVersion\""));
        assert!(json.contains("\"clientInfo\""));
        assert!(json.contains("\"browserConfig\""));
        assert!(json.contains("\"snapshotMode\":\"aria\""));
        assert!(json.contains("\"ariaEnabled\":true"));
        assert!(json.contains("\"engine\":\"chromium\""));
    }

    #[test]
    fn test_create_context_params() {
        let params = CreateContextParams {
            video: false,
            run_id: "run-42".to_string(),
        };

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"video\":false"));
        assert!(json.contains("\"runId\":\"run-42\""));
    }

    #[test]
    fn test_initialize_result_is_lenient() {
        let parsed: InitializeResult = serde_json::from_str("{}").unwrap();
        assert!(parsed.protocol_version.is_none());

        let parsed: InitializeResult = serde_json::from_str(
            r#"{"protocolVersion":"2024-11-05","serverInfo":{"name":"browser-worker"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.server_info.unwrap().name, "browser-worker");
    }

    #[test]
    fn test_tool_listing_parse() {
        let json = r#"{"tools":[{"name":"navigate","description":"Open a URL","inputSchema":{"type":"object"}},{"name":"click"}]}"#;
        let listing: ToolListing = serde_json::from_str(json).unwrap();

        assert_eq!(listing.tools.len(), 2);
        assert_eq!(listing.tools[0].name, "navigate");
        assert!(listing.tools[1].description.is_none());
    }
}
