//! Wire types and validation shared by loadoutd and its UI surface clients.
//!
//! The daemon remains the authority on validation, but surfaces reuse the
//! same types to construct valid requests and decode push events, which
//! keeps the schema from drifting between the dashboard and the overlay.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Discrete stage of a match/session as reported by the game client.
///
/// The client may report phase strings this build has never heard of;
/// those classify as [`PhaseState::None`] rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    None,
    Lobby,
    Matchmaking,
    ReadyCheck,
    ChampSelect,
    GameStart,
    InProgress,
    Reconnect,
    WaitingForStats,
    PreEndOfGame,
    EndOfGame,
}

impl PhaseState {
    pub fn from_client_str(value: &str) -> Self {
        match value {
            "Lobby" => PhaseState::Lobby,
            "Matchmaking" => PhaseState::Matchmaking,
            "ReadyCheck" => PhaseState::ReadyCheck,
            "ChampSelect" => PhaseState::ChampSelect,
            "GameStart" => PhaseState::GameStart,
            "InProgress" => PhaseState::InProgress,
            "Reconnect" => PhaseState::Reconnect,
            "WaitingForStats" => PhaseState::WaitingForStats,
            "PreEndOfGame" => PhaseState::PreEndOfGame,
            "EndOfGame" => PhaseState::EndOfGame,
            // "None" and anything from client versions newer than us.
            _ => PhaseState::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseState::None => "None",
            PhaseState::Lobby => "Lobby",
            PhaseState::Matchmaking => "Matchmaking",
            PhaseState::ReadyCheck => "ReadyCheck",
            PhaseState::ChampSelect => "ChampSelect",
            PhaseState::GameStart => "GameStart",
            PhaseState::InProgress => "InProgress",
            PhaseState::Reconnect => "Reconnect",
            PhaseState::WaitingForStats => "WaitingForStats",
            PhaseState::PreEndOfGame => "PreEndOfGame",
            PhaseState::EndOfGame => "EndOfGame",
        }
    }
}

/// Immutable snapshot of the tracked client state.
///
/// Produced only by the status tracker; surfaces hold read-only copies and
/// are superseded by the next snapshot, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameContext {
    pub phase: PhaseState,
    pub connected: bool,
    pub mode_id: String,
    pub is_supported_mode: bool,
}

impl GameContext {
    /// Sentinel shown while the game client is unreachable, regardless of
    /// the last phase seen before the disconnect.
    pub fn offline() -> Self {
        GameContext {
            phase: PhaseState::None,
            connected: false,
            mode_id: String::new(),
            is_supported_mode: false,
        }
    }
}

/// Composite key identifying one cached build artifact.
/// All three components are required and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildKey {
    pub game_mode_id: String,
    pub champion_id: String,
    pub patch_version: String,
}

impl BuildKey {
    pub fn new(
        game_mode_id: impl Into<String>,
        champion_id: impl Into<String>,
        patch_version: impl Into<String>,
    ) -> Self {
        BuildKey {
            game_mode_id: game_mode_id.into(),
            champion_id: champion_id.into(),
            patch_version: patch_version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synergy {
    pub champion_id: String,
    pub score: f64,
}

/// Computed recommendation for a champion in a given mode/patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BuildResult {
    pub item_ids: Vec<u32>,
    pub skill_order: Vec<String>,
    pub summoner_spell_ids: Vec<u32>,
    #[serde(default)]
    pub synergies: Vec<Synergy>,
}

/// State delta pushed from the daemon to every attached surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    StatusChanged {
        context: GameContext,
    },
    BuildReady {
        key: BuildKey,
        build: BuildResult,
    },
    CacheCleared {
        game_mode_id: String,
        removed: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Main,
    Overlay,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    AdapterEvent,
    GetStatus,
    ResolveBuild,
    ClearCache,
    SetOverlayVisible,
    SetInteractive,
    CycleDisplayMode,
    Subscribe,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub surface: Option<Surface>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// One connection/phase event from the external game-client adapter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterEvent {
    pub recorded_at: String,
    pub connected: bool,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub mode_id: Option<String>,
}

impl AdapterEvent {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }

        if self.connected {
            match self.phase.as_deref() {
                Some(phase) if !phase.trim().is_empty() => {}
                _ => {
                    return Err(ErrorInfo::new(
                        "missing_field",
                        "phase is required while connected",
                    ))
                }
            }
        }

        Ok(())
    }
}

pub fn parse_adapter_event(params: Value) -> Result<AdapterEvent, ErrorInfo> {
    let event: AdapterEvent = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("adapter event payload is invalid: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveParams {
    pub game_mode_id: String,
    pub champion_id: String,
}

pub fn parse_resolve_params(params: Value) -> Result<ResolveParams, ErrorInfo> {
    let parsed: ResolveParams = serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("resolve params: {}", err)))?;
    if parsed.game_mode_id.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "game_mode_id is required"));
    }
    if parsed.champion_id.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "champion_id is required"));
    }
    Ok(parsed)
}

pub fn parse_mode_param(params: Value) -> Result<String, ErrorInfo> {
    let mode = params
        .get("game_mode_id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if mode.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "game_mode_id is required"));
    }
    Ok(mode)
}

pub fn parse_bool_param(params: Value, field: &str) -> Result<bool, ErrorInfo> {
    params
        .get(field)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ErrorInfo::new("missing_field", format!("{} is required", field)))
}
