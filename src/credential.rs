//! Credential gate guarding every form and generation route.
//!
//! Two flows exist: an interactive one where the key is selected at runtime
//! through `connect`, and an environment one where the key comes from process
//! configuration and can only be fixed externally.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    Interactive,
    Environment,
}

impl CredentialMode {
    pub fn is_interactive(&self) -> bool {
        matches!(self, CredentialMode::Interactive)
    }
}

impl std::str::FromStr for CredentialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(CredentialMode::Interactive),
            "environment" | "env" => Ok(CredentialMode::Environment),
            other => Err(format!("unknown credential mode '{other}' (expected 'interactive' or 'environment')")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Locked,
    Unlocked,
}

#[derive(Debug, Error, PartialEq)]
pub enum CredentialError {
    #[error("interactive key selection is not available; configure GEMINI_API_KEY instead")]
    NotInteractive,
    #[error("API key must not be empty")]
    EmptyKey,
}

/// Holds the key the Gemini client sends with each call.
#[derive(Debug, Default)]
pub struct KeyStore {
    key: RwLock<Option<String>>,
}

impl KeyStore {
    pub fn with_key(key: Option<String>) -> Self {
        let key = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        Self { key: RwLock::new(key) }
    }

    pub fn has_selected_key(&self) -> bool {
        self.key.read().is_some()
    }

    pub fn select(&self, key: &str) -> Result<(), CredentialError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CredentialError::EmptyKey);
        }
        *self.key.write() = Some(key.to_string());
        Ok(())
    }

    pub fn current(&self) -> Option<String> {
        self.key.read().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateView {
    pub state: GateState,
    pub mode: CredentialMode,
    pub connect_available: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
}

pub struct CredentialGate {
    mode: CredentialMode,
    state: RwLock<GateState>,
    keys: std::sync::Arc<KeyStore>,
}

impl CredentialGate {
    pub fn initialize(mode: CredentialMode, keys: std::sync::Arc<KeyStore>) -> Self {
        let state = if keys.has_selected_key() { GateState::Unlocked } else { GateState::Locked };
        match (mode, state) {
            (_, GateState::Unlocked) => info!("🔑 Credential gate unlocked ({:?} key present)", mode),
            (CredentialMode::Interactive, GateState::Locked) => info!("🔒 No key selected yet; waiting for connect"),
            (CredentialMode::Environment, GateState::Locked) => warn!("🔒 GEMINI_API_KEY is not set; all generation routes are locked"),
        }
        Self { mode, state: RwLock::new(state), keys }
    }

    pub fn mode(&self) -> CredentialMode {
        self.mode
    }

    pub fn state(&self) -> GateState {
        *self.state.read()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == GateState::Unlocked
    }

    pub fn connect(&self, key: &str) -> Result<GateState, CredentialError> {
        if !self.mode.is_interactive() {
            return Err(CredentialError::NotInteractive);
        }
        self.keys.select(key)?;
        *self.state.write() = GateState::Unlocked;
        info!("🔓 API key selected, gate unlocked");
        Ok(GateState::Unlocked)
    }

    /// Records a state computed by the submission failure handler.
    pub fn apply(&self, state: GateState) {
        let mut current = self.state.write();
        if *current != state {
            warn!("🔐 Credential gate {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub fn view(&self) -> GateView {
        let state = self.state();
        let instructions = match (self.mode, state) {
            (CredentialMode::Environment, GateState::Locked) => vec![
                "未检测到 API Key".to_string(),
                "请在部署环境中设置环境变量：".to_string(),
                "Key: GEMINI_API_KEY".to_string(),
                "Value: 您的 Gemini API Key".to_string(),
            ],
            _ => Vec::new(),
        };
        GateView {
            state,
            mode: self.mode,
            connect_available: self.mode.is_interactive(),
            instructions,
        }
    }
}
