use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

/// One line of the stdin protocol.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Session state owned by the main loop: the selected workspace and its open
/// database.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
