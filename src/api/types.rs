//! Request/response types for the status read surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    /// Cadence of the uptime job, for operators checking wiring.
    pub cron: String,
}

/// `?refresh=1` bypasses the response cache.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    pub refresh: Option<String>,
}

impl RefreshQuery {
    pub fn wants_refresh(&self) -> bool {
        matches!(self.refresh.as_deref(), Some("1") | Some("true"))
    }
}

/// `?ids=a,b,c` batch selector.
#[derive(Debug, Default, Deserialize)]
pub struct BatchQuery {
    pub ids: Option<String>,
}

impl BatchQuery {
    /// Comma-separated ids, trimmed, empties dropped.
    pub fn id_list(&self) -> Vec<String> {
        self.ids
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
