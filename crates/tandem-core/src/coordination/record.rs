//! Coordination record model
//!
//! One `CoordinationRecord` per agent. The same record travels as a JSON
//! document (file transport) and as flat TXT attributes (discovery).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoordinationError;

pub const TXT_AGENT_ID: &str = "agent_id";
pub const TXT_STATUS: &str = "status";
pub const TXT_TASK: &str = "task";
pub const TXT_ACTION: &str = "action";
pub const TXT_UPDATED: &str = "updated";
pub const TXT_MESSAGE: &str = "msg";

/// A TXT entry is a length-prefixed `key=value` string; the prefix is one byte.
pub const MAX_TXT_ENTRY_LEN: usize = 255;

/// Reject attribute sets that cannot be encoded as TXT entries.
pub fn check_txt_entries(props: &HashMap<String, String>) -> Result<(), CoordinationError> {
    for (key, value) in props {
        let len = key.len() + 1 + value.len();
        if len > MAX_TXT_ENTRY_LEN {
            return Err(CoordinationError::Transport(format!(
                "TXT entry '{}' is {} bytes, limit is {}",
                key, len, MAX_TXT_ENTRY_LEN
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Working,
    Done,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Done => "done",
            AgentStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "done" => Ok(AgentStatus::Done),
            "stopped" => Ok(AgentStatus::Stopped),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// A short note one agent leaves for its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub from: String,
    pub content: String,
    pub time: DateTime<Utc>,
}

/// The status payload an agent publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationRecord {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub message: Option<PeerMessage>,
    pub updated_at: DateTime<Utc>,
}

impl CoordinationRecord {
    /// New record stamped with the current time.
    pub fn new(
        agent_id: impl Into<String>,
        status: AgentStatus,
        task: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            task: task.into(),
            action: action.into(),
            message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, content: impl Into<String>) -> Self {
        self.message = Some(PeerMessage {
            from: self.agent_id.clone(),
            content: content.into(),
            time: Utc::now(),
        });
        self
    }

    /// Flat TXT attributes for a service advertisement. Fails when any entry
    /// is too long to encode.
    pub fn to_txt_properties(&self) -> Result<HashMap<String, String>, CoordinationError> {
        let mut props = HashMap::from([
            (TXT_AGENT_ID.to_string(), self.agent_id.clone()),
            (TXT_STATUS.to_string(), self.status.to_string()),
            (TXT_TASK.to_string(), self.task.clone()),
            (TXT_ACTION.to_string(), self.action.clone()),
            (
                TXT_UPDATED.to_string(),
                self.updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
        ]);
        if let Some(message) = &self.message {
            props.insert(TXT_MESSAGE.to_string(), serde_json::to_string(message)?);
        }
        check_txt_entries(&props)?;
        Ok(props)
    }

    /// Decode TXT attributes. `source_name` only labels the error.
    pub fn from_txt_properties(
        props: &HashMap<String, String>,
        source_name: &str,
    ) -> Result<Self, CoordinationError> {
        let malformed = |reason: String| CoordinationError::MalformedRecord {
            source_name: source_name.to_string(),
            reason,
        };
        let required = |key: &str| {
            props
                .get(key)
                .cloned()
                .ok_or_else(|| malformed(format!("missing '{}' attribute", key)))
        };

        let agent_id = required(TXT_AGENT_ID)?;
        if agent_id.is_empty() {
            return Err(malformed("empty agent_id".to_string()));
        }
        let status = required(TXT_STATUS)?.parse().map_err(malformed)?;
        let updated_at = DateTime::parse_from_rfc3339(&required(TXT_UPDATED)?)
            .map_err(|e| malformed(format!("bad timestamp: {}", e)))?
            .with_timezone(&Utc);
        let message = props
            .get(TXT_MESSAGE)
            .filter(|raw| !raw.is_empty())
            .map(|raw| serde_json::from_str::<PeerMessage>(raw))
            .transpose()
            .map_err(|e| malformed(format!("bad msg attribute: {}", e)))?;

        Ok(Self {
            agent_id,
            status,
            task: props.get(TXT_TASK).cloned().unwrap_or_default(),
            action: props.get(TXT_ACTION).cloned().unwrap_or_default(),
            message,
            updated_at,
        })
    }
}

/// Where a discovered peer was advertised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceMeta {
    pub service_name: String,
    pub host: String,
    pub port: u16,
}

/// Observer-side view of a peer. File-sourced peers carry no service metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    #[serde(flatten)]
    pub record: CoordinationRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceMeta>,
}

/// Human-authored, non-JSON file found in the status directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusNote {
    pub file: String,
    pub content: String,
}

/// Result of one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub peers: Vec<PeerRecord>,
    pub notes: Vec<StatusNote>,
}

impl PeerSnapshot {
    pub fn agent_ids(&self) -> Vec<&str> {
        self.peers.iter().map(|p| p.record.agent_id.as_str()).collect()
    }

    pub fn find(&self, agent_id: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.record.agent_id == agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_attributes_decode_to_the_same_record() {
        let record = CoordinationRecord::new("a", AgentStatus::Working, "refactor", "editing lib.rs")
            .with_message("taking src/agent");

        let props = record.to_txt_properties().unwrap();
        assert_eq!(props["status"], "working");
        assert!(props["msg"].contains("taking src/agent"));

        let decoded = CoordinationRecord::from_txt_properties(&props, "a._tandem-agent").unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn oversized_txt_entry_is_rejected() {
        let record = CoordinationRecord::new("a", AgentStatus::Working, "", "")
            .with_message("x".repeat(300));
        let err = record.to_txt_properties().unwrap_err();
        assert!(matches!(err, CoordinationError::Transport(_)));

        let record = CoordinationRecord::new("a", AgentStatus::Working, "t".repeat(250), "");
        assert!(record.to_txt_properties().is_ok());
        let record = CoordinationRecord::new("a", AgentStatus::Working, "t".repeat(251), "");
        assert!(record.to_txt_properties().is_err());
    }

    #[test]
    fn incomplete_txt_attributes_are_malformed() {
        let props = HashMap::from([
            ("agent_id".to_string(), "b".to_string()),
            ("status".to_string(), "sleeping".to_string()),
            ("updated".to_string(), "2026-01-01T00:00:00Z".to_string()),
        ]);
        let err = CoordinationRecord::from_txt_properties(&props, "b").unwrap_err();
        assert!(matches!(err, CoordinationError::MalformedRecord { .. }));

        let props = HashMap::from([("agent_id".to_string(), "b".to_string())]);
        assert!(CoordinationRecord::from_txt_properties(&props, "b").is_err());
    }

    #[test]
    fn json_document_uses_documented_field_names() {
        let record = CoordinationRecord::new("a", AgentStatus::Idle, "", "");
        let value = serde_json::to_value(&record).unwrap();
        for key in ["agent_id", "status", "task", "action", "message", "updated_at"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["status"], "idle");
    }
}
