//! Shared-directory coordination
//!
//! One `<agent_id>.json` per agent. Writes go to a hidden temp file in the
//! same directory and are renamed into place, so readers see either the old
//! or the new document. Hidden files are never read back.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use super::record::{CoordinationRecord, PeerRecord, PeerSnapshot, StatusNote};
use super::{CoordinationTransport, PublishOutcome, QueryOptions, TransportKind};
use crate::error::CoordinationError;

pub struct FileTransport {
    status_dir: PathBuf,
}

impl FileTransport {
    pub fn new(status_dir: impl Into<PathBuf>) -> Self {
        Self {
            status_dir: status_dir.into(),
        }
    }

    pub fn status_dir(&self) -> &Path {
        &self.status_dir
    }

    /// Path of the document for `agent_id`.
    pub fn record_path(&self, agent_id: &str) -> PathBuf {
        self.status_dir
            .join(format!("{}.json", encode_file_stem(agent_id)))
    }

    /// Query an explicit directory, ignoring the configured one.
    pub async fn query_dir(&self, dir: &Path) -> Result<PeerSnapshot, CoordinationError> {
        let mut snapshot = PeerSnapshot::default();

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Status directory does not exist yet");
                return Ok(snapshot);
            }
            Err(e) => return Err(io_error(dir, e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') || !path.is_file() {
                continue;
            }
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);

            match extension.as_deref() {
                Some("json") => match read_record(&path, &file_name).await {
                    Ok(record) => snapshot.peers.push(PeerRecord {
                        record,
                        service: None,
                    }),
                    Err(e) => warn!(error = %e, "Skipping status document"),
                },
                // Any other extension is a human-written note; unreadable text is skipped
                Some(_) => {
                    match fs::read_to_string(&path).await {
                        Ok(content) => snapshot.notes.push(StatusNote {
                            file: file_name,
                            content,
                        }),
                        Err(e) => warn!(file = %file_name, error = %e, "Skipping status note"),
                    }
                }
                None => {}
            }
        }

        snapshot
            .peers
            .sort_by(|a, b| a.record.agent_id.cmp(&b.record.agent_id));
        snapshot.notes.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(snapshot)
    }
}

#[async_trait]
impl CoordinationTransport for FileTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::File
    }

    async fn publish(
        &self,
        record: &CoordinationRecord,
    ) -> Result<PublishOutcome, CoordinationError> {
        if record.agent_id.trim().is_empty() {
            return Err(CoordinationError::InvalidRecord(
                "agent_id must not be empty".to_string(),
            ));
        }

        fs::create_dir_all(&self.status_dir)
            .await
            .map_err(|e| io_error(&self.status_dir, e))?;

        let target = self.record_path(&record.agent_id);
        let temp = self.status_dir.join(format!(
            ".{}.{}.tmp",
            encode_file_stem(&record.agent_id),
            uuid::Uuid::new_v4().simple()
        ));

        let body = serde_json::to_vec_pretty(record)?;
        if let Err(e) = fs::write(&temp, &body).await {
            return Err(io_error(&temp, e));
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_error(&target, e));
        }

        info!(
            agent_id = %record.agent_id,
            status = %record.status,
            path = %target.display(),
            "Published status record"
        );
        Ok(PublishOutcome::File { path: target })
    }

    async fn query(&self, opts: &QueryOptions) -> Result<PeerSnapshot, CoordinationError> {
        let dir = opts.dir.as_deref().unwrap_or(&self.status_dir);
        self.query_dir(dir).await
    }
}

async fn read_record(path: &Path, file_name: &str) -> Result<CoordinationRecord, CoordinationError> {
    let raw = fs::read(path).await.map_err(|e| io_error(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| CoordinationError::MalformedRecord {
        source_name: file_name.to_string(),
        reason: e.to_string(),
    })
}

fn io_error(path: &Path, source: std::io::Error) -> CoordinationError {
    CoordinationError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Map an agent id to a file stem. Bytes outside `[A-Za-z0-9._-]` (so `%`
/// too) and a leading dot are percent-encoded; distinct ids never share a
/// file and no record is hidden.
pub fn encode_file_stem(agent_id: &str) -> String {
    let mut stem = String::with_capacity(agent_id.len());
    for (i, byte) in agent_id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_')
            || (byte == b'.' && i > 0);
        if keep {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::record::AgentStatus;
    use std::time::Duration;

    fn opts() -> QueryOptions {
        QueryOptions::new(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn publish_then_query_returns_the_same_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());
        let record = CoordinationRecord::new("a", AgentStatus::Working, "parser", "writing tests")
            .with_message("leave lexer.rs to me");

        transport.publish(&record).await.unwrap();
        let snapshot = transport.query(&opts()).await.unwrap();

        assert_eq!(snapshot.peers.len(), 1);
        assert_eq!(snapshot.peers[0].record, record);
        assert!(snapshot.peers[0].service.is_none());
    }

    #[tokio::test]
    async fn republishing_replaces_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());

        transport
            .publish(&CoordinationRecord::new("a", AgentStatus::Working, "t", "first"))
            .await
            .unwrap();
        let second = CoordinationRecord::new("a", AgentStatus::Done, "t", "second");
        transport.publish(&second).await.unwrap();

        let snapshot = transport.query(&opts()).await.unwrap();
        assert_eq!(snapshot.peers.len(), 1);
        assert_eq!(snapshot.peers[0].record.status, AgentStatus::Done);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn malformed_documents_are_skipped_and_notes_surface() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());
        transport
            .publish(&CoordinationRecord::new("a", AgentStatus::Idle, "", ""))
            .await
            .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{\"agent_id\": ").unwrap();
        std::fs::write(dir.path().join("handoff.md"), "b: please review the lexer").unwrap();
        std::fs::write(dir.path().join("garbage.bin"), [0xffu8, 0xfe, 0x00]).unwrap();
        std::fs::write(dir.path().join("README"), "no extension").unwrap();
        std::fs::write(dir.path().join("standup.log"), "c: blocked on CI").unwrap();

        let snapshot = transport.query(&opts()).await.unwrap();
        assert_eq!(snapshot.agent_ids(), vec!["a"]);
        assert_eq!(
            snapshot.notes,
            vec![
                StatusNote {
                    file: "handoff.md".to_string(),
                    content: "b: please review the lexer".to_string(),
                },
                StatusNote {
                    file: "standup.log".to_string(),
                    content: "c: blocked on CI".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_directory_is_an_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path().join("not-yet"));
        let snapshot = transport.query(&opts()).await.unwrap();
        assert_eq!(snapshot, PeerSnapshot::default());
    }

    #[tokio::test]
    async fn query_honours_directory_override() {
        let mine = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        FileTransport::new(other.path())
            .publish(&CoordinationRecord::new("z", AgentStatus::Stopped, "", ""))
            .await
            .unwrap();

        let transport = FileTransport::new(mine.path());
        let snapshot = transport
            .query(&opts().with_dir(other.path()))
            .await
            .unwrap();
        assert_eq!(snapshot.agent_ids(), vec!["z"]);
    }

    #[tokio::test]
    async fn empty_agent_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileTransport::new(dir.path())
            .publish(&CoordinationRecord::new("  ", AgentStatus::Idle, "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidRecord(_)));
    }

    #[test]
    fn file_stems_are_distinct_per_id() {
        assert_eq!(encode_file_stem("team/a b"), "team%2Fa%20b");
        assert_eq!(encode_file_stem(".hidden"), "%2Ehidden");
        assert_eq!(encode_file_stem("agent-1.v2"), "agent-1.v2");
        assert_eq!(encode_file_stem("100%"), "100%25");
        assert_eq!(encode_file_stem("é"), "%C3%A9");
        assert_ne!(encode_file_stem("team/a"), encode_file_stem("team_a"));
        assert_ne!(encode_file_stem("a%2F"), encode_file_stem("a/"));
    }

    #[tokio::test]
    async fn similar_ids_keep_separate_records() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());
        for id in ["team/a", "team_a", "team a"] {
            transport
                .publish(&CoordinationRecord::new(id, AgentStatus::Working, "", ""))
                .await
                .unwrap();
        }

        let snapshot = transport.query(&opts()).await.unwrap();
        assert_eq!(snapshot.agent_ids(), vec!["team a", "team/a", "team_a"]);
    }
}
