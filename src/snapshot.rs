use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::board::Workspace;
use crate::codec::{
    CodecError, CodecFormat, DeserializeOptions, SerializeOptions, StateCodec,
};
use crate::engine::history::MutationRecord;

/// Workspace snapshot file inside the data directory.
pub const SNAPSHOT_FILE: &str = "state.rbn";

/// The whole persisted state tree: the workspace plus the undo stack, so
/// a reopened session can still revert the last moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub workspace: Workspace,
    #[serde(default)]
    pub undo: Vec<MutationRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Serialize the state tree through the codec and write it to disk.
///
/// The write goes through a sibling temp file and a rename, so a crash
/// mid-write never leaves a half-written snapshot behind.
pub fn save_state(
    dir: &Path,
    state: &PersistedState,
    codec: &StateCodec,
    format: CodecFormat,
) -> Result<(), SnapshotError> {
    fs::create_dir_all(dir)?;
    let blob = codec.serialize(state, &SerializeOptions::format(format))?;
    let path = dir.join(SNAPSHOT_FILE);
    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    fs::write(&tmp, blob)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Load the state snapshot, decoded with the same format that wrote it.
///
/// A corrupt or wrong-format blob means "no usable cached state": the
/// failure is logged and `Ok(None)` returned so the caller starts from a
/// fresh workspace instead of partial data.
pub fn load_state(
    dir: &Path,
    codec: &StateCodec,
    format: CodecFormat,
) -> Result<Option<PersistedState>, SnapshotError> {
    let path = dir.join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let blob = fs::read_to_string(&path)?;
    match codec.deserialize::<PersistedState>(&blob, &DeserializeOptions::format(format)) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            warn!(path = %path.display(), %e, "snapshot unusable, discarding");
            Ok(None)
        }
    }
}

/// Byte size of the stored snapshot, if one exists.
pub fn snapshot_size(dir: &Path) -> Option<u64> {
    fs::metadata(dir.join(SNAPSHOT_FILE)).ok().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Card, RepoRef, StatusColumn};
    use crate::engine::history::CardSnapshot;
    use chrono::Utc;

    fn sample_state() -> PersistedState {
        let now = Utc::now();
        let mut board = Board::new("1".into(), "Reading list".into(), "me".into(), now);
        board.columns.push(StatusColumn::new(
            "2".into(),
            "1".into(),
            "Backlog".into(),
            "#5b8dd9".into(),
            0,
            0,
            now,
        ));
        board.cards.push(Card::new(
            "3".into(),
            "1".into(),
            "2".into(),
            RepoRef {
                owner: "rust-lang".into(),
                name: "cargo".into(),
            },
            0.0,
            now,
        ));
        let mut workspace = Workspace::new();
        workspace.boards.push(board);
        workspace.active_board = Some("1".into());
        workspace.next_id = 4;
        PersistedState {
            workspace,
            undo: vec![MutationRecord::MoveCard {
                cards: vec![CardSnapshot {
                    card_id: "3".into(),
                    status_id: "2".into(),
                    order: 1.0,
                }],
            }],
        }
    }

    #[test]
    fn saves_and_reloads_the_state_tree() {
        let dir = tempfile::tempdir().unwrap();
        let codec = StateCodec::init().unwrap();
        let state = sample_state();

        for format in CodecFormat::ALL {
            save_state(dir.path(), &state, codec, format).unwrap();
            let loaded = load_state(dir.path(), codec, format).unwrap().unwrap();
            assert_eq!(loaded.workspace.boards.len(), 1);
            assert_eq!(loaded.workspace.boards[0].cards[0].repo.name, "cargo");
            assert_eq!(loaded.workspace.next_id, 4);
            assert_eq!(loaded.undo, state.undo);
        }
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let codec = StateCodec::init().unwrap();
        assert!(load_state(dir.path(), codec, CodecFormat::Utf16)
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_snapshot_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let codec = StateCodec::init().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), "definitely not a snapshot").unwrap();
        assert!(load_state(dir.path(), codec, CodecFormat::Base64)
            .unwrap()
            .is_none());
    }

    #[test]
    fn wrong_format_is_discarded_not_partial() {
        let dir = tempfile::tempdir().unwrap();
        let codec = StateCodec::init().unwrap();
        let state = sample_state();
        save_state(dir.path(), &state, codec, CodecFormat::Base64).unwrap();
        assert!(load_state(dir.path(), codec, CodecFormat::Utf16)
            .unwrap()
            .is_none());
    }
}
