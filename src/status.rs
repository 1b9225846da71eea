//! Parse status of a layer: current state, timestamped log, completed zoom levels.

use std::fmt;
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PyramidError, PyramidResult};
use crate::model::LayerId;
use crate::store::LayerStore;

/// Stage of the pyramid pipeline a layer is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ParseState {
    #[default]
    Unparsed,
    Pending,
    OpeningSource,
    Reprojecting,
    CreatingTiles { zoom: u8 },
    DroppingEmptyTiles,
    Finished,
    Failed,
}

impl ParseState {
    fn rank(self) -> u8 {
        match self {
            Self::Unparsed => 0,
            Self::Pending => 1,
            Self::OpeningSource => 2,
            Self::Reprojecting => 3,
            Self::CreatingTiles { .. } => 4,
            Self::DroppingEmptyTiles => 5,
            Self::Finished | Self::Failed => 6,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether the pipeline may move from `self` to `next`.
    ///
    /// A run can always start over (`Pending`) or fail. Otherwise states only
    /// move forward, zoom levels may follow each other in any order, and
    /// terminal states are left only by starting a new run.
    #[must_use]
    pub fn can_transition_to(self, next: ParseState) -> bool {
        match (self, next) {
            (_, Self::Pending | Self::Failed) => true,
            (a, b) if a == b => true,
            (a, _) if a.is_terminal() => false,
            (Self::CreatingTiles { .. }, Self::CreatingTiles { .. }) => true,
            (a, b) => b.rank() > a.rank(),
        }
    }
}

impl fmt::Display for ParseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparsed => write!(f, "unparsed"),
            Self::Pending => write!(f, "pending"),
            Self::OpeningSource => write!(f, "opening source"),
            Self::Reprojecting => write!(f, "reprojecting"),
            Self::CreatingTiles { zoom } => write!(f, "creating tiles (zoom {zoom})"),
            Self::DroppingEmptyTiles => write!(f, "dropping empty tiles"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable parse status record of one layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParseStatus {
    pub state: ParseState,
    /// Newline-separated, append-only log
    pub log: String,
    /// Completed zoom levels, sorted and unique
    pub tile_levels: Vec<u8>,
}

impl ParseStatus {
    pub fn append_log(&mut self, line: &str) {
        if !self.log.is_empty() {
            self.log.push('\n');
        }
        self.log.push_str(line);
    }

    pub fn add_tile_level(&mut self, zoom: u8) {
        if let Err(pos) = self.tile_levels.binary_search(&zoom) {
            self.tile_levels.insert(pos, zoom);
        }
    }

    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.log.lines()
    }
}

/// Writes timestamped progress messages to a layer's status record.
#[derive(Clone)]
pub struct StatusRecorder {
    layer_id: LayerId,
    store: Arc<dyn LayerStore>,
}

impl StatusRecorder {
    #[must_use]
    pub fn new(layer_id: LayerId, store: Arc<dyn LayerStore>) -> Self {
        Self { layer_id, store }
    }

    /// Append `msg` to the log, optionally moving to `state` and marking
    /// `zoom` as completed.
    ///
    /// # Errors
    /// Returns [`PyramidError::InvalidTransition`] if `state` cannot follow the
    /// current state, or a store error.
    pub fn log(&self, msg: &str, state: Option<ParseState>, zoom: Option<u8>) -> PyramidResult<ParseStatus> {
        let line = format!("[{}] {msg}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        let mut rejected = None;

        let status = self.store.update_status(self.layer_id, &mut |status| {
            if let Some(next) = state {
                if !status.state.can_transition_to(next) {
                    rejected = Some((status.state, next));
                    return;
                }
                status.state = next;
            }
            if let Some(zoom) = zoom {
                status.add_tile_level(zoom);
            }
            status.append_log(&line);
        })?;

        if let Some((from, to)) = rejected {
            return Err(PyramidError::InvalidTransition { from, to });
        }

        info!(layer = %self.layer_id, state = %status.state, "{msg}");
        Ok(status)
    }

    /// Append a message without changing state.
    ///
    /// # Errors
    /// Returns a store error.
    pub fn note(&self, msg: &str) -> PyramidResult<()> {
        self.log(msg, None, None).map(|_| ())
    }

    /// Move to `state` with a message.
    ///
    /// # Errors
    /// See [`StatusRecorder::log`].
    pub fn enter(&self, state: ParseState, msg: &str) -> PyramidResult<()> {
        self.log(msg, Some(state), None).map(|_| ())
    }
}
