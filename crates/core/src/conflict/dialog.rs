//! The conflict-resolution dialog as an explicit state machine.
//!
//! ```text
//! Hidden --show--> Shown --resolve(UseServer)--> Hidden  (Refetch)
//!                        --resolve(KeepLocal)--> Hidden  (Resubmit)
//!                        --resolve(Cancel)-----> Hidden  (Cancelled)
//! ```
//!
//! The dialog performs no I/O. [`ConflictDialog::resolve`] returns the effect
//! to carry out and [`super::ConflictResolver`] executes it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DialogError;
use crate::models::ConflictInfo;

/// Visible state of the dialog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DialogState {
    #[default]
    Hidden,
    Shown(ConflictInfo),
}

/// The user's decision for a shown conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    /// Override the server copy with the local draft.
    KeepLocal,
    /// Discard local edits and load the server copy.
    #[default]
    UseServer,
    /// Close the dialog; keep the draft and known version as they are.
    Cancel,
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepLocal => write!(f, "keep_local"),
            Self::UseServer => write!(f, "use_server"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// The effect a resolved dialog asks the caller to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Re-fetch the document and replace the session state.
    Refetch { id: String },
    /// Save the draft again using the server's version as the known version.
    Resubmit { known_version: i64 },
    /// Nothing to do.
    Cancelled,
}

/// Dialog for one document.
#[derive(Debug, Clone)]
pub struct ConflictDialog {
    document_id: String,
    state: DialogState,
}

impl ConflictDialog {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            state: DialogState::Hidden,
        }
    }

    pub fn state(&self) -> &DialogState {
        &self.state
    }

    pub fn is_shown(&self) -> bool {
        matches!(self.state, DialogState::Shown(_))
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match self.state {
            DialogState::Shown(ref info) => Some(info),
            DialogState::Hidden => None,
        }
    }

    /// `Hidden -> Shown`.
    pub fn show(&mut self, info: ConflictInfo) -> Result<(), DialogError> {
        if let DialogState::Shown(ref current) = self.state {
            return Err(DialogError::AlreadyShown {
                current_version: current.current_version,
            });
        }
        debug!(
            id = %self.document_id,
            current_version = info.current_version,
            your_version = info.your_version,
            "showing conflict dialog"
        );
        self.state = DialogState::Shown(info);
        Ok(())
    }

    /// `Shown -> Hidden`, returning the effect of `choice`.
    pub fn resolve(&mut self, choice: Choice) -> Result<Resolution, DialogError> {
        let info = match std::mem::take(&mut self.state) {
            DialogState::Shown(info) => info,
            DialogState::Hidden => return Err(DialogError::NotShown),
        };
        debug!(id = %self.document_id, %choice, "conflict dialog resolved");

        Ok(match choice {
            Choice::UseServer => Resolution::Refetch {
                id: self.document_id.clone(),
            },
            Choice::KeepLocal => Resolution::Resubmit {
                known_version: info.current_version,
            },
            Choice::Cancel => Resolution::Cancelled,
        })
    }

    /// Shorthand for `resolve(Choice::Cancel)`.
    pub fn cancel(&mut self) -> Result<(), DialogError> {
        self.resolve(Choice::Cancel).map(|_| ())
    }
}
