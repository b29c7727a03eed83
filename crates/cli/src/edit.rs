//! `flowsync edit`: apply edits to a workflow through an editing session and
//! walk the user through any save conflict.

use std::sync::Arc;

use anyhow::{Context, Result};
use dialoguer::Select;
use serde_json::Value;

use flowsync_core::backend::WorkflowBackend;
use flowsync_core::config::AppConfig;
use flowsync_core::conflict::{Choice, ResolverOutcome, SaveOutcome};
use flowsync_core::models::ConflictInfo;
use flowsync_core::session::EditingSession;

use crate::{remote, style};

/// Edits requested on the command line.
#[derive(Debug, Default)]
pub struct Edits {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Vec<(String, Value)>,
    pub remove_nodes: Vec<String>,
}

impl Edits {
    fn apply(self, session: &EditingSession) -> Result<()> {
        if let Some(name) = self.name {
            session.set_name(name);
        }
        if let Some(description) = self.description {
            session.set_description(description);
        }
        for (key, value) in self.metadata {
            session.set_metadata(key, value);
        }
        for node_id in &self.remove_nodes {
            session
                .remove_node(node_id)
                .with_context(|| format!("cannot remove node '{}'", node_id))?;
        }
        Ok(())
    }
}

pub async fn run(
    config: &AppConfig,
    id: &str,
    edits: Edits,
    policy: Option<Choice>,
) -> Result<()> {
    let backend: Arc<dyn WorkflowBackend> = Arc::new(remote::client(config)?);
    let session = EditingSession::open(backend, id)
        .await
        .with_context(|| format!("failed to open workflow {}", id))?;

    println!(
        "Editing '{}' at {}",
        session.draft().name,
        style::version(session.known_version())
    );

    edits.apply(&session)?;
    if !session.is_dirty() {
        println!("{}", style::dim("Nothing to change."));
        return Ok(());
    }

    let mut outcome = session.save().await.context("save failed")?;
    loop {
        match outcome {
            SaveOutcome::Saved { new_version, .. } => {
                println!(
                    "{}",
                    style::success(&format!("Saved as {}", style::version(new_version)))
                );
                return Ok(());
            }
            SaveOutcome::Failed { reason } => {
                anyhow::bail!("save failed: {}", reason);
            }
            SaveOutcome::Conflict { .. } => {
                let info = session
                    .conflict()
                    .context("conflict reported but no conflict is pending")?;
                print_conflict(&info);

                let choice = match policy {
                    Some(choice) => choice,
                    None => prompt_choice()?,
                };

                match session
                    .resolve_conflict(choice)
                    .await
                    .context("failed to resolve conflict")?
                {
                    ResolverOutcome::Resubmitted(next) => outcome = next,
                    ResolverOutcome::Reloaded(doc) => {
                        println!(
                            "{}",
                            style::warn(&format!(
                                "Loaded server version {}; your changes were discarded",
                                style::version(doc.version)
                            ))
                        );
                        return Ok(());
                    }
                    ResolverOutcome::Cancelled => {
                        println!("{}", style::warn("Conflict left unresolved; nothing saved."));
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn print_conflict(info: &ConflictInfo) {
    println!();
    println!("{}", style::warn(&info.message));
    println!(
        "  Your version   : {}",
        style::version(info.your_version)
    );
    println!(
        "  Server version : {}{}",
        style::version(info.current_version),
        info.last_modified_by
            .as_deref()
            .map(|who| format!(" (saved by {})", who))
            .unwrap_or_default()
    );
    println!();
}

const CHOICES: [(&str, Choice); 3] = [
    ("Load server version (recommended)", Choice::UseServer),
    ("Keep my changes (override)", Choice::KeepLocal),
    ("Cancel", Choice::Cancel),
];

fn prompt_choice() -> Result<Choice> {
    let labels: Vec<&str> = CHOICES.iter().map(|(label, _)| *label).collect();
    let index = Select::new()
        .with_prompt("How do you want to resolve this conflict?")
        .items(&labels)
        .default(0)
        .interact()
        .context("failed to read conflict choice")?;
    Ok(CHOICES[index].1)
}
