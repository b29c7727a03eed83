//! Subcommands that talk to a running server through [`HttpBackend`].

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::{Confirm, Password};

use flowsync_core::backend::{HttpBackend, WorkflowBackend};
use flowsync_core::config::AppConfig;

use crate::{style, truncate};

/// Build the API client, warning when no token is configured.
pub fn client(config: &AppConfig) -> Result<HttpBackend> {
    if config.client.token.is_none() {
        eprintln!(
            "{}",
            style::warn(&format!(
                "${} is not set; requests are anonymous (run `flowsync login`)",
                config.client.token_env
            ))
        );
    }
    HttpBackend::from_config(&config.client).context("failed to create API client")
}

pub async fn login(config: &AppConfig, username: &str) -> Result<()> {
    let password = Password::new()
        .with_prompt(format!("Password for '{}'", username))
        .interact()
        .context("failed to read password")?;

    let client = HttpBackend::from_config(&config.client).context("failed to create API client")?;
    let credentials = client
        .login(username, &password)
        .await
        .context("login failed")?;

    println!("{}", style::success(&format!("Logged in to {}", client.api_url())));
    println!();
    println!("export {}={}", config.client.token_env, credentials.token());
    Ok(())
}

pub async fn list(config: &AppConfig, skip: u32, limit: u32) -> Result<()> {
    let workflows = client(config)?
        .list(skip, limit)
        .await
        .context("failed to list workflows")?;

    if workflows.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "ID", "Name", "Version", "Nodes", "Modified by", "Updated", "Public",
    ]);

    for wf in &workflows {
        table.add_row(vec![
            Cell::new(&wf.id),
            Cell::new(truncate(&wf.name, 40)),
            Cell::new(wf.version),
            Cell::new(wf.nodes.len()),
            Cell::new(wf.last_modified_by.as_deref().unwrap_or("-")),
            Cell::new(wf.updated_at.format("%Y-%m-%d %H:%M")),
            Cell::new(if wf.is_public { "yes" } else { "" }),
        ]);
    }

    println!("{}", table);
    println!("{}", style::dim(&format!("{} workflow(s)", workflows.len())));
    Ok(())
}

pub async fn show(config: &AppConfig, id: &str) -> Result<()> {
    let wf = client(config)?
        .fetch(id)
        .await
        .with_context(|| format!("failed to fetch workflow {}", id))?;

    println!("{} {}", style::header(&wf.name), style::version(wf.version));
    println!("{}", "=".repeat(40));
    println!("  ID           : {}", wf.id);
    println!(
        "  Description  : {}",
        wf.description.as_deref().unwrap_or("(none)")
    );
    println!("  Owner        : {}", wf.owner_id);
    println!(
        "  Modified by  : {}",
        wf.last_modified_by.as_deref().unwrap_or("-")
    );
    println!("  Created      : {}", wf.created_at.to_rfc3339());
    println!("  Updated      : {}", wf.updated_at.to_rfc3339());
    println!("  Public       : {}", wf.is_public);
    if !wf.metadata.is_empty() {
        println!("  Metadata     : {}", serde_json::Value::Object(wf.metadata.clone()));
    }

    if !wf.nodes.is_empty() {
        println!();
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Node", "Type", "Label", "Position"]);
        for node in &wf.nodes {
            table.add_row(vec![
                Cell::new(&node.id),
                Cell::new(node.node_type),
                Cell::new(node.label().unwrap_or("")),
                Cell::new(format!("({:.0}, {:.0})", node.position.x, node.position.y)),
            ]);
        }
        println!("{}", table);
    }

    if !wf.edges.is_empty() {
        println!();
        println!("{}", style::header("Edges"));
        for edge in &wf.edges {
            match &edge.label {
                Some(label) => println!("  {} -> {}  [{}]", edge.source, edge.target, label),
                None => println!("  {} -> {}", edge.source, edge.target),
            }
        }
    }

    Ok(())
}

pub async fn export(config: &AppConfig, id: &str, output: Option<&Path>) -> Result<()> {
    let export = client(config)?
        .export(id)
        .await
        .with_context(|| format!("failed to export workflow {}", id))?;
    let json = serde_json::to_string_pretty(&export).context("failed to serialize export")?;

    match output {
        Some(path) => {
            std::fs::write(path, json + "\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{}",
                style::success(&format!("Exported '{}' to {}", export.name, path.display()))
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub async fn logs(config: &AppConfig, id: &str) -> Result<()> {
    let logs = client(config)?
        .update_logs(id)
        .await
        .with_context(|| format!("failed to fetch update logs for {}", id))?;

    if logs.is_empty() {
        println!("No saves recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Version", "User", "Timestamp"]);
    for log in &logs {
        table.add_row(vec![
            Cell::new(log.version),
            Cell::new(&log.username),
            Cell::new(log.timestamp.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn share(config: &AppConfig, id: &str) -> Result<()> {
    let client = client(config)?;
    let shared = client
        .share(id)
        .await
        .with_context(|| format!("failed to share workflow {}", id))?;

    println!("{}", style::success("Workflow is public"));
    println!("  Share token: {}", shared.share_token);
    println!(
        "  URL        : {}/workflows/shared/{}",
        client.api_url(),
        shared.share_token
    );
    Ok(())
}

pub async fn delete(config: &AppConfig, id: &str, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete workflow {}? This cannot be undone", id))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::warn("Delete cancelled."));
            return Ok(());
        }
    }

    client(config)?
        .delete(id)
        .await
        .with_context(|| format!("failed to delete workflow {}", id))?;
    println!("{}", style::success(&format!("Workflow {} deleted", id)));
    Ok(())
}
