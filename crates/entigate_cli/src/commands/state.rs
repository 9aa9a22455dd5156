//! State command implementation.

use entigate_core::PortableState;
use serde::Serialize;
use std::path::Path;

/// Summary of a suspended manager.
#[derive(Debug, Serialize)]
pub struct StateSummary {
    /// Connection the manager was using.
    pub connection: String,
    /// Shape the manager was working with.
    pub shape: Option<String>,
    /// Whether the manager was bound to its shape.
    pub typed: bool,
    /// Whether the token was tracking changes.
    pub tracked: bool,
    /// Attempts made by the last operation.
    pub attempts: u32,
    /// Rows reported by the last operation.
    pub rows: i64,
    /// Last statement sent to the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    /// Tracked entities.
    pub entries: Vec<EntrySummary>,
    /// Number of original values kept for the main entity.
    pub original_values: Option<usize>,
}

/// Summary of one tracked entity.
#[derive(Debug, Serialize)]
pub struct EntrySummary {
    /// Shape of the entity.
    pub shape: String,
    /// State it will be saved with.
    pub state: String,
    /// Whether it is the main entity.
    pub primary: bool,
}

impl From<&PortableState> for StateSummary {
    fn from(state: &PortableState) -> Self {
        Self {
            connection: state.connection.connection_name.clone(),
            shape: state.shape.clone(),
            typed: state.typed,
            tracked: state.token.is_tracked(),
            attempts: state.token.attempts(),
            rows: state.token.rows(),
            statement: state.token.statement().map(str::to_string),
            entries: state
                .entries
                .iter()
                .map(|e| EntrySummary {
                    shape: e.entity.shape.clone(),
                    state: e.state.to_string(),
                    primary: e.primary,
                })
                .collect(),
            original_values: state.original_values.as_ref().map(Vec::len),
        }
    }
}

/// Runs the state command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let state = PortableState::from_bytes(&bytes)?;
    state.main_entry()?;
    let summary = StateSummary::from(&state);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text(&summary),
    }

    Ok(())
}

fn print_text(summary: &StateSummary) {
    println!("Connection: {}", summary.connection);
    println!(
        "Shape:      {}{}",
        summary.shape.as_deref().unwrap_or("(none)"),
        if summary.typed { "" } else { " (adopted)" }
    );
    println!("Tracked:    {}", summary.tracked);
    println!("Attempts:   {}", summary.attempts);
    println!("Rows:       {}", summary.rows);
    if let Some(statement) = &summary.statement {
        println!("Statement:  {statement}");
    }
    if let Some(count) = summary.original_values {
        println!("Original values: {count}");
    }
    println!();
    println!("Entries ({}):", summary.entries.len());
    for entry in &summary.entries {
        let marker = if entry.primary { "*" } else { " " };
        println!("  {marker} {:<20} {}", entry.shape, entry.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigate_core::{ConnectionConfig, PortableEntry, SessionToken};
    use entigate_engine::{EntityData, EntityState};

    fn sample() -> PortableState {
        PortableState {
            connection: ConnectionConfig::new("Main", "mem://main"),
            token: SessionToken::new(),
            shape: Some("tag".into()),
            typed: true,
            lazy_loading: true,
            entries: vec![
                PortableEntry {
                    entity: EntityData::new("tag").with("id", 1),
                    state: EntityState::Modified,
                    primary: true,
                },
                PortableEntry {
                    entity: EntityData::new("tag").with("id", 0),
                    state: EntityState::Added,
                    primary: false,
                },
            ],
            original_values: None,
        }
    }

    #[test]
    fn summary_lists_entries() {
        let summary = StateSummary::from(&sample());
        assert_eq!(summary.connection, "Main");
        assert!(summary.tracked);
        assert_eq!(summary.entries.len(), 2);
        assert!(summary.entries[0].primary);
        assert_eq!(summary.entries[1].state, EntityState::Added.to_string());
    }

    #[test]
    fn run_decodes_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.cbor");
        std::fs::write(&path, sample().to_bytes().unwrap()).unwrap();
        assert!(run(&path, "json").is_ok());

        std::fs::write(&path, b"not a state").unwrap();
        assert!(run(&path, "text").is_err());
    }
}
