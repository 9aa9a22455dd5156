//! Validate command implementation.

use entigate_core::ConfigSnapshot;
use std::path::Path;

/// Outcome of checking one declared connection.
#[derive(Debug)]
pub struct ConnectionCheck {
    /// Declared name.
    pub name: String,
    /// Problem found, if any.
    pub error: Option<String>,
}

/// Checks every connection of `snapshot`, including duplicate names.
pub fn check(snapshot: &ConfigSnapshot) -> Vec<ConnectionCheck> {
    snapshot
        .connections
        .iter()
        .enumerate()
        .map(|(i, connection)| {
            let duplicate = snapshot.connections[..i]
                .iter()
                .any(|c| c.connection_name.eq_ignore_ascii_case(&connection.connection_name));
            let error = if duplicate {
                Some("declared more than once".to_string())
            } else {
                connection.validate().err().map(|e| e.to_string())
            };
            ConnectionCheck {
                name: connection.connection_name.clone(),
                error,
            }
        })
        .collect()
}

/// Runs the validate command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    let snapshot = ConfigSnapshot::from_json(&json)?;
    tracing::debug!(connections = snapshot.connections.len(), "configuration parsed");

    println!("Validating {}", path.display());
    println!();

    if snapshot.connections.is_empty() {
        println!("✗ No connection declared");
        return Err("Validation failed".into());
    }

    let checks = check(&snapshot);
    for check in &checks {
        match &check.error {
            None => println!("  ✓ {}", check.name),
            Some(error) => println!("  ✗ {}: {error}", check.name),
        }
    }

    println!();
    let failed = checks.iter().filter(|c| c.error.is_some()).count();
    if failed == 0 {
        println!("✓ {} connection(s) valid", checks.len());
        Ok(())
    } else {
        println!("✗ {failed} of {} connection(s) invalid", checks.len());
        Err("Validation failed".into())
    }
}
