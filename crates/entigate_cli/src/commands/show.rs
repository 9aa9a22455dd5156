//! Show command implementation.

use entigate_core::{ConfigRegistry, ConnectionConfig};
use std::path::Path;

/// Runs the show command.
pub fn run(
    path: &Path,
    connection: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ConfigRegistry::from_file(path)?;
    let config = registry.client_config(connection)?.to_connection();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => print_text(&config),
    }

    Ok(())
}

fn print_text(config: &ConnectionConfig) {
    println!("Connection: {}", config.connection_name);
    println!("  Connection string:   {}", config.connection_string);
    println!(
        "  Provider:            {}",
        config.provider.as_deref().unwrap_or("(any)")
    );
    println!("  Max attempts:        {}", config.max_attempts);
    println!("  Attempt delay:       {} ms", config.attempt_delay_ms);
    println!("  Timeout:             {} s", config.timeout_secs);
    println!("  Lazy loading:        {}", config.lazy_loading);
    println!(
        "  Original values:     {}",
        if config.automatic_original_values {
            "automatic"
        } else {
            "on request"
        }
    );
    println!("  Notifications:       {}", config.notifications);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_connection_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        std::fs::write(
            &path,
            r#"{ "connections": [{ "connection_name": "Main", "connection_string": "mem://main" }] }"#,
        )
        .unwrap();

        assert!(run(&path, None, "json").is_ok());
        assert!(run(&path, Some("MAIN"), "text").is_ok());
        assert!(run(&path, Some("Billing"), "text").is_err());
    }
}
