//! Configuration validation.

use crate::config::Config;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - A usable listen port
/// - At least one backend
/// - Parseable http(s) backend URLs with a host
/// - No duplicate backend URLs (weights express duplication instead)
///
/// # Returns
///
/// `Ok(())` if valid, or a message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.lb_port == 0 {
        errors.push("lb_port must be nonzero".to_string());
    }

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut seen_urls = HashSet::new();

    for entry in &config.backends {
        let resolved = match entry.resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                errors.push(e.to_string());
                continue;
            }
        };

        match resolved.url.scheme() {
            "http" | "https" => {}
            other => errors.push(format!(
                "backend '{}' has unsupported scheme '{}' (expected http or https)",
                resolved.name, other
            )),
        }

        if !seen_urls.insert(resolved.url.as_str().to_string()) {
            errors.push(format!(
                "duplicate backend URL '{}' (use the weight field instead of repeating entries)",
                resolved.url
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
