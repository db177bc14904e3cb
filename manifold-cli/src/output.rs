//! Output formatting: yaml by default, json on request, tabular for
//! audit listings.

use serde_json::Value;

use manifold_core::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Yaml,
    Json,
    Tabular,
}

pub fn print(format: Format, value: &Value) -> Result<()> {
    match format {
        Format::Yaml => {
            let text = serde_yaml::to_string(value)
                .map_err(|e| Error::unspecified(format!("encode output: {e}")))?;
            print!("{text}");
        }
        Format::Json => {
            let text = serde_json::to_string_pretty(value)
                .map_err(|e| Error::unspecified(format!("encode output: {e}")))?;
            println!("{text}");
        }
        Format::Tabular => {
            return Err(Error::bad_request(
                "tabular output is only available for audit-events",
            ));
        }
    }
    Ok(())
}

/// Render audit events as fixed columns.
pub fn print_audit_table(events: &[Value]) {
    println!(
        "{:<32} {:<30} {:<34} {:<9}",
        "TIME", "IDENTITY", "METHOD", "RESPONSE"
    );
    for event in events {
        let field = |key: &str| {
            event
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let is_response = event
            .get("is-response")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        println!(
            "{:<32} {:<30} {:<34} {:<9}",
            field("time"),
            field("identity-tag"),
            field("facade-method"),
            is_response
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabular_is_audit_only() {
        let err = print(Format::Tabular, &serde_json::json!({})).unwrap_err();
        assert_eq!(err.code(), "bad-request");
    }
}
