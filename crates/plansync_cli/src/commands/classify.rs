//! Classify command implementation.

use crate::error::CliError;
use crate::OutputFormat;
use chrono::Utc;
use plansync_engine::http::{classify_status, parse_retry_after};
use plansync_engine::ErrorClass;
use serde::Serialize;

/// How the push engine would treat a response.
#[derive(Debug, Serialize)]
pub struct Classification {
    /// HTTP status.
    pub status: u16,
    /// Backend error code.
    pub code: Option<String>,
    /// Error class.
    pub class: ErrorClass,
    /// Whether a pass that hit this on pull can be retried.
    pub retryable: bool,
    /// Parsed retry hint, in seconds.
    pub retry_after_secs: Option<f64>,
    /// Effect on a pushed row.
    pub push_outcome: &'static str,
}

/// Runs the classify command.
pub fn run(
    status: u16,
    code: Option<&str>,
    retry_after: Option<&str>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let result = classify(status, code, retry_after)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            println!("{} -> {}", result.status, result.class.as_str());
            println!("retryable: {}", result.retryable);
            if let Some(secs) = result.retry_after_secs {
                println!("retry after: {secs}s");
            }
            println!("push outcome: {}", result.push_outcome);
        }
    }

    Ok(())
}

/// Classifies a response.
pub fn classify(
    status: u16,
    code: Option<&str>,
    retry_after: Option<&str>,
) -> Result<Classification, CliError> {
    if status > 599 {
        return Err(CliError::Argument(format!("status {status} out of range")));
    }

    let hint = match retry_after {
        Some(value) => Some(parse_retry_after(value, Utc::now()).ok_or_else(|| {
            CliError::Argument(format!("unparseable Retry-After value {value:?}"))
        })?),
        None => None,
    };

    let error = classify_status(status, code, "classified from the command line", hint);
    let class = error.class();

    Ok(Classification {
        status,
        code: code.map(str::to_owned),
        class,
        retryable: error.is_retryable(),
        retry_after_secs: error.retry_after().map(|d| d.as_secs_f64()),
        push_outcome: match class {
            ErrorClass::Conflict => "logged as conflict, row stays dirty",
            ErrorClass::Missing => "reported as missing, row stays dirty",
            ErrorClass::RateLimited | ErrorClass::Transient => "deferred to the next pass",
            ErrorClass::Permanent => "reported as failure, row stays dirty",
        },
    })
}
