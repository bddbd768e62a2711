// src/client/response.rs

use serde::Deserialize;
use serde_json::Value;

use super::transport::HttpResponse;
use crate::error::{ClientError, TransientKind};

/// `{ "success": bool, "result"?: any, "errors"?: [..] }`
#[derive(Debug, Deserialize)]
struct Envelope {
    success: Option<bool>,
    #[serde(default)]
    errors: Vec<Value>,
}

/// How one HTTP exchange ended
#[derive(Debug)]
pub(crate) enum Outcome {
    Success(Value),
    Throttled { retry_after: Option<String> },
    Failed(ClientError),
}

pub(crate) fn classify(response: &HttpResponse) -> Outcome {
    match response.status {
        429 => Outcome::Throttled {
            retry_after: response.header("retry-after").map(str::to_string),
        },
        200..=299 => parse_success(response),
        code @ (502 | 503 | 504) => Outcome::Failed(ClientError::Transient {
            kind: TransientKind::Status(code),
            message: snippet(&response.body),
        }),
        code => Outcome::Failed(ClientError::Application {
            status: Some(code),
            errors: error_details(&response.body),
        }),
    }
}

fn parse_success(response: &HttpResponse) -> Outcome {
    if response.body.trim().is_empty() {
        return Outcome::Success(Value::Null);
    }

    let mut body: Value = match serde_json::from_str(&response.body) {
        Ok(body) => body,
        Err(e) => {
            return Outcome::Failed(ClientError::Parse(format!(
                "{} (body: {})",
                e,
                snippet(&response.body)
            )))
        }
    };

    if let Ok(envelope) = Envelope::deserialize(&body) {
        if envelope.success == Some(false) {
            return Outcome::Failed(ClientError::Application {
                status: Some(response.status),
                errors: render_errors(envelope.errors),
            });
        }
    }

    match body.get_mut("result") {
        Some(result) => Outcome::Success(result.take()),
        None => Outcome::Success(body),
    }
}

/// Errors from an envelope when there is one, otherwise the raw body
fn error_details(body: &str) -> Vec<String> {
    if let Ok(envelope) = serde_json::from_str::<Envelope>(body) {
        if !envelope.errors.is_empty() {
            return render_errors(envelope.errors);
        }
    }
    let body = snippet(body);
    if body.is_empty() {
        Vec::new()
    } else {
        vec![body]
    }
}

fn render_errors(errors: Vec<Value>) -> Vec<String> {
    errors
        .into_iter()
        .map(|e| match e {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let body = body.trim();
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
