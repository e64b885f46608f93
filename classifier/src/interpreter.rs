//! Turns raw model text into a validated [`ClassificationResult`].

use serde_json::Value;

use crate::error::{AttemptError, ParseError};
use crate::result::ClassificationResult;

const DEFAULT_CATEGORY: &str = "general";
const DEFAULT_EXPLANATION: &str = "No explanation provided";
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Decode `raw` and build a model-provenance result.
///
/// Missing fields take defaults. Malformed or mistyped JSON is a
/// [`ParseError`]; an unknown category or out-of-range confidence is a
/// validation failure from the constructor.
pub fn parse(raw: &str) -> Result<ClassificationResult, AttemptError> {
    let text = strip_fence(raw.trim());
    let decoded: Value = serde_json::from_str(text).map_err(ParseError::from)?;
    let fields = match decoded {
        Value::Object(fields) => fields,
        other => return Err(ParseError::NotAnObject(json_type(&other)).into()),
    };

    let category = match fields.get("category") {
        None | Some(Value::Null) => DEFAULT_CATEGORY,
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            return Err(ParseError::FieldType {
                field: "category",
                expected: "a string",
            }
            .into())
        }
    };

    let explanation = match fields.get("explanation") {
        None | Some(Value::Null) => DEFAULT_EXPLANATION.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(ParseError::FieldType {
                field: "explanation",
                expected: "a string",
            }
            .into())
        }
    };

    let confidence = match fields.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(Value::Number(n)) => n.as_f64().ok_or(ParseError::FieldType {
            field: "confidence",
            expected: "a finite number",
        })?,
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| ParseError::FieldType {
            field: "confidence",
            expected: "a number",
        })?,
        Some(_) => {
            return Err(ParseError::FieldType {
                field: "confidence",
                expected: "a number",
            }
            .into())
        }
    };

    Ok(ClassificationResult::new(category, explanation, confidence)?)
}

/// Body of a ```` ```json ```` (or bare ```` ``` ````) fence, else `text`.
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
