//! Mapping of raw provider responses onto [`NormalizedResult`].
//!
//! Precedence: `isError` results, then `structuredContent`, then the first
//! text block decoded as JSON, then the concatenated text.

use serde_json::Value;
use toolrelay_core::NormalizedResult;

use crate::error::McpError;
use crate::protocol::{CallToolResult, ContentBlock};

pub fn normalize_call_result(result: CallToolResult) -> NormalizedResult {
    let texts: Vec<&str> = result.content.iter().filter_map(ContentBlock::as_text).collect();

    if result.is_error {
        let message = if texts.is_empty() {
            "Tool returned an error".to_string()
        } else {
            texts.join("\n")
        };
        return NormalizedResult::failure(message);
    }

    if let Some(structured) = result.structured_content {
        return NormalizedResult::from_payload(structured);
    }

    let Some(first) = texts.first() else {
        if result.content.is_empty() {
            return NormalizedResult::success(Value::Null);
        }
        return match serde_json::to_value(&result.content) {
            Ok(blocks) => NormalizedResult::success(blocks),
            Err(e) => NormalizedResult::failure(format!("Unreadable tool content: {}", e)),
        };
    };

    match serde_json::from_str::<Value>(first) {
        Ok(decoded) if texts.len() == 1 => NormalizedResult::from_payload(decoded),
        Ok(decoded) if decoded.is_object() || decoded.is_array() => {
            NormalizedResult::from_payload(decoded)
        }
        _ => NormalizedResult::success(Value::String(texts.join("\n"))),
    }
}

/// A transport-level failure expressed as a failed result.
pub fn normalize_error(error: &McpError) -> NormalizedResult {
    NormalizedResult::failure(error.to_string())
}
