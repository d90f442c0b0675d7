//! Tolerant JSON-object extraction from free-text model output — assistants
//! asked to "reply with a JSON object" routinely wrap the answer in prose
//! ("Sure, here's the verdict: { ... } Let me know if..."). Grounded on the
//! find-first-brace-then-parse idiom used elsewhere in the corpus for
//! recovering a JSON fragment embedded in an error string.

use serde::de::DeserializeOwned;

/// Scan `text` for the first balanced `{ ... }` span and attempt to
/// deserialize it as `T`. Tries every opening brace in order (not just
/// the first) so a JSON object following an unrelated `{` earlier in the
/// prose still gets found.
pub fn extract_json_object<T: DeserializeOwned>(text: &str) -> Option<T> {
    let bytes = text.as_bytes();
    let opens: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'{')
        .map(|(i, _)| i)
        .collect();

    for start in opens {
        if let Some(end) = matching_brace(text, start) {
            if let Ok(value) = serde_json::from_str::<T>(&text[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Find the index of the `}` that closes the `{` at `open_idx`, respecting
/// nested braces and string literals (so a `}` inside a quoted string
/// doesn't end the scan early).
fn matching_brace(text: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices().skip(open_idx) {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}
