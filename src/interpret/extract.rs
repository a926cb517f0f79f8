//! Balanced JSON fragment extraction from noisy text.

/// Return the first balanced JSON object or array embedded in `text`.
///
/// Scanning starts at whichever of `{` / `[` occurs first. Brackets inside
/// string literals are ignored, a backslash consumes the following character,
/// and a closing bracket of the wrong kind aborts the scan. Returns `None` when
/// there is no opening bracket, the brackets are mismatched, or the input ends
/// before the structure closes.
pub fn balanced_fragment(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let bytes = text.as_bytes();

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    // Every byte we act on is ASCII, so slicing at these offsets stays on
    // char boundaries.
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                let open = if b == b'}' { b'{' } else { b'[' };
                if stack.pop() != Some(open) {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset;
                    return Some(&text[start..=end]);
                }
            }
            _ => {}
        }
    }

    None
}
