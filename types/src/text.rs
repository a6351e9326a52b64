//! Small pure text helpers.

/// Byte offset of the `codepoint`-th character in `line` (both 0-based).
///
/// Offsets past the end clamp to `line.len()`, so a position at end-of-line
/// maps to the byte just past the last character.
#[must_use]
pub fn codepoint_to_byte_offset(line: &str, codepoint: usize) -> usize {
    line.char_indices()
        .nth(codepoint)
        .map_or(line.len(), |(byte, _)| byte)
}

/// The 0-based `line_index`-th line of `contents`, without its terminator.
#[must_use]
pub fn line_at(contents: &str, line_index: usize) -> Option<&str> {
    contents
        .split('\n')
        .nth(line_index)
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}
