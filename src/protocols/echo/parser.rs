//! Echo protocol framing.
//!
//! A chunk ends at the first `\n` or when it reaches the buffer limit,
//! whichever comes first. Long lines are therefore echoed as several
//! independent chunks.

/// Where the next chunk boundary falls inside the buffered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// Chunk is complete after taking this many bytes.
    ///
    /// Either a newline was found (and is included) or the limit was reached.
    Complete(usize),
    /// Take this many bytes and keep reading for the rest of the chunk.
    Partial(usize),
}

/// Decide how many bytes of `available` belong to the current chunk.
///
/// `filled` is the number of bytes already collected for the chunk and
/// `limit` the maximum chunk size.
pub fn next_chunk(available: &[u8], filled: usize, limit: usize) -> Chunk {
    let room = limit.saturating_sub(filled);
    let window = &available[..available.len().min(room)];

    match find_lf(window) {
        Some(pos) => Chunk::Complete(pos + 1),
        None if filled + window.len() >= limit => Chunk::Complete(window.len()),
        None => Chunk::Partial(window.len()),
    }
}

/// Find `\n` in buffer.
fn find_lf(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}
