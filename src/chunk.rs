//! Fixed-size overlapping text chunkers.
//!
//! Two variants share the same window parameters:
//!
//! - [`chunk_pages`] — the document path. Each page is windowed
//!   independently at exactly `chunk_size` characters, advancing by
//!   `chunk_size - overlap`; indices run globally across pages.
//! - [`chunk_text`] — the freeform path. Windows prefer to end on a
//!   newline (looking back inside the window first, then ahead up to
//!   1.5 × `chunk_size` from the window start) so plain text is less
//!   likely to be cut mid-sentence.
//!
//! Windowing counts Unicode scalars, never bytes, so multi-byte text can
//! never be sliced through a code point. Windows that are empty after
//! trimming are dropped.

/// Split page texts into overlapping windows of `chunk_size` characters.
///
/// Chunk positions in the returned vector are the chunk indices: they
/// increment across pages in page order and are never reset per page. A
/// page shorter than `chunk_size` yields exactly one chunk.
pub fn chunk_pages(pages: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();

    for page in pages {
        let chars: Vec<char> = page.chars().collect();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + chunk_size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            if !window.trim().is_empty() {
                out.push(window);
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    out
}

/// Split freeform text into overlapping windows, preferring newline ends.
///
/// The window end is the nearest newline before the raw `chunk_size`
/// offset; failing that, the nearest newline after it but within
/// 1.5 × `chunk_size` of the window start; failing that, the raw offset.
/// The next window starts `overlap` characters before the chosen end.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let reach = chunk_size + chunk_size / 2;
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let raw_end = start + chunk_size;
        let end = if raw_end >= chars.len() {
            chars.len()
        } else {
            seek_newline(&chars, start, raw_end, (start + reach).min(chars.len()))
        };

        let window: String = chars[start..end].iter().collect();
        if !window.trim().is_empty() {
            out.push(window);
        }
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    out
}

/// Pick a window end near `raw_end`: last newline in the back half of the
/// window, else first newline before `cap`, else `raw_end` itself. Ends are
/// exclusive and placed just after the newline so it stays with the earlier
/// chunk. Newlines before the window midpoint are ignored, otherwise the
/// overlap rewind could trap successive windows on the same boundary.
fn seek_newline(chars: &[char], start: usize, raw_end: usize, cap: usize) -> usize {
    let mid = start + (raw_end - start) / 2;
    if let Some(i) = (mid + 1..raw_end).rev().find(|&i| chars[i] == '\n') {
        return i + 1;
    }
    if let Some(i) = (raw_end..cap).find(|&i| chars[i] == '\n') {
        return i + 1;
    }
    raw_end
}
