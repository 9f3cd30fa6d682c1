//! Incremental line splitting over raw reads.
//!
//! A [`LineReader`] keeps the unterminated tail of the previous read and
//! glues it to the next one. Lines never exceed `capacity - 1` bytes: an
//! over-long line is delivered truncated once and the rest of it, up to and
//! including its terminator, is discarded.

/// Default buffer capacity, matches the classic stdio `BUFSIZ`.
pub const DEFAULT_LINE_CAPACITY: usize = 8192;

/// Smallest capacity that still leaves room for one content byte.
pub const MIN_LINE_CAPACITY: usize = 2;

/// Whether the reader is discarding the tail of a truncated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipState {
    NotSkipping,
    SkippingRestOfOversizeLine,
}

/// Bounded line buffer for one tailed file.
#[derive(Debug)]
pub struct LineReader {
    buf: Vec<u8>,
    capacity: usize,
    skip: SkipState,
    /// `buf` was handed out by the previous `next_line` call.
    delivered: bool,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_CAPACITY)
    }
}

impl LineReader {
    /// Creates a reader whose longest delivered line is `capacity - 1` bytes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_LINE_CAPACITY);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            skip: SkipState::NotSkipping,
            delivered: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes of an unterminated line currently held.
    pub fn buffered(&self) -> usize {
        if self.delivered { 0 } else { self.buf.len() }
    }

    pub fn skip_state(&self) -> SkipState {
        self.skip
    }

    /// Forgets any partial line and leaves skip mode. Used after reopening.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.skip = SkipState::NotSkipping;
        self.delivered = false;
    }

    fn max_line_len(&self) -> usize {
        self.capacity - 1
    }

    /// Returns the next complete line found in `input`, advancing `input`
    /// past the consumed bytes.
    ///
    /// Returns `None` once `input` holds no further terminator; whatever
    /// is left unterminated is kept for the next call. The terminator is
    /// not part of the returned slice.
    pub fn next_line<'s, 'i: 's>(&'s mut self, input: &mut &'i [u8]) -> Option<&'s [u8]> {
        if self.delivered {
            self.buf.clear();
            self.delivered = false;
        }

        loop {
            let data: &'i [u8] = *input;
            if data.is_empty() {
                return None;
            }

            if self.skip == SkipState::SkippingRestOfOversizeLine {
                match find_newline(data) {
                    Some(pos) => {
                        *input = &data[pos + 1..];
                        self.skip = SkipState::NotSkipping;
                        continue;
                    }
                    None => {
                        *input = &[];
                        return None;
                    }
                }
            }

            let room = self.max_line_len() - self.buf.len();
            let newline = find_newline(data);

            match newline {
                Some(pos) if pos <= room => {
                    *input = &data[pos + 1..];
                    let line = &data[..pos];
                    if self.buf.is_empty() {
                        return Some(line);
                    }
                    self.buf.extend_from_slice(line);
                    self.delivered = true;
                    return Some(self.buf.as_slice());
                }
                None if data.len() <= room => {
                    self.buf.extend_from_slice(data);
                    *input = &[];
                    return None;
                }
                _ => {
                    // Over-long: hand out the prefix, drop the rest of the line.
                    *input = &data[room..];
                    self.skip = SkipState::SkippingRestOfOversizeLine;
                    if self.buf.is_empty() {
                        return Some(&data[..room]);
                    }
                    self.buf.extend_from_slice(&data[..room]);
                    self.delivered = true;
                    return Some(self.buf.as_slice());
                }
            }
        }
    }

    /// Feeds one chunk and calls `f` for every complete line in it.
    pub fn feed<F: FnMut(&[u8])>(&mut self, chunk: &[u8], mut f: F) {
        let mut input = chunk;
        while let Some(line) = self.next_line(&mut input) {
            f(line);
        }
    }
}

fn find_newline(data: &[u8]) -> Option<usize> {
    data.iter().position(|&b| b == b'\n')
}
