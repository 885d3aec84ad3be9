use std::fmt::Write;

/// Tracks where in a document validation currently is, as a JSON pointer
/// such as `/items/0/value`.
///
/// Segments are written into one reusable buffer, so pushing and popping
/// only allocates while the buffer grows to the deepest path seen.
#[derive(Clone, Debug, Default)]
pub struct PathBuffer {
    buf: String,
    prefix_len: usize,
    marks: Vec<usize>,
}

impl PathBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every location starts with `prefix`, e.g. `body` or `query`.
    pub fn with_prefix(prefix: &str) -> Self {
        PathBuffer {
            buf: prefix.to_owned(),
            prefix_len: prefix.len(),
            marks: Vec::new(),
        }
    }

    pub fn push_key(&mut self, key: &str) {
        self.marks.push(self.buf.len());
        self.buf.push('/');
        if key.contains(|c| c == '~' || c == '/') {
            for c in key.chars() {
                match c {
                    '~' => self.buf.push_str("~0"),
                    '/' => self.buf.push_str("~1"),
                    c => self.buf.push(c),
                }
            }
        } else {
            self.buf.push_str(key);
        }
    }

    pub fn push_index(&mut self, index: usize) {
        self.marks.push(self.buf.len());
        // Writing to a String cannot fail.
        let _ = write!(self.buf, "/{}", index);
    }

    pub fn pop(&mut self) {
        if let Some(mark) = self.marks.pop() {
            self.buf.truncate(mark);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn depth(&self) -> usize {
        self.marks.len()
    }

    pub fn reset(&mut self) {
        self.buf.truncate(self.prefix_len);
        self.marks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop() {
        let mut path = PathBuffer::new();
        assert_eq!("", path.as_str());

        path.push_key("items");
        path.push_index(12);
        path.push_key("value");
        assert_eq!("/items/12/value", path.as_str());
        assert_eq!(3, path.depth());

        path.pop();
        assert_eq!("/items/12", path.as_str());
        path.pop();
        path.pop();
        assert_eq!("", path.as_str());

        // Popping past the root is a no-op.
        path.pop();
        assert_eq!("", path.as_str());
    }

    #[test]
    fn escapes_keys() {
        let mut path = PathBuffer::new();
        path.push_key("a/b");
        path.push_key("m~n");
        assert_eq!("/a~1b/m~0n", path.as_str());
        path.pop();
        assert_eq!("/a~1b", path.as_str());
    }

    #[test]
    fn prefix_survives_reset() {
        let mut path = PathBuffer::with_prefix("body");
        path.push_key("name");
        assert_eq!("body/name", path.as_str());

        path.reset();
        assert_eq!("body", path.as_str());
        assert_eq!(0, path.depth());
    }
}
