//! Splitting report files into chunks.
//!
//! Chunks are processed concurrently; the files inside one chunk are
//! processed one after another. The chunk size therefore bounds how many
//! files are in flight at once only indirectly, through the number of
//! chunks: `ceil(files / chunk_size)`.
//!
//! # Example
//!
//! ```
//! use resultsync::publish::Chunker;
//!
//! let chunker = Chunker::new(2);
//! let files = vec!["a.json", "b.json", "c.json"];
//!
//! let chunks = chunker.chunk(&files);
//! assert_eq!(chunks, vec![vec!["a.json", "b.json"], vec!["c.json"]]);
//! ```

/// Groups items into order-preserving chunks of a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Creates a chunker. A size of 0 is clamped to 1.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Splits `items` into consecutive groups of `chunk_size`; the last
    /// group may be smaller. No item is dropped or duplicated.
    pub fn chunk<T: Clone>(&self, items: &[T]) -> Vec<Vec<T>> {
        items
            .chunks(self.chunk_size)
            .map(<[T]>::to_vec)
            .collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_preserves_order() {
        let items: Vec<u32> = (0..25).collect();
        let chunks = Chunker::new(10).chunk(&items);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
        assert_eq!(chunks.concat(), items);
    }

    #[test]
    fn test_chunk_empty() {
        let chunks = Chunker::new(3).chunk::<u32>(&[]);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let chunker = Chunker::new(0);
        assert_eq!(chunker.chunk_size(), 1);
        assert_eq!(chunker.chunk(&[1, 2, 3]).len(), 3);
    }

    #[test]
    fn test_chunk_larger_than_input() {
        let chunks = Chunker::new(50).chunk(&["a", "b"]);
        assert_eq!(chunks, vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_default_size() {
        assert_eq!(Chunker::default().chunk_size(), 10);
    }
}
