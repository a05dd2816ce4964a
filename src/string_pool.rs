//! Interning pools for symbol and version names. Two pools are in play during
//! a link: a `NamePool` that canonicalizes every symbol/version name seen
//! during ingestion, and an `OutputStringPool` that accumulates the output
//! string table once finalization decides which names are actually emitted.

use foldhash::HashMap;

/// Key for an interned name. Keys are dense, positive and stable for the
/// lifetime of the pool. Key 0 is reserved so that it can stand for "no
/// version" in the symbol-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameKey(u32);

impl NameKey {
    /// The reserved zero key, standing for "no version" in table keys.
    pub const NONE: NameKey = NameKey(0);

    pub(crate) fn as_u32(self) -> u32 {
        self.0
    }

    pub(crate) fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Deduplicating store for name bytes. Equal inputs return the identical
/// canonical slice and key, so key equality is string equality and the
/// canonical pointer can be compared directly.
#[derive(Default)]
pub struct NamePool<'data> {
    lookup: HashMap<&'data [u8], NameKey>,
    entries: Vec<&'data [u8]>,
}

impl<'data> NamePool<'data> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bytes` to the pool if absent. Returns the canonical slice and its
    /// key. Names must not contain NUL; callers split at the terminator before
    /// interning.
    pub fn intern(&mut self, bytes: &'data [u8]) -> (&'data [u8], NameKey) {
        debug_assert!(!bytes.contains(&0), "attempted to intern a NUL-containing name");

        if let Some(&key) = self.lookup.get(bytes) {
            return (self.entries[key.0 as usize - 1], key);
        }
        let key = NameKey(u32::try_from(self.entries.len() + 1).expect("Name keys overflowed 32 bits"));
        self.entries.push(bytes);
        self.lookup.insert(bytes, key);
        (bytes, key)
    }

    /// Interns the first `len` bytes of `bytes`. Used to split `name@version`
    /// without copying.
    pub fn intern_prefix(&mut self, bytes: &'data [u8], len: usize) -> (&'data [u8], NameKey) {
        self.intern(&bytes[..len])
    }

    /// Non-inserting lookup.
    pub fn find(&self, bytes: &[u8]) -> Option<(&'data [u8], NameKey)> {
        self.lookup
            .get(bytes)
            .map(|&key| (self.entries[key.0 as usize - 1], key))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Builds the output string table: a leading NUL byte followed by
/// NUL-terminated names. Names are added as finalization walks the records,
/// so only names a final record references end up in the table.
pub struct OutputStringPool<'data> {
    offsets: HashMap<&'data [u8], u32>,
    data: Vec<u8>,
}

impl<'data> Default for OutputStringPool<'data> {
    fn default() -> Self {
        Self {
            offsets: HashMap::default(),
            data: vec![0],
        }
    }
}

impl<'data> OutputStringPool<'data> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` if not already present and returns its offset. The
    /// empty name maps to the leading NUL at offset 0.
    pub fn add(&mut self, bytes: &'data [u8]) -> u32 {
        if bytes.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.offsets.get(bytes) {
            return offset;
        }
        let offset = u32::try_from(self.data.len()).expect("Output string table overflowed 32 bits");
        self.data.extend_from_slice(bytes);
        self.data.push(0);
        self.offsets.insert(bytes, offset);
        offset
    }

    pub fn get_offset(&self, bytes: &[u8]) -> Option<u32> {
        if bytes.is_empty() {
            return Some(0);
        }
        self.offsets.get(bytes).copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        // The leading NUL is always present.
        self.data.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedupes_and_keys_are_stable() {
        let mut pool = NamePool::new();
        let (a1, k1) = pool.intern(b"foo");
        let (a2, k2) = pool.intern(b"foo");
        let (_b, k3) = pool.intern(b"bar");

        assert_eq!(k1, k2);
        assert!(std::ptr::eq(a1, a2));
        assert_ne!(k1, k3);
        assert_ne!(k1, NameKey::NONE);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn intern_prefix_matches_whole_string_intern() {
        let mut pool = NamePool::new();
        let (_, k1) = pool.intern_prefix(b"sym@VERS_1", 3);
        let (_, k2) = pool.intern(b"sym");
        assert_eq!(k1, k2);
    }

    #[test]
    fn find_does_not_insert() {
        let mut pool = NamePool::new();
        assert!(pool.find(b"foo").is_none());
        let (_, key) = pool.intern(b"foo");
        assert_eq!(pool.find(b"foo"), Some((&b"foo"[..], key)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn output_pool_layout() {
        let mut pool = OutputStringPool::new();
        let foo = pool.add(b"foo");
        let bar = pool.add(b"bar");
        assert_eq!(foo, 1);
        assert_eq!(bar, 5);
        assert_eq!(pool.add(b"foo"), foo);
        assert_eq!(pool.get_offset(b"bar"), Some(bar));
        assert_eq!(pool.get_offset(b""), Some(0));
        assert_eq!(pool.as_bytes(), b"\0foo\0bar\0");
    }
}
