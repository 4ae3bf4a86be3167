//! Revision object model
//!
//! Every revision is an immutable, content-addressed snapshot of a file set
//! linked to its parent. File maps are persistent (`im::OrdMap`), so a child
//! shares structure with its parent instead of deep-copying it.

use bytes::Bytes;
use chrono::DateTime;
use im::OrdMap;
use serde::{Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Length of a revision identifier in bytes (SHA-1)
pub const ID_LEN: usize = 20;

/// File snapshot of a revision, ordered by path
pub type FileMap = OrdMap<String, Bytes>;

/// Unique identifier of a revision (the "commit hash")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; ID_LEN]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Convert to lowercase hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string (either case)
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != ID_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; ID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Parse only the canonical lowercase rendering produced by [`to_hex`].
    ///
    /// [`to_hex`]: ObjectId::to_hex
    pub fn parse_canonical(hex_str: &str) -> Option<Self> {
        let id = Self::from_hex(hex_str).ok()?;
        (id.to_hex() == hex_str).then_some(id)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Minimal big-endian two's-complement encoding of the id read as a
    /// non-negative integer.
    ///
    /// Leading zero bytes are dropped; a single zero byte is kept in front
    /// when the most significant remaining bit is set. The all-zero id
    /// encodes as `[0]`.
    pub fn integer_bytes(&self) -> Vec<u8> {
        match self.0.iter().position(|b| *b != 0) {
            None => vec![0],
            Some(first) => {
                let mut out = Vec::with_capacity(ID_LEN - first + 1);
                if self.0[first] & 0x80 != 0 {
                    out.push(0);
                }
                out.extend_from_slice(&self.0[first..]);
                out
            }
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Classification of a path within a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    RegularFile,
    Directory,
    Nonexistent,
}

/// Immutable snapshot node
pub struct Revision {
    parent: Option<Arc<Revision>>,
    message: Option<String>,
    /// Creation time, milliseconds since the Unix epoch
    timestamp: i64,
    files: FileMap,
    id: OnceLock<ObjectId>,
}

impl Revision {
    /// Create a root revision with an empty file set
    pub fn root(timestamp: i64) -> Self {
        Self {
            parent: None,
            message: None,
            timestamp,
            files: FileMap::new(),
            id: OnceLock::new(),
        }
    }

    /// Create a child of `parent`: its files with `removed` deleted, then
    /// `added` inserted or overwritten.
    pub fn child<A, R>(
        parent: Arc<Revision>,
        message: Option<String>,
        timestamp: i64,
        added: A,
        removed: R,
    ) -> Self
    where
        A: IntoIterator<Item = (String, Bytes)>,
        R: IntoIterator<Item = String>,
    {
        let mut files = parent.files.clone();
        for path in removed {
            files.remove(&path);
        }
        for (path, content) in added {
            files.insert(path, content);
        }
        Self {
            parent: Some(parent),
            message,
            timestamp,
            files,
            id: OnceLock::new(),
        }
    }

    /// Content hash, computed on first use and cached.
    ///
    /// SHA-1 over, in order: the parent id as integer bytes (if any), the
    /// UTF-8 message (empty when absent), the timestamp as 8 little-endian
    /// bytes, then each path followed by its content in ascending path order.
    pub fn id(&self) -> ObjectId {
        if let Some(id) = self.id.get() {
            return *id;
        }
        // Hash uncached ancestors oldest first so no call recurses.
        let pending: Vec<&Revision> = self
            .ancestry()
            .take_while(|revision| revision.id.get().is_none())
            .collect();
        for revision in pending.iter().rev() {
            revision.id.get_or_init(|| revision.compute_id());
        }
        *self.id.get_or_init(|| self.compute_id())
    }

    fn compute_id(&self) -> ObjectId {
        let mut sha = Sha1::new();
        if let Some(parent) = &self.parent {
            sha.update(parent.id().integer_bytes());
        }
        sha.update(self.message.as_deref().unwrap_or_default().as_bytes());
        sha.update(self.timestamp.to_le_bytes());
        for (path, content) in self.files.iter() {
            sha.update(path.as_bytes());
            sha.update(content);
        }
        ObjectId(sha.finalize().into())
    }

    pub fn parent(&self) -> Option<&Arc<Revision>> {
        self.parent.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    /// Content of a single file
    pub fn file(&self, path: &str) -> Option<&Bytes> {
        self.files.get(path)
    }

    /// Check if this is a root revision (no parent)
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Classify `path`: an exact key is a file, a key under `path/` makes it
    /// a directory.
    pub fn stat(&self, path: &str) -> FileType {
        if self.files.contains_key(path) {
            return FileType::RegularFile;
        }
        let prefix = format!("{}/", path);
        if self.files.keys().any(|p| p.starts_with(&prefix)) {
            FileType::Directory
        } else {
            FileType::Nonexistent
        }
    }

    /// Walk from this revision to the root, most recent first
    pub fn ancestry(&self) -> Ancestry<'_> {
        Ancestry { next: Some(self) }
    }

    /// Materialized history, most recent first
    pub fn log(&self) -> Vec<LogEntry> {
        self.ancestry().map(LogEntry::from).collect()
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("id", &self.id())
            .field("parent", &self.parent.as_ref().map(|parent| parent.id()))
            .field("message", &self.message)
            .field("timestamp", &self.timestamp)
            .field("files", &self.files.len())
            .finish()
    }
}

impl Drop for Revision {
    // Unlink uniquely owned ancestors one at a time; the default drop
    // recurses once per ancestor.
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(parent) = next {
            next = match Arc::try_unwrap(parent) {
                Ok(mut revision) => revision.parent.take(),
                Err(_) => None,
            };
        }
    }
}

/// Iterator over a revision and its ancestors
pub struct Ancestry<'a> {
    next: Option<&'a Revision>,
}

impl<'a> Iterator for Ancestry<'a> {
    type Item = &'a Revision;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent.as_deref();
        Some(current)
    }
}

/// One line of history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub hash: ObjectId,
    pub timestamp: i64,
    pub message: Option<String>,
}

impl From<&Revision> for LogEntry {
    fn from(revision: &Revision) -> Self {
        Self {
            hash: revision.id(),
            timestamp: revision.timestamp,
            message: revision.message.clone(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Commit {}", self.hash)?;
        match DateTime::from_timestamp_millis(self.timestamp) {
            Some(date) => writeln!(f, "Date: {}", date.format("%a %b %d %H:%M:%S %Z %Y"))?,
            None => writeln!(f, "Date: {}", self.timestamp)?,
        }
        writeln!(f, "{}", self.message.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(path: &str, content: &'static [u8]) -> Vec<(String, Bytes)> {
        vec![(path.to_string(), Bytes::from_static(content))]
    }

    #[test]
    fn test_object_id_roundtrip() {
        let id = ObjectId::new([42u8; ID_LEN]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(ObjectId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_parse_canonical_rejects_uppercase() {
        let id = ObjectId::new([0xab; ID_LEN]);
        assert_eq!(ObjectId::parse_canonical(&id.to_hex()), Some(id));
        assert_eq!(ObjectId::parse_canonical(&id.to_hex().to_uppercase()), None);
        assert_eq!(ObjectId::parse_canonical("master"), None);
    }

    #[test]
    fn test_integer_bytes() {
        let mut raw = [0u8; ID_LEN];
        assert_eq!(ObjectId::new(raw).integer_bytes(), vec![0]);

        raw[ID_LEN - 1] = 0x7f;
        assert_eq!(ObjectId::new(raw).integer_bytes(), vec![0x7f]);

        raw[18] = 0x80;
        assert_eq!(ObjectId::new(raw).integer_bytes(), vec![0x00, 0x80, 0x7f]);

        let high = ObjectId::new([0xff; ID_LEN]).integer_bytes();
        assert_eq!(high.len(), ID_LEN + 1);
        assert_eq!(high[0], 0);
    }

    #[test]
    fn test_root_hash_is_stable() {
        let a = Revision::root(1_000);
        let b = Revision::root(1_000);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), a.id());
        assert_ne!(a.id(), Revision::root(1_001).id());
    }

    #[test]
    fn test_root_hash_known_value() {
        // SHA-1 of the 8 little-endian bytes of 0
        let root = Revision::root(0);
        assert_eq!(root.id().to_hex(), "05fe405753166f125559e7c9ac558654f107c7e9");
    }

    #[test]
    fn test_child_applies_changes() {
        let root = Arc::new(Revision::root(1));
        let first = Arc::new(Revision::child(
            root.clone(),
            Some("add".into()),
            2,
            add("a.txt", b"a"),
            Vec::<String>::new(),
        ));
        let second = Revision::child(
            first.clone(),
            Some("rm".into()),
            3,
            add("b.txt", b"b"),
            vec!["a.txt".to_string()],
        );
        assert!(root.files().is_empty());
        assert_eq!(first.file("a.txt").unwrap().as_ref(), b"a");
        assert!(second.file("a.txt").is_none());
        assert_eq!(second.file("b.txt").unwrap().as_ref(), b"b");
        assert_eq!(second.parent().unwrap().id(), first.id());
    }

    #[test]
    fn test_identical_inputs_identical_hash() {
        let root = Arc::new(Revision::root(10));
        let a = Revision::child(root.clone(), Some("m".into()), 11, add("x", b"1"), Vec::<String>::new());
        let b = Revision::child(root.clone(), Some("m".into()), 11, add("x", b"1"), Vec::<String>::new());
        let c = Revision::child(root, Some("m".into()), 11, add("x", b"2"), Vec::<String>::new());
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_missing_message_hashes_as_empty() {
        let root = Arc::new(Revision::root(10));
        let none = Revision::child(root.clone(), None, 11, Vec::new(), Vec::<String>::new());
        let empty = Revision::child(root, Some(String::new()), 11, Vec::new(), Vec::<String>::new());
        assert_eq!(none.id(), empty.id());
    }

    #[test]
    fn test_stat() {
        let root = Arc::new(Revision::root(1));
        let rev = Revision::child(root, None, 2, add("dir/file.txt", b"x"), Vec::<String>::new());
        assert_eq!(rev.stat("dir"), FileType::Directory);
        assert_eq!(rev.stat("dir/file.txt"), FileType::RegularFile);
        assert_eq!(rev.stat("di"), FileType::Nonexistent);
        assert_eq!(rev.stat("other"), FileType::Nonexistent);
    }

    #[test]
    fn test_log_walks_to_root() {
        let root = Arc::new(Revision::root(1));
        let first = Arc::new(Revision::child(root.clone(), Some("one".into()), 2, add("a", b"a"), Vec::<String>::new()));
        let second = Revision::child(first.clone(), Some("two".into()), 3, add("b", b"b"), Vec::<String>::new());

        let log = second.log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].message.as_deref(), Some("two"));
        assert_eq!(log[1].hash, first.id());
        assert_eq!(log[2].hash, root.id());
        assert_eq!(log[2].message, None);
        assert!(second.ancestry().last().unwrap().is_root());
    }

    #[test]
    fn test_deep_chain_hashes_and_drops_on_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let mut tip = Arc::new(Revision::root(0));
                for i in 0..200_000i64 {
                    tip = Arc::new(Revision::child(tip, None, i + 1, Vec::new(), Vec::<String>::new()));
                }
                let id = tip.id();
                assert_eq!(tip.ancestry().count(), 200_001);
                drop(tip);
                id
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_drop_keeps_shared_ancestors() {
        let root = Arc::new(Revision::root(1));
        let base = Arc::new(Revision::child(root, Some("base".into()), 2, add("a", b"a"), Vec::<String>::new()));
        let tip = Revision::child(base.clone(), Some("tip".into()), 3, add("b", b"b"), Vec::<String>::new());
        drop(tip);
        assert_eq!(base.ancestry().count(), 2);
        assert_eq!(base.file("a").unwrap().as_ref(), b"a");
    }

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry {
            hash: ObjectId::new([1u8; ID_LEN]),
            timestamp: 0,
            message: Some("hello".into()),
        };
        let text = entry.to_string();
        assert!(text.starts_with("Commit 0101"));
        assert!(text.contains("Date: Thu Jan 01 00:00:00 UTC 1970"));
        assert!(text.ends_with("hello\n"));
    }
}
