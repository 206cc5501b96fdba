use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The peer's record of which pieces of which local files are presently
/// seedable. Two maps behind two locks:
///
///   (file-name, group-name) -> local path
///   local path -> available piece indices (1-based, file order)
///
/// Whoever needs both locks takes the name map first, then the piece map.
/// Neither lock is ever held across file I/O.
pub struct SharedPieceIndex {
    paths: Mutex<HashMap<(String, String), PathBuf>>,
    pieces: Mutex<HashMap<PathBuf, Vec<u32>>>,
}

impl SharedPieceIndex {
    pub fn new() -> SharedPieceIndex {
        SharedPieceIndex {
            paths: Mutex::new(HashMap::new()),
            pieces: Mutex::new(HashMap::new()),
        }
    }

    /// Map (file, group) to a local path and give it an empty piece list,
    /// so a probe arriving before the first piece sees "nothing yet"
    /// rather than "unknown file".
    pub fn register(&self, file: &str, group: &str, path: &Path) {
        let mut paths = self.paths.lock().unwrap();
        let mut pieces = self.pieces.lock().unwrap();
        paths.insert((file.to_string(), group.to_string()), path.to_path_buf());
        pieces.entry(path.to_path_buf()).or_default();
    }

    /// Publish one piece. Appending is monotonic; a duplicate publish is a
    /// no-op. The caller must have written the bytes to disk first.
    pub fn publish_piece(&self, path: &Path, index: u32) {
        let mut pieces = self.pieces.lock().unwrap();
        let list = pieces.entry(path.to_path_buf()).or_default();
        if !list.contains(&index) {
            list.push(index);
        }
    }

    /// Publish pieces 1..=count at once (a freshly uploaded seed file).
    pub fn publish_all(&self, path: &Path, count: u32) {
        let mut pieces = self.pieces.lock().unwrap();
        let list = pieces.entry(path.to_path_buf()).or_default();
        for index in 1..=count {
            if !list.contains(&index) {
                list.push(index);
            }
        }
    }

    pub fn path_of(&self, file: &str, group: &str) -> Option<PathBuf> {
        self.paths
            .lock()
            .unwrap()
            .get(&(file.to_string(), group.to_string()))
            .cloned()
    }

    /// Available piece indices for (file, group); `None` when the pair is
    /// unknown. A name entry whose piece list has disappeared is stale and
    /// gets dropped here.
    pub fn available(&self, file: &str, group: &str) -> Option<Vec<u32>> {
        let key = (file.to_string(), group.to_string());
        let mut paths = self.paths.lock().unwrap();
        let pieces = self.pieces.lock().unwrap();
        let path = paths.get(&key)?.clone();
        match pieces.get(&path) {
            Some(list) => Some(list.clone()),
            None => {
                paths.remove(&key);
                None
            }
        }
    }

    pub fn has_piece(&self, path: &Path, index: u32) -> bool {
        self.pieces
            .lock()
            .unwrap()
            .get(path)
            .map(|list| list.contains(&index))
            .unwrap_or(false)
    }

    /// Stop-share cleanup: forget the mapping and its piece list.
    pub fn withdraw(&self, file: &str, group: &str) {
        let key = (file.to_string(), group.to_string());
        let mut paths = self.paths.lock().unwrap();
        let mut pieces = self.pieces.lock().unwrap();
        if let Some(path) = paths.remove(&key) {
            pieces.remove(&path);
        }
    }
}

impl Default for SharedPieceIndex {
    fn default() -> Self {
        SharedPieceIndex::new()
    }
}
