use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use swarm_config::{PIECE_SIZE, POOL_SIZE, RECV_TIMEOUT};
use swarm_core::frame::request;
use swarm_core::hashing::{piece_count, piece_hash};
use swarm_core::utils::Logger;
use swarm_core::{SwarmError, SwarmResult};
use threadpool::ThreadPool;

use crate::piece_index::SharedPieceIndex;

/// Lifecycle of one `download_file` invocation, as shown by
/// `show_downloads`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DownloadPhase {
    Downloading,
    Downloaded,
    Failed,
}

/// Per-peer record of every download this process has attempted.
pub struct DownloadRegistry {
    inner: Mutex<BTreeMap<(String, String), DownloadPhase>>,
}

impl DownloadRegistry {
    pub fn new() -> DownloadRegistry {
        DownloadRegistry { inner: Mutex::new(BTreeMap::new()) }
    }

    pub fn start(&self, group: &str, file: &str) {
        self.inner
            .lock()
            .unwrap()
            .insert((group.to_string(), file.to_string()), DownloadPhase::Downloading);
    }

    pub fn finish(&self, group: &str, file: &str, ok: bool) {
        let phase = if ok { DownloadPhase::Downloaded } else { DownloadPhase::Failed };
        self.inner
            .lock()
            .unwrap()
            .insert((group.to_string(), file.to_string()), phase);
    }

    pub fn snapshot(&self) -> Vec<((String, String), DownloadPhase)> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn phase_of(&self, group: &str, file: &str) -> Option<DownloadPhase> {
        self.inner
            .lock()
            .unwrap()
            .get(&(group.to_string(), file.to_string()))
            .copied()
    }
}

impl Default for DownloadRegistry {
    fn default() -> Self {
        DownloadRegistry::new()
    }
}

/// What the tracker knows about a file: identity, size and the hash
/// vector (`hashes[0]` whole file, `hashes[i]` piece i).
pub struct FileMeta {
    pub file: String,
    pub group: String,
    pub size: u64,
    pub hashes: Vec<String>,
}

/// Fetch one file from the swarm.
///
/// Probes every advertised seeder for its available pieces, then runs one
/// fetch task per piece on a bounded pool. Each task picks a seeder
/// uniformly at random among the candidates that hold its piece, verifies
/// the bytes against the hash vector, writes them at the piece offset and
/// only then publishes the piece, making it seedable to others while the
/// rest of the file is still in flight.
pub fn download(
    meta: FileMeta,
    seeders: Vec<String>,
    dest: PathBuf,
    index: Arc<SharedPieceIndex>,
    registry: Arc<DownloadRegistry>,
    logger: Arc<Logger>,
    seed: Option<u64>,
) -> SwarmResult<()> {
    let n = piece_count(meta.size);
    if meta.hashes.len() as u32 != n + 1 {
        return Err(SwarmError::consistency("hash vector does not match file size"));
    }

    registry.start(&meta.group, &meta.file);
    File::create(&dest)?;
    index.register(&meta.file, &meta.group, &dest);

    if n == 0 {
        registry.finish(&meta.group, &meta.file, true);
        logger.success(format!("downloaded empty file {} into {}", meta.file, dest.display()));
        return Ok(());
    }

    let candidates = probe(&seeders, &meta.file, &meta.group, &logger);
    logger.info(format!(
        "download {}: {} pieces, {} reachable seeders",
        meta.file,
        n,
        candidates.values().flatten().collect::<std::collections::HashSet<_>>().len()
    ));

    let rng = Arc::new(Mutex::new(match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }));
    let pool = ThreadPool::new(POOL_SIZE);
    let failed = Arc::new(AtomicU32::new(0));
    let meta = Arc::new(meta);

    for piece in 1..=n {
        let mut holders = candidates.get(&piece).cloned().unwrap_or_default();
        if holders.is_empty() {
            logger.error(format!("piece {piece} of {}: no seeder holds it", meta.file));
            failed.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let meta = meta.clone();
        let dest = dest.clone();
        let index = index.clone();
        let logger = logger.clone();
        let rng = rng.clone();
        let failed = failed.clone();

        pool.execute(move || {
            let expected = &meta.hashes[piece as usize];
            while !holders.is_empty() {
                let choice = rng.lock().unwrap().gen_range(0..holders.len());
                let seeder = holders.swap_remove(choice);
                match fetch_piece(&seeder, &meta.file, &meta.group, piece) {
                    Ok(bytes) if piece_hash(&bytes) == *expected => {
                        match commit_piece(&dest, piece, &bytes) {
                            Ok(()) => {
                                // Bytes are on disk; only now is the piece
                                // published to our own seeder.
                                index.publish_piece(&dest, piece);
                                logger.info(format!(
                                    "piece {piece} of {} fetched from {seeder}",
                                    meta.file
                                ));
                                return;
                            }
                            Err(e) => {
                                logger.error(format!("writing piece {piece}: {e}"));
                            }
                        }
                    }
                    Ok(_) => {
                        logger.error(format!(
                            "piece {piece} of {} from {seeder} failed verification",
                            meta.file
                        ));
                    }
                    Err(e) => {
                        logger.error(format!("piece {piece} from {seeder}: {e}"));
                    }
                }
            }
            failed.fetch_add(1, Ordering::SeqCst);
        });
    }

    pool.join();

    let ok = failed.load(Ordering::SeqCst) == 0;
    registry.finish(&meta.group, &meta.file, ok);
    if ok {
        logger.success(format!("downloaded {} into {}", meta.file, dest.display()));
    } else {
        logger.error(format!(
            "download of {} failed: {} piece(s) unrecoverable",
            meta.file,
            failed.load(Ordering::SeqCst)
        ));
    }
    Ok(())
}

/// Ask every seeder which pieces it holds; unreachable seeders are simply
/// excluded. Returns piece index -> endpoints holding it.
fn probe(
    seeders: &[String],
    file: &str,
    group: &str,
    logger: &Arc<Logger>,
) -> HashMap<u32, Vec<String>> {
    let candidates: Arc<Mutex<HashMap<u32, Vec<String>>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut workers = Vec::new();

    for seeder in seeders {
        let seeder = seeder.clone();
        let file = file.to_string();
        let group = group.to_string();
        let candidates = candidates.clone();
        let logger = logger.clone();
        workers.push(thread::spawn(move || {
            match probe_one(&seeder, &file, &group) {
                Ok(pieces) => {
                    let mut map = candidates.lock().unwrap();
                    for piece in pieces {
                        map.entry(piece).or_default().push(seeder.clone());
                    }
                }
                Err(e) => logger.error(format!("probing {seeder}: {e}")),
            }
        }));
    }
    for worker in workers {
        let _ = worker.join();
    }

    Arc::try_unwrap(candidates)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default()
}

fn probe_one(seeder: &str, file: &str, group: &str) -> SwarmResult<Vec<u32>> {
    let mut stream = connect(seeder)?;
    let response = request(&mut stream, format!("give_piece_info {file} {group}").as_bytes())?;
    let body = strip_success(&response)?;
    let text = String::from_utf8_lossy(&body);
    let mut pieces = Vec::new();
    for token in text.split_whitespace() {
        let piece: u32 = token
            .parse()
            .map_err(|_| SwarmError::transport("malformed piece list from seeder"))?;
        pieces.push(piece);
    }
    Ok(pieces)
}

/// One `give_piece` round trip; the returned bytes are raw and unverified.
fn fetch_piece(seeder: &str, file: &str, group: &str, piece: u32) -> SwarmResult<Vec<u8>> {
    let mut stream = connect(seeder)?;
    let response = request(&mut stream, format!("give_piece {file} {group} {piece}").as_bytes())?;
    strip_success(&response)
}

fn connect(seeder: &str) -> SwarmResult<TcpStream> {
    let stream = TcpStream::connect(seeder)
        .map_err(|e| SwarmError::Transport(format!("connecting to {seeder}: {e}")))?;
    if let Some(timeout) = RECV_TIMEOUT {
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| SwarmError::Transport(e.to_string()))?;
    }
    Ok(stream)
}

/// Split a seeder response into its payload, raising relayed errors.
fn strip_success(response: &[u8]) -> SwarmResult<Vec<u8>> {
    if let Some(body) = response.strip_prefix(b"Success: ") {
        return Ok(body.to_vec());
    }
    if let Some(reason) = response.strip_prefix(b"Error: ") {
        return Err(SwarmError::Remote(String::from_utf8_lossy(reason).into_owned()));
    }
    Err(SwarmError::transport("malformed response from seeder"))
}

/// Write piece bytes at their offset. Every task opens its own handle, so
/// concurrent writes to distinct offsets never conflict.
fn commit_piece(dest: &Path, piece: u32, bytes: &[u8]) -> SwarmResult<()> {
    let mut file = OpenOptions::new().write(true).open(dest)?;
    file.seek(SeekFrom::Start((piece as u64 - 1) * PIECE_SIZE as u64))?;
    file.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_registry_phases() {
        let registry = DownloadRegistry::new();
        registry.start("g", "a.bin");
        assert_eq!(registry.phase_of("g", "a.bin"), Some(DownloadPhase::Downloading));
        registry.finish("g", "a.bin", true);
        assert_eq!(registry.phase_of("g", "a.bin"), Some(DownloadPhase::Downloaded));
        registry.finish("g", "a.bin", false);
        assert_eq!(registry.phase_of("g", "a.bin"), Some(DownloadPhase::Failed));
        assert!(registry.phase_of("g", "other").is_none());
    }

    #[test]
    fn test_strip_success_and_error() {
        assert_eq!(strip_success(b"Success: payload").unwrap(), b"payload");
        assert_eq!(strip_success(b"Success:  1 2").unwrap(), b" 1 2");
        assert!(matches!(strip_success(b"Error: nope"), Err(SwarmError::Remote(_))));
        assert!(matches!(strip_success(b"garbage"), Err(SwarmError::Transport(_))));
    }

    #[test]
    fn test_random_selection_spreads_over_candidates() {
        // Memoryless uniform choice: with two candidates and ten draws,
        // a seeded run must use both.
        let mut rng = StdRng::seed_from_u64(42);
        let mut chosen = std::collections::HashSet::new();
        for _ in 0..10 {
            let mut holders = vec!["a".to_string(), "b".to_string()];
            let pick = rng.gen_range(0..holders.len());
            chosen.insert(holders.swap_remove(pick));
        }
        assert!(chosen.contains("a") && chosen.contains("b"));
    }
}
