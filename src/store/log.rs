use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::Crc;
use tracing::{debug, warn};

use super::{ScanIter, Store};
use crate::config::Options;
use crate::errcorrupt;
use crate::error::{Error, Result};
use crate::flock::FileLock;

const MAGIC: [u8; 4] = *b"jotd";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;

const OP_PUT: u8 = 0x01;
const OP_DELETE: u8 = 0x02;
const OP_COMMIT: u8 = 0x03;

// Length sanity bound: a torn length field must not trigger a huge
// allocation during replay.
const MAX_RECORD_LEN: u32 = 1 << 30;

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// A durable engine backed by an append-only log of CRC-framed records,
/// with the live state indexed in memory.
///
/// Records are `put`, `delete`, or `commit`. Writes are staged in file
/// order and become effective at the commit record: replay applies a
/// transaction's records only once their commit record is seen, so a crash
/// mid-transaction discards the whole transaction. Any torn or uncommitted
/// suffix is truncated away on open.
pub struct Log {
    file: File,
    writer: BufWriter<File>,
    index: BTreeMap<Vec<u8>, Vec<u8>>,
    undo: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    /// Logical end of the log, including buffered appends.
    len: u64,
    /// End of the last committed transaction.
    committed_len: u64,
    sync: bool,
    path: PathBuf,
    _lock: FileLock,
}

impl Log {
    /// Opens or creates a log store at `path`, locking it against other
    /// writers and replaying its committed state.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        let lock = FileLock::lock(&lock_path)?;

        let mut file = File::options().create(true).read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        let mut index = BTreeMap::new();
        let committed_len = if file_len == 0 {
            file.write_all(&MAGIC)?;
            file.write_u32::<BigEndian>(VERSION)?;
            file.sync_all()?;
            HEADER_LEN
        } else {
            file.seek(SeekFrom::Start(0))?;
            let mut reader = BufReader::new(file.try_clone()?);
            Self::read_header(&mut reader)?;
            Self::replay(&mut reader, &mut index)?
        };

        if committed_len < file_len {
            warn!(
                path = %path.display(),
                discarded = file_len - committed_len,
                "discarding uncommitted log suffix"
            );
            file.set_len(committed_len)?;
        }
        file.seek(SeekFrom::Start(committed_len))?;
        let writer = BufWriter::new(file.try_clone()?);

        debug!(path = %path.display(), records = index.len(), "opened log store");
        Ok(Self {
            file,
            writer,
            index,
            undo: Vec::new(),
            len: committed_len,
            committed_len,
            sync: options.sync,
            path,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_header(reader: &mut impl Read) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if magic != MAGIC {
            return errcorrupt!("not a jotdb log store");
        }
        let version = reader.read_u32::<BigEndian>().map_err(truncated)?;
        if version != VERSION {
            return errcorrupt!("unsupported log store version {version}");
        }
        Ok(())
    }

    /// Replays the log, applying each transaction at its commit record.
    /// Returns the offset just past the last committed transaction.
    fn replay(reader: &mut impl Read, index: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<u64> {
        let mut staged: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();
        let mut offset = HEADER_LEN;
        let mut committed = HEADER_LEN;
        loop {
            let (op, key, value, size) = match Self::read_record(reader) {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(Error::Corrupt(msg)) => {
                    warn!(%msg, "log replay stopped at undecodable record");
                    break;
                }
                Err(err) => return Err(err),
            };
            offset += size;
            match op {
                OP_PUT => staged.push((key, Some(value))),
                OP_DELETE => staged.push((key, None)),
                OP_COMMIT => {
                    for (key, value) in staged.drain(..) {
                        match value {
                            Some(value) => index.insert(key, value),
                            None => index.remove(&key),
                        };
                    }
                    committed = offset;
                }
                op => {
                    warn!(op, "log replay stopped at unknown record type");
                    break;
                }
            }
        }
        Ok(committed)
    }

    /// Reads one record, returning None at a clean end of the log. A record
    /// that is truncated, implausibly sized, or fails its checksum yields a
    /// corruption error.
    fn read_record(reader: &mut impl Read) -> Result<Option<(u8, Vec<u8>, Vec<u8>, u64)>> {
        let op = match reader.read_u8() {
            Ok(op) => op,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let key_len = reader.read_u32::<BigEndian>().map_err(truncated)?;
        if key_len > MAX_RECORD_LEN {
            return errcorrupt!("implausible record key length {key_len}");
        }
        let mut key = vec![0; key_len as usize];
        reader.read_exact(&mut key).map_err(truncated)?;

        let value_len = reader.read_u32::<BigEndian>().map_err(truncated)?;
        if value_len > MAX_RECORD_LEN {
            return errcorrupt!("implausible record value length {value_len}");
        }
        let mut value = vec![0; value_len as usize];
        reader.read_exact(&mut value).map_err(truncated)?;

        let stored = reader.read_u32::<BigEndian>().map_err(truncated)?;
        if stored != checksum(op, &key, &value) {
            return errcorrupt!("record checksum mismatch");
        }

        let size = 13 + key_len as u64 + value_len as u64;
        Ok(Some((op, key, value, size)))
    }

    fn append(&mut self, op: u8, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer.write_u8(op)?;
        self.writer.write_u32::<BigEndian>(key.len() as u32)?;
        self.writer.write_all(key)?;
        self.writer.write_u32::<BigEndian>(value.len() as u32)?;
        self.writer.write_all(value)?;
        self.writer.write_u32::<BigEndian>(checksum(op, key, value))?;
        self.len += 13 + key.len() as u64 + value.len() as u64;
        Ok(())
    }
}

fn checksum(op: u8, key: &[u8], value: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&[op]);
    digest.update(key);
    digest.update(value);
    digest.finalize()
}

/// Maps an unexpected EOF inside a record to a corruption error.
fn truncated(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Corrupt("log record truncated".to_string())
    } else {
        err.into()
    }
}

impl Store for Log {
    type ScanIterator<'a> = ScanIter<'a>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.index.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.append(OP_PUT, key, &value)?;
        let prior = self.index.insert(key.to_vec(), value);
        self.undo.push((key.to_vec(), prior));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        if !self.index.contains_key(key) {
            return Ok(());
        }
        self.append(OP_DELETE, key, &[])?;
        let prior = self.index.remove(key);
        self.undo.push((key.to_vec(), prior));
        Ok(())
    }

    fn scan(&self, lo: &[u8], hi: &[u8]) -> Self::ScanIterator<'_> {
        ScanIter::new(&self.index, lo, hi)
    }

    fn commit(&mut self) -> Result<()> {
        if self.undo.is_empty() && self.len == self.committed_len {
            return Ok(());
        }
        self.writer.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        self.append(OP_COMMIT, &[], &[])?;
        self.writer.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        self.committed_len = self.len;
        self.undo.clear();
        debug!(path = %self.path.display(), bytes = self.committed_len, "committed log store");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        // Push any buffered appends out, then cut the file back to the
        // committed prefix. The writer's clone shares the file cursor, so
        // the seek repositions both.
        self.writer.flush()?;
        self.file.set_len(self.committed_len)?;
        self.file.seek(SeekFrom::Start(self.committed_len))?;
        self.len = self.committed_len;
        for (key, prior) in self.undo.drain(..).rev() {
            match prior {
                Some(value) => self.index.insert(key, value),
                None => self.index.remove(&key),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_path(dir: &TempDir) -> PathBuf {
        dir.path().join("store.jot")
    }

    #[test]
    fn test_commit_persists_across_reopen() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let mut store = Log::open(store_path(&dir), Options::default()).unwrap();
        store.put(b"a", b"1".to_vec()).unwrap();
        store.put(b"b", b"2".to_vec()).unwrap();
        store.delete(b"a").unwrap();
        store.commit().unwrap();
        drop(store);

        let store = Log::open(store_path(&dir), Options::default()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_uncommitted_writes_are_discarded_on_reopen() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let mut store = Log::open(store_path(&dir), Options::default()).unwrap();
        store.put(b"a", b"1".to_vec()).unwrap();
        store.commit().unwrap();
        store.put(b"b", b"2".to_vec()).unwrap();
        // No commit record: dropping simulates a crash mid-transaction.
        drop(store);

        let store = Log::open(store_path(&dir), Options::default()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
    }

    #[test]
    fn test_rollback_reverts_index_and_file() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let mut store = Log::open(store_path(&dir), Options::default()).unwrap();
        store.put(b"a", b"1".to_vec()).unwrap();
        store.commit().unwrap();

        store.put(b"a", b"2".to_vec()).unwrap();
        store.put(b"b", b"3".to_vec()).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);

        // The store keeps working after a rollback.
        store.put(b"c", b"4".to_vec()).unwrap();
        store.commit().unwrap();
        drop(store);
        let store = Log::open(store_path(&dir), Options::default()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"c").unwrap(), Some(b"4".to_vec()));
    }

    #[test]
    fn test_corrupt_tail_loses_only_last_transaction() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let mut store = Log::open(store_path(&dir), Options::default()).unwrap();
        store.put(b"a", b"1".to_vec()).unwrap();
        store.commit().unwrap();
        store.put(b"b", b"2".to_vec()).unwrap();
        store.commit().unwrap();
        drop(store);

        // Flip a byte in the second transaction's commit checksum.
        let mut bytes = std::fs::read(store_path(&dir)).unwrap();
        let len = bytes.len();
        bytes[len - 2] ^= 0xff;
        std::fs::write(store_path(&dir), &bytes).unwrap();

        let store = Log::open(store_path(&dir), Options::default()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        std::fs::write(store_path(&dir), b"definitely not a log store").unwrap();
        assert!(matches!(
            Log::open(store_path(&dir), Options::default()),
            Err(Error::Corrupt(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_second_open_fails_while_locked() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let store = Log::open(store_path(&dir), Options::default()).unwrap();
        assert!(Log::open(store_path(&dir), Options::default()).is_err());
        drop(store);
        assert!(Log::open(store_path(&dir), Options::default()).is_ok());
    }

    #[test]
    fn test_scan_reflects_uncommitted_writes() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let mut store = Log::open(store_path(&dir), Options::new().sync(false)).unwrap();
        store.put(b"a", b"1".to_vec()).unwrap();
        store.put(b"c", b"3".to_vec()).unwrap();
        store.put(b"b", b"2".to_vec()).unwrap();
        let keys: Vec<_> = store.scan(b"a", b"c").map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_empty_commit_is_a_no_op() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let mut store = Log::open(store_path(&dir), Options::default()).unwrap();
        store.commit().unwrap();
        let len = store.file.metadata().unwrap().len();
        assert_eq!(len, HEADER_LEN);
    }
}
