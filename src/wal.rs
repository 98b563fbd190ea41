use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Largest payload a record may carry. A longer length prefix is corruption.
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// Frame one event as `[u32 LE len][bincode payload][u32 LE crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "event too large for journal"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Frame {
    Event(Event),
    /// Clean end of file.
    End,
    /// Short read, checksum mismatch or undecodable payload.
    Damaged,
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    let mut first = [0u8; 1];
    if reader.read(&mut first)? == 0 {
        return Ok(Frame::End);
    }
    len_buf[0] = first[0];
    if !fill(reader, &mut len_buf[1..])? {
        return Ok(Frame::Damaged);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_RECORD_LEN {
        return Ok(Frame::Damaged);
    }
    let mut payload = vec![0u8; len as usize];
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut payload)? || !fill(reader, &mut crc_buf)? {
        return Ok(Frame::Damaged);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Damaged);
    }
    Ok(bincode::deserialize(&payload).map_or(Frame::Damaged, Frame::Event))
}

/// Result of reading a journal back.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A torn or corrupt record ended the replay early. Everything after it was ignored.
    pub discarded_tail: bool,
}

/// Append-only journal of domain events.
///
/// Appends are buffered and made durable by `flush_sync`, so one fsync covers
/// a whole group-commit batch. A batch that fails is cut off again with
/// `rollback`. A torn final record (crash mid-write) is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    unflushed: u64,
    appends_since_compact: u64,
    /// Set when a rollback itself failed; the file may end in records nobody committed.
    poisoned: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            unflushed: 0,
            appends_since_compact: 0,
            poisoned: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("journal needs compaction after a failed rollback"));
        }
        encode_event(&mut self.writer, event)?;
        self.unflushed += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.sync_data()?;
        self.committed_len = file.metadata()?.len();
        self.appends_since_compact += self.unflushed;
        self.unflushed = 0;
        Ok(())
    }

    /// Throw away everything since the last successful `flush_sync`: buffered
    /// bytes and whatever part of them already reached the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.unflushed = 0;
        let result = self.truncate_to_committed();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        // into_parts hands back the buffer instead of writing it out
        let (_stale, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(fresh)).into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_data()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` to the side file and fsync it. The live journal is untouched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the journal and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        // Persist the rename itself
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty())
            && let Ok(handle) = File::open(dir)
        {
            let _ = handle.sync_all();
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.unflushed = 0;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// A poisoned journal always reports itself due, so the compactor rewrites it.
    pub fn appends_since_compact(&self) -> u64 {
        if self.poisoned {
            return u64::MAX;
        }
        self.appends_since_compact
    }

    /// Read every intact record. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event) => replay.events.push(event),
                Frame::End => break,
                Frame::Damaged => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}
