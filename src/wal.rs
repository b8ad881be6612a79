use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::model::Event;

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const HEADER_LEN: usize = 4;
const CRC_LEN: usize = 4;

/// `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`
#[derive(Debug, Default, Clone, Copy)]
pub struct WalCodec;

impl Encoder<&Event> for WalCodec {
    type Error = io::Error;

    fn encode(&mut self, event: &Event, dst: &mut BytesMut) -> io::Result<()> {
        let payload =
            bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        dst.reserve(HEADER_LEN + payload.len() + CRC_LEN);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
        dst.put_u32_le(crc32fast::hash(&payload));
        Ok(())
    }
}

impl Decoder for WalCodec {
    type Item = Event;
    type Error = io::Error;

    /// `Ok(None)` means the buffer holds only part of a frame.
    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Event>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame length out of range"));
        }
        if src.len() < HEADER_LEN + len + CRC_LEN {
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        let stored_crc = src.get_u32_le();
        if stored_crc != crc32fast::hash(&payload) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "checksum mismatch"));
        }
        bincode::deserialize(&payload)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Append-only write-ahead log of one tenant.
///
/// A torn final frame (crash mid-write) or a corrupt frame ends replay; every
/// event before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    scratch: BytesMut,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            scratch: BytesMut::new(),
            appends_since_compact: 0,
        })
    }

    /// Single append + fsync.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.scratch.clear();
        WalCodec.encode(event, &mut self.scratch)?;
        self.writer.write_all(&self.scratch)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over the
    /// live file and reopen it for appending.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut buf = BytesMut::new();
            for event in events {
                WalCodec.encode(event, &mut buf)?;
            }
            let mut file = File::create(&tmp_path)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay `path`, cut any torn or corrupt tail off the file and open it for
    /// appending. New frames always follow the last intact one.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, intact_len) = Self::read_intact(path)?;
        if let Some(intact_len) = intact_len {
            let file = OpenOptions::new().write(true).open(path)?;
            if file.metadata()?.len() > intact_len {
                warn!(path = %path.display(), intact_len, "truncating WAL to last intact frame");
                file.set_len(intact_len)?;
                file.sync_all()?;
            }
        }
        Ok((Self::open(path)?, events))
    }

    /// Read every intact event from `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::read_intact(path).map(|(events, _)| events)
    }

    /// Intact events plus the byte length they occupy; `None` when the file
    /// does not exist.
    fn read_intact(path: &Path) -> io::Result<(Vec<Event>, Option<u64>)> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), None)),
            Err(e) => return Err(e),
        };
        let mut buf = BytesMut::from(&data[..]);
        let mut codec = WalCodec;
        let mut events = Vec::new();
        let mut intact_len = 0u64;

        loop {
            let before = buf.len();
            match codec.decode(&mut buf) {
                Ok(Some(event)) => {
                    intact_len += (before - buf.len()) as u64;
                    events.push(event);
                }
                Ok(None) => {
                    if !buf.is_empty() {
                        warn!(path = %path.display(), bytes = buf.len(), "discarding torn WAL tail");
                    }
                    break;
                }
                Err(e) => {
                    warn!(path = %path.display(), kept = events.len(), "WAL replay stopped: {e}");
                    break;
                }
            }
        }

        Ok((events, Some(intact_len)))
    }
}
