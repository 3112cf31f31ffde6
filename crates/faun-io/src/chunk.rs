//! Windowed reads over a byte range of a file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// Restricts reads to the `[offset, offset + size)` window of a file.
///
/// A zero `size` leaves the window open through the end of the file. Seeks
/// are relative to the window, which is what container parsers expect when
/// an audio asset is packed inside a larger archive.
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    offset: u64,
    size: u64,
    pos: u64,
}

impl ChunkReader {
    /// Wrap `file`, windowing to `offset`/`size`, and seek to the start.
    pub fn new(mut file: File, offset: u32, size: u32) -> std::io::Result<Self> {
        file.seek(SeekFrom::Start(u64::from(offset)))?;
        Ok(Self {
            file,
            offset: u64::from(offset),
            size: u64::from(size),
            pos: 0,
        })
    }

    /// Window length in bytes, if bounded.
    pub fn window_len(&self) -> Option<u64> {
        if self.size > 0 {
            Some(self.size)
        } else {
            self.file.metadata().ok().map(|m| {
                m.len().saturating_sub(self.offset)
            })
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let want = if self.size > 0 {
            let left = self.size.saturating_sub(self.pos);
            buf.len().min(left as usize)
        } else {
            buf.len()
        };
        let n = self.file.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ChunkReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(d) => self.pos.saturating_add_signed(d),
            SeekFrom::End(d) => {
                let end = self.window_len().unwrap_or(0);
                end.saturating_add_signed(d)
            }
        };
        self.file.seek(SeekFrom::Start(self.offset + target))?;
        self.pos = target;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(data: &[u8]) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(data).unwrap();
        f
    }

    #[test]
    fn windowed_read_and_seek() {
        let f = file_with(b"0123456789");
        let mut r = ChunkReader::new(f, 2, 5).unwrap();

        let mut buf = [0u8; 16];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"23456");

        r.seek(SeekFrom::Start(1)).unwrap();
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"3456");

        r.seek(SeekFrom::End(-2)).unwrap();
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"56");
    }

    #[test]
    fn unbounded_window_reads_to_file_end() {
        let f = file_with(b"abcdef");
        let mut r = ChunkReader::new(f, 3, 0).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"def");
        assert_eq!(r.window_len(), Some(3));
    }
}
