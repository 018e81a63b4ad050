//! Bounded blocking byte pipe between a minifier thread and the builder.
//!
//! The writer side buffers up to `chunk_size` bytes and hands full chunks
//! over a bounded crossbeam channel, so a fast producer blocks once
//! `capacity` chunks are in flight and a fast reader blocks on an empty
//! channel. The writer must call [`PipeWriter::finish`] for the stream to
//! end cleanly; dropping it unfinished (early return, error, panic) makes
//! the reader fail instead of seeing a truncated but "complete" stream.

use std::io::{self, Read, Write};

use crossbeam::channel::{bounded, Receiver, Sender};

/// Default number of chunks in flight
pub const DEFAULT_CAPACITY: usize = 16;

/// Default chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

enum Chunk {
    Data(Vec<u8>),
    End,
}

/// Create a connected writer/reader pair
pub fn pipe(capacity: usize, chunk_size: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(capacity.max(1));
    let chunk_size = chunk_size.max(1);
    (
        PipeWriter {
            tx: Some(tx),
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
            written: 0,
        },
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
            state: ReadState::Open,
        },
    )
}

/// Producer side, owned by the minifier thread
pub struct PipeWriter {
    tx: Option<Sender<Chunk>>,
    buf: Vec<u8>,
    chunk_size: usize,
    written: u64,
}

impl PipeWriter {
    fn send(&mut self, chunk: Chunk) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe already finished"))?;
        tx.send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader is gone"))
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let full = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        self.send(Chunk::Data(full))
    }

    /// End the stream cleanly and release the reader
    pub fn finish(mut self) -> io::Result<u64> {
        self.send_buffered()?;
        self.send(Chunk::End)?;
        self.tx = None;
        Ok(self.written)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_none() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe already finished"));
        }
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        self.written += n as u64;
        if self.buf.len() == self.chunk_size {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    Ended,
}

/// Consumer side, drained by the builder thread
pub struct PipeReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    state: ReadState,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            if self.state == ReadState::Ended {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                }
                Ok(Chunk::End) => self.state = ReadState::Ended,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "minifier stopped without finishing its output",
                    ))
                }
            }
        }
        let n = out.len().min(self.current.len() - self.pos);
        out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    // ==================== pipe tests ====================

    #[test]
    fn test_pipe_roundtrip_small() {
        let (mut writer, mut reader) = pipe(2, 4);
        let producer = thread::spawn(move || {
            writer.write_all(b"a{color:red}").unwrap();
            writer.finish().unwrap()
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(producer.join().unwrap(), 12);
        assert_eq!(out, b"a{color:red}");
    }

    #[test]
    fn test_pipe_output_larger_than_capacity() {
        // 1 MiB through a pipe that holds at most 2 x 64 bytes
        let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let (mut writer, mut reader) = pipe(2, 64);

        let producer = thread::spawn(move || {
            for part in payload.chunks(1000) {
                writer.write_all(part).unwrap();
            }
            writer.finish().unwrap();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        producer.join().unwrap();

        assert_eq!(out.len(), expected.len());
        assert_eq!(out, expected);
    }

    #[test]
    fn test_dropped_writer_fails_reader() {
        let (mut writer, mut reader) = pipe(4, 8);
        let producer = thread::spawn(move || {
            writer.write_all(b"partial output").unwrap();
            // dropped without finish()
        });

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        producer.join().unwrap();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_dropped_reader_releases_writer() {
        let (mut writer, reader) = pipe(1, 1);
        drop(reader);

        let err = writer.write_all(b"xyz").unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_empty_stream() {
        let (writer, mut reader) = pipe(1, 16);
        writer.finish().unwrap();

        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_finish_reports_bytes_written() {
        let (mut writer, mut reader) = pipe(8, 3);
        writer.write_all(b"12345").unwrap();
        assert_eq!(writer.finish().unwrap(), 5);

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "12345");
    }
}
