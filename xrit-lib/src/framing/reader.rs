use std::io::{ErrorKind, Read};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver};
use tracing::{debug, error};

use super::Frame;
use crate::{Error, Result};

/// Iterates over fixed length frames read from a byte stream.
///
/// Iteration ends at a clean EOF. A trailing partial frame is reported once as an
/// error, after which iteration ends.
pub struct FrameReaderIter<R>
where
    R: Read + Send,
{
    reader: R,
    done: bool,
}

impl<R> FrameReaderIter<R>
where
    R: Read + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R> Iterator for FrameReaderIter<R>
where
    R: Read + Send,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; Frame::LEN];
        let mut filled = 0;
        while filled < Frame::LEN {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(Error::Io(err)));
                }
            }
        }

        match filled {
            0 => {
                self.done = true;
                None
            }
            Frame::LEN => Some(Ok(buf)),
            n => {
                self.done = true;
                Some(Err(Error::InvalidFrameSize {
                    actual: n,
                    expected: Frame::LEN,
                }))
            }
        }
    }
}

/// Read frame sized chunks of bytes from `reader`.
pub fn read_frames<R>(reader: R) -> impl Iterator<Item = Result<Vec<u8>>>
where
    R: Read + Send,
{
    FrameReaderIter::new(reader)
}

/// Like [read_frames], but reading is performed on a background thread that stays
/// up to `buffer` frames ahead of the consumer.
pub fn read_frames_threaded<R>(reader: R, buffer: usize) -> impl Iterator<Item = Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(buffer);

    let handle = thread::Builder::new()
        .name("frame_reader".into())
        .spawn(move || {
            for zult in FrameReaderIter::new(reader) {
                if tx.send(zult).is_err() {
                    debug!("frame receiver hung up");
                    break;
                }
            }
        });

    let handle = match handle {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!("failed to spawn frame reader: {err}");
            None
        }
    };

    ThreadedFrameIter { frames: rx, handle }
}

struct ThreadedFrameIter {
    frames: Receiver<Result<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for ThreadedFrameIter {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        // recv blocks current thread until data is available.
        match self.frames.recv() {
            Ok(zult) => Some(zult),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        error!("frame reader thread panicked");
                    }
                }
                None
            }
        }
    }
}
