//! Transfer packer: stream a local file or directory as a gzip-compressed
//! tar to an arbitrary consumer, lazily. Adapted from the tar-over-exec
//! pattern in `AnalyseDeCircuit-oxideterm`'s `sftp/tar_transfer.rs`
//! (`tar_encode_directory`/`ChunkWriter`), gzip-wrapped and rooted at
//! `basename(src)` per spec rather than oxideterm's `.` root.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 256 * 1024;

/// A diagnostic from the walk; dropping the receiver is fine, the stream
/// still completes — errors don't prevent emitted bytes reaching the
/// consumer, the stream simply ends.
pub type WalkDiagnostic = String;

struct ChunkWriter {
    tx: mpsc::Sender<Vec<u8>>,
    buf: Vec<u8>,
}

impl ChunkWriter {
    fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
            self.tx
                .blocking_send(chunk)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transfer stream closed"))?;
        }
        Ok(())
    }
}

impl io::Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.flush_buf()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()
    }
}

struct ChunkStreamReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ChunkStreamReader {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }
}

impl AsyncRead for ChunkStreamReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.pending.len() {
                let n = std::cmp::min(buf.remaining(), this.pending.len() - this.pos);
                buf.put_slice(&this.pending[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.pending = chunk;
                    this.pos = 0;
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Build a factory invocation: stream a gzip-compressed tar of `src`'s
/// regular files, rooted at `basename(src)`. Every call to this function
/// yields a fresh stream — concurrent consumption of one returned stream is
/// undefined, but the same `TaskDescriptor` may call this repeatedly to feed
/// multiple connectors serially.
pub fn pack_stream(
    src: PathBuf,
) -> (
    impl AsyncRead + Send + Unpin + 'static,
    mpsc::UnboundedReceiver<WalkDiagnostic>,
) {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
    let (diag_tx, diag_rx) = mpsc::unbounded_channel();

    tokio::task::spawn_blocking(move || {
        let root_name = src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        let writer = ChunkWriter::new(tx);
        let encoder = GzEncoder::new(writer, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.mode(tar::HeaderMode::Deterministic);

        let walk_result = if src.is_dir() {
            builder.append_dir_all(&root_name, &src)
        } else {
            std::fs::File::open(&src)
                .and_then(|mut f| builder.append_file(&root_name, &mut f))
        };
        if let Err(e) = walk_result {
            let _ = diag_tx.send(format!("walking {}: {}", src.display(), e));
        }

        let finish: io::Result<()> = (|| {
            use io::Write;
            let encoder = builder.into_inner()?;
            let mut writer = encoder.finish()?;
            writer.flush()
        })();
        if let Err(e) = finish {
            let _ = diag_tx.send(format!("finishing archive for {}: {}", src.display(), e));
        }
    });

    (ChunkStreamReader::new(rx), diag_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn packs_directory_into_tar_gz_rooted_at_basename() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        std::fs::create_dir(&pkg).unwrap();
        std::fs::write(pkg.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(pkg.join("sub")).unwrap();
        std::fs::write(pkg.join("sub/b.txt"), b"world").unwrap();

        let (mut stream, _diag) = pack_stream(pkg.clone());
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await.unwrap();

        let gz = flate2::read::GzDecoder::new(bytes.as_slice());
        let mut archive = tar::Archive::new(gz);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            if entry.header().entry_type().is_file() {
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                names.push((path, content));
            }
        }
        assert!(names
            .iter()
            .any(|(p, c)| p == "pkg/a.txt" && c == "hello"));
        assert!(names
            .iter()
            .any(|(p, c)| p == "pkg/sub/b.txt" && c == "world"));
    }
}
