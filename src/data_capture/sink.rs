//! Capture destinations: a regular file, or a named pipe a live reader
//! attaches to.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error_handling::types::SinkError;

/// Removes the named pipe at `path` when dropped.
#[derive(Debug)]
pub struct FifoGuard {
    path: PathBuf,
}

impl Drop for FifoGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed pipe {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove pipe {}: {}", self.path.display(), e),
        }
    }
}

/// Where container bytes go.
#[derive(Debug)]
pub struct OutputSink {
    file: File,
    // declared after `file` so the pipe is closed before it is unlinked
    fifo: Option<FifoGuard>,
}

impl OutputSink {
    pub fn is_pipe(&self) -> bool {
        self.fifo.is_some()
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Creates (or truncates) a regular output file.
pub fn create_file(path: &Path) -> Result<OutputSink, SinkError> {
    let file = File::create(path).map_err(SinkError::CreateFailed)?;
    Ok(OutputSink { file, fifo: None })
}

/// Makes sure a named pipe exists at `path`, creating it with mode 0600.
///
/// An existing pipe is reused; any other existing file is an error.
#[cfg(unix)]
pub fn ensure_fifo(path: &Path) -> Result<(), SinkError> {
    use nix::errno::Errno;
    use nix::sys::stat::Mode;
    use std::os::unix::fs::FileTypeExt;

    match nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
        Ok(()) => {
            debug!("created pipe {}", path.display());
            Ok(())
        }
        Err(Errno::EEXIST) => {
            let meta = std::fs::metadata(path).map_err(SinkError::PipeCreateFailed)?;
            if meta.file_type().is_fifo() {
                debug!("reusing existing pipe {}", path.display());
                Ok(())
            } else {
                Err(SinkError::NotAPipe(path.to_path_buf()))
            }
        }
        Err(errno) => Err(SinkError::PipeCreateFailed(errno.into())),
    }
}

#[cfg(not(unix))]
pub fn ensure_fifo(_path: &Path) -> Result<(), SinkError> {
    Err(SinkError::PipeUnsupported)
}

/// Creates the named pipe at `path` and waits until a reader opens it.
///
/// The pipe is removed again when the returned sink is dropped, or when
/// this future is dropped before a reader showed up.
pub async fn open_pipe(path: &Path) -> Result<OutputSink, SinkError> {
    ensure_fifo(path)?;
    let guard = FifoGuard {
        path: path.to_path_buf(),
    };

    info!("waiting for reader on {}...", path.display());
    let target = path.to_path_buf();
    // opening a pipe for writing blocks until the other end is opened
    let opened = tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new().write(true).open(target)
    })
    .await
    .map_err(|e| SinkError::PipeCreateFailed(io::Error::new(io::ErrorKind::Other, e)))?;

    let file = opened.map_err(SinkError::PipeCreateFailed)?;
    info!("reader attached to {}", path.display());
    Ok(OutputSink {
        file,
        fifo: Some(guard),
    })
}
