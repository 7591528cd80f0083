use std::io::{Read, Write};
use std::str::FromStr;
use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::debug;

use super::{RemoteConnector, RemoteEntry, RemoteFs, TransferError};
use crate::config::FtpConfig;

const CHUNK_SIZE: usize = 8192;

/// Opens plain FTP sessions against the game server.
pub struct FtpConnector {
    address: String,
    user: String,
    password: String,
}

impl FtpConnector {
    pub fn new(config: &FtpConfig) -> Self {
        Self {
            address: config.address(),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

impl RemoteConnector for FtpConnector {
    fn connect(&self) -> Result<Box<dyn RemoteFs>, TransferError> {
        let failed = |e: FtpError| TransferError::Connect {
            address: self.address.clone(),
            message: e.to_string(),
        };

        let mut stream = FtpStream::connect(self.address.as_str()).map_err(failed)?;
        stream
            .login(self.user.as_str(), self.password.as_str())
            .map_err(failed)?;
        stream.transfer_type(FileType::Binary).map_err(failed)?;

        debug!("FTP session open on {}", self.address);
        Ok(Box::new(FtpRemote { stream }))
    }
}

struct FtpRemote {
    stream: FtpStream,
}

/// Reply codes the server chose to send become `Rejected`; everything else
/// means the session is no longer usable.
fn classify(path: &str, err: FtpError) -> TransferError {
    let message = err.to_string();
    match err {
        FtpError::UnexpectedResponse(_) => TransferError::Rejected {
            path: path.to_string(),
            message,
        },
        _ => TransferError::Connection(message),
    }
}

fn lost(err: std::io::Error) -> TransferError {
    TransferError::Connection(err.to_string())
}

impl RemoteFs for FtpRemote {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let lines = self
            .stream
            .list(Some(dir))
            .map_err(|e| classify(dir, e))?;

        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            let entry = match ListEntry::from_str(&line) {
                Ok(entry) => entry,
                Err(_) => {
                    debug!("Skipping unparseable LIST line in {}: {}", dir, line);
                    continue;
                }
            };
            if matches!(entry.name(), "." | "..") {
                continue;
            }
            if entry.is_directory() || entry.is_file() {
                entries.push(RemoteEntry {
                    name: entry.name().to_string(),
                    is_dir: entry.is_directory(),
                    size: entry.size() as u64,
                });
            }
        }
        Ok(entries)
    }

    fn download(
        &mut self,
        path: &str,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError> {
        let mut data = self
            .stream
            .retr_as_stream(path)
            .map_err(|e| classify(path, e))?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = data.read(&mut buf).map_err(lost)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])
                .map_err(|source| TransferError::Io {
                    path: path.to_string(),
                    source,
                })?;
            written += n as u64;
            on_chunk(n as u64);
        }

        self.stream
            .finalize_retr_stream(data)
            .map_err(|e| classify(path, e))?;
        Ok(written)
    }

    fn upload(
        &mut self,
        path: &str,
        source: &mut dyn Read,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError> {
        let mut data = self
            .stream
            .put_with_stream(path)
            .map_err(|e| classify(path, e))?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = source.read(&mut buf).map_err(|source| TransferError::Io {
                path: path.to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }
            data.write_all(&buf[..n]).map_err(lost)?;
            sent += n as u64;
            on_chunk(n as u64);
        }

        self.stream
            .finalize_put_stream(data)
            .map_err(|e| classify(path, e))?;
        Ok(sent)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), TransferError> {
        self.stream.mkdir(path).map_err(|e| classify(path, e))
    }
}

impl Drop for FtpRemote {
    fn drop(&mut self) {
        if let Err(e) = self.stream.quit() {
            debug!("FTP session did not close cleanly: {}", e);
        }
    }
}
