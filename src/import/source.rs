//! Where dump lines come from: a local file or a download, piped through a
//! filter that reduces the dump to title and link lines.

use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::dump::filter_xml;
use crate::config::dump_url;

/// Lines buffered between the filter and the import pipeline.
const FEED_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpSource {
    File(PathBuf),
    Url(String),
}

impl DumpSource {
    /// Explicit path or URL, else the latest dump for `lang`.
    pub fn resolve(lang: &str, dump: Option<&str>) -> Self {
        match dump {
            Some(d) if d.starts_with("http://") || d.starts_with("https://") => {
                DumpSource::Url(d.to_string())
            }
            Some(d) => DumpSource::File(PathBuf::from(d)),
            None => DumpSource::Url(dump_url(lang)),
        }
    }

    /// Uncompressed local XML, which is filtered in-process.
    pub fn is_plain_xml(&self) -> bool {
        match self {
            DumpSource::File(path) => path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml")),
            DumpSource::Url(_) => false,
        }
    }
}

impl fmt::Display for DumpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpSource::File(path) => write!(f, "{}", path.display()),
            DumpSource::Url(url) => f.write_str(url),
        }
    }
}

/// Blocking iterator over filtered lines. Dropping it stops the producer.
pub struct LineFeed {
    rx: mpsc::Receiver<String>,
}

impl Iterator for LineFeed {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.rx.blocking_recv()
    }
}

/// Start producing lines from `source`. Must be called inside a tokio runtime.
///
/// The handle resolves to the number of lines produced, or the input error.
pub fn spawn(source: DumpSource, filter_command: &str) -> (LineFeed, JoinHandle<Result<u64>>) {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    let handle = if source.is_plain_xml() {
        info!("Filtering {} in-process", source);
        tokio::task::spawn_blocking(move || read_xml(source, tx))
    } else {
        let command = filter_command.to_string();
        tokio::spawn(async move { run_filter(source, command, tx).await })
    };
    (LineFeed { rx }, handle)
}

fn read_xml(source: DumpSource, tx: mpsc::Sender<String>) -> Result<u64> {
    let DumpSource::File(path) = &source else {
        bail!("{} is not a local file", source);
    };
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open dump {}", path.display()))?;
    filter_xml(std::io::BufReader::new(file), |line| tx.blocking_send(line).is_ok())
}

async fn run_filter(source: DumpSource, command: String, tx: mpsc::Sender<String>) -> Result<u64> {
    info!("Reading {} through filter", source);
    debug!("Filter: {}", command);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to start filter")?;

    let mut stdin = child.stdin.take().context("Filter stdin unavailable")?;
    let stdout = child.stdout.take().context("Filter stdout unavailable")?;

    let writer = tokio::spawn(async move {
        let fed = copy_input(&source, &mut stdin).await;
        let _ = stdin.shutdown().await;
        fed
    });

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut lines = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        if tx.send(line).await.is_err() {
            debug!("Line consumer stopped after {} lines, stopping filter", lines);
            writer.abort();
            let _ = child.kill().await;
            return Ok(lines);
        }
        lines += 1;
    }

    let status = child.wait().await.context("Failed to wait for filter")?;
    let fed = writer.await.context("Input writer task failed")?;
    if !status.success() {
        bail!("Filter exited with {}", status);
    }
    let bytes = fed?;
    info!("Filter produced {} lines from {} bytes of input", lines, bytes);
    Ok(lines)
}

/// Copy the raw dump into the filter. A filter that stops reading early is not an error.
async fn copy_input(source: &DumpSource, stdin: &mut ChildStdin) -> Result<u64> {
    match source {
        DumpSource::File(path) => {
            let mut file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open dump {}", path.display()))?;
            match tokio::io::copy(&mut file, stdin).await {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(0),
                Err(e) => Err(e.into()),
            }
        }
        DumpSource::Url(url) => {
            info!("Downloading {}", url);
            let mut resp = reqwest::get(url)
                .await
                .with_context(|| format!("Failed to fetch {}", url))?
                .error_for_status()
                .with_context(|| format!("Failed to fetch {}", url))?;
            let mut total = 0u64;
            while let Some(chunk) = resp.chunk().await.context("Download interrupted")? {
                match stdin.write_all(&chunk).await {
                    Ok(()) => total += chunk.len() as u64,
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => break,
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(total)
        }
    }
}
