/// Transfer tool supervisor.
///
/// Launches one external transfer per job (aria2c in turbo mode, curl
/// otherwise), scrapes progress from its console output while it runs,
/// then hands a successful download to the extractor. Tool chatter that
/// carries no progress is forwarded to tracing.
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use storegame_shared::config::DownloaderConfig;
use storegame_shared::errors::TransferError;
use storegame_shared::models::{
    ProgressUpdate, TerminalEvent, EXTRACTING_PERCENT, STATUS_CANCELLED, STATUS_EXTRACTING,
    STATUS_EXTRACTION_FAILED, STATUS_STARTING, STATUS_TRANSFER_FAILED,
};

use crate::probe::TransferStrategy;
use crate::progress::{parse_progress_line, parse_readout_line};
use crate::workers::extractor::Extractor;

/// One unit of work for the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub item: String,
    /// Full URL of the archive.
    pub source_url: String,
    /// Category directory the archive is written to and unpacked in.
    pub dest_dir: PathBuf,
}

impl TransferJob {
    /// `<dest_dir>/<item>`.
    pub fn archive_path(&self) -> PathBuf {
        self.dest_dir.join(&self.item)
    }
}

/// Program plus arguments for one transfer tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TransferCommand {
    pub fn build(strategy: TransferStrategy, config: &DownloaderConfig, job: &TransferJob) -> Self {
        match strategy {
            TransferStrategy::Turbo => Self::turbo(config, job),
            TransferStrategy::Fallback => Self::fallback(config, job),
        }
    }

    fn turbo(config: &DownloaderConfig, job: &TransferJob) -> Self {
        let mut args = vec![
            "-x".to_string(),
            config.connections.to_string(),
            "-s".to_string(),
            config.splits.to_string(),
            "-j".to_string(),
            config.concurrency.to_string(),
            // The ROM hosts serve broken certificate chains.
            "--check-certificate=false".to_string(),
            "--console-log-level=error".to_string(),
            "--summary-interval=1".to_string(),
            "--human-readable=true".to_string(),
            "--file-allocation=none".to_string(),
            "--allow-overwrite=true".to_string(),
            "--auto-file-renaming=false".to_string(),
            format!("--connect-timeout={}", config.connect_timeout_secs),
            format!("--max-tries={}", config.max_tries),
            format!("--retry-wait={}", config.retry_wait_secs),
            "--dir".to_string(),
            job.dest_dir.to_string_lossy().to_string(),
            "--out".to_string(),
            job.item.clone(),
        ];
        if let Some(referer) = &config.referer {
            args.push(format!("--referer={}", referer));
        }
        args.push(job.source_url.clone());

        Self {
            program: config.turbo_tool.clone(),
            args,
        }
    }

    fn fallback(config: &DownloaderConfig, job: &TransferJob) -> Self {
        Self {
            program: config.fallback_tool.clone(),
            args: vec![
                "-L".to_string(),
                "--connect-timeout".to_string(),
                config.connect_timeout_secs.to_string(),
                "-o".to_string(),
                job.archive_path().to_string_lossy().to_string(),
                job.source_url.clone(),
            ],
        }
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl fmt::Display for TransferCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) || arg.contains('"') {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Drives transfers to completion and post-processes their archives.
#[derive(Debug, Clone)]
pub struct TransferRunner {
    config: Arc<DownloaderConfig>,
    extractor: Extractor,
}

impl TransferRunner {
    pub fn new(config: Arc<DownloaderConfig>) -> Self {
        let extractor = Extractor::new(config.extract_tool.clone());
        Self { config, extractor }
    }

    /// Run `job` to its terminal event.
    ///
    /// Progress goes to `progress` as it is scraped; the channel closes when
    /// this returns. A failed transfer leaves any partial file in place.
    pub async fn run(
        &self,
        job: TransferJob,
        strategy: TransferStrategy,
        cancel: CancellationToken,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> TerminalEvent {
        let _ = progress.send(ProgressUpdate::new(0, STATUS_STARTING));

        if let Err(e) = tokio::fs::create_dir_all(&job.dest_dir).await {
            let e = TransferError::DestinationUnavailable(e);
            error!("Cannot prepare {:?}: {}", job.dest_dir, e);
            return TerminalEvent::failed(&job.item, STATUS_TRANSFER_FAILED, e.to_string());
        }

        let reached = match self.transfer(&job, strategy, &cancel, &progress).await {
            Ok(reached) => reached,
            Err(TransferError::Cancelled) => {
                info!("Transfer of {} cancelled", job.item);
                return TerminalEvent::failed(&job.item, STATUS_CANCELLED, TransferError::Cancelled.to_string());
            }
            Err(e) => {
                warn!("Transfer of {} failed: {}", job.item, e);
                return TerminalEvent::failed(&job.item, STATUS_TRANSFER_FAILED, e.to_string());
            }
        };

        // Never report less than the tool already did.
        let _ = progress.send(ProgressUpdate::new(
            reached.max(EXTRACTING_PERCENT),
            STATUS_EXTRACTING,
        ));

        // Extraction failure is reported as a failed download.
        match self.extractor.extract(&job.archive_path(), &job.dest_dir).await {
            Ok(()) => TerminalEvent::succeeded(&job.item),
            Err(e) => TerminalEvent::failed(&job.item, STATUS_EXTRACTION_FAILED, e.to_string()),
        }
    }

    /// Returns the highest percent the tool reported.
    async fn transfer(
        &self,
        job: &TransferJob,
        strategy: TransferStrategy,
        cancel: &CancellationToken,
        progress: &mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<u8, TransferError> {
        let command = TransferCommand::build(strategy, &self.config, job);
        info!("Starting {:?} transfer of {}", strategy, job.item);
        debug!("Running: {}", command);

        let mut child = command.to_command().spawn().map_err(|e| {
            error!("Failed to spawn {}: {}", command.program, e);
            TransferError::SpawnFailed {
                program: command.program.clone(),
                source: e,
            }
        })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx.clone());
        }
        drop(line_tx);

        let mut reached = 0u8;
        // Lines end once both pipes close.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    kill_child(&mut child, &job.item).await;
                    return Err(TransferError::Cancelled);
                }
                line = line_rx.recv() => match line {
                    Some(line) => {
                        if let Some(percent) = handle_output_line(&line, strategy, progress) {
                            reached = reached.max(percent);
                        }
                    }
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => None,
        };
        let Some(status) = status else {
            kill_child(&mut child, &job.item).await;
            return Err(TransferError::Cancelled);
        };

        if status.success() {
            info!("Transfer of {} finished", job.item);
            Ok(reached)
        } else {
            Err(TransferError::Exited(status.code()))
        }
    }
}

/// Forward a pipe to `tx` one segment at a time. Both `\n` and `\r` end a
/// segment so in-place progress redraws arrive as they are printed. Bytes
/// are decoded lossily so a stray non-UTF-8 byte never stops the pipe from
/// being drained.
fn spawn_line_reader<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut segment = Vec::new();
        loop {
            match next_segment(&mut reader, &mut segment).await {
                Ok(true) => {
                    let line = String::from_utf8_lossy(&segment).into_owned();
                    segment.clear();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    debug!("Transfer tool pipe error: {}", e);
                    break;
                }
            }
        }
    })
}

/// How long a partial segment may wait for its terminator. Redraws put
/// `\r` before the text, so the current readout is otherwise held back
/// until the next one starts.
const SEGMENT_IDLE_FLUSH: Duration = Duration::from_millis(200);

/// Fill `segment` up to the next `\n` or `\r`, skipping empty segments.
/// A partial segment is also returned once the pipe stays quiet for
/// [`SEGMENT_IDLE_FLUSH`]. Returns false once the pipe is exhausted.
async fn next_segment<R>(reader: &mut R, segment: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = if segment.is_empty() {
            reader.fill_buf().await?
        } else {
            match tokio::time::timeout(SEGMENT_IDLE_FLUSH, reader.fill_buf()).await {
                Ok(filled) => filled?,
                Err(_) => return Ok(true),
            }
        };
        if available.is_empty() {
            return Ok(!segment.is_empty());
        }
        match available.iter().position(|b| matches!(b, b'\n' | b'\r')) {
            Some(end) => {
                segment.extend_from_slice(&available[..end]);
                reader.consume(end + 1);
                if !segment.is_empty() {
                    return Ok(true);
                }
            }
            None => {
                let len = available.len();
                segment.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

/// aria2c progress only comes from its readout lines; curl and anything
/// else is scraped loosely. Returns the percent forwarded, if any.
fn handle_output_line(
    line: &str,
    strategy: TransferStrategy,
    progress: &mpsc::UnboundedSender<ProgressUpdate>,
) -> Option<u8> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let update = match strategy {
        TransferStrategy::Turbo => parse_readout_line(line),
        TransferStrategy::Fallback => parse_progress_line(line),
    };
    match update {
        Some(update) => {
            let percent = update.percent;
            let _ = progress.send(update);
            Some(percent)
        }
        None => {
            debug!(target: "transfer_tool", "{}", line);
            None
        }
    }
}

async fn kill_child(child: &mut Child, item: &str) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill transfer of {}: {}", item, e);
    }
}
