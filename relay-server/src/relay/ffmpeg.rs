// 基于ffmpeg进程的上游中继
//
// ffmpeg 负责拉流（RTSP 等）并以 `-c copy` 转封装为分片MP4输出到stdout，
// 本模块只负责切分输出并上报中继事件。

use super::fmp4::{Fmp4Item, Fmp4Splitter};
use super::{RelayEvent, RelayEventSender, RelayFactory, UpstreamRelay};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use common::{ChannelSource, RelayError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 支持的源地址协议
const SUPPORTED_SCHEMES: &[&str] = &["rtsp", "rtsps", "rtmp", "http", "https", "srt"];

/// stdout 读缓冲大小
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// ffmpeg 中继工厂
pub struct FfmpegRelayFactory {
    ffmpeg_path: PathBuf,
}

impl FfmpegRelayFactory {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl RelayFactory for FfmpegRelayFactory {
    fn create(
        &self,
        source: &ChannelSource,
        events: RelayEventSender,
    ) -> Result<Arc<dyn UpstreamRelay>> {
        if !SUPPORTED_SCHEMES.contains(&source.locator.scheme()) {
            return Err(RelayError::RelayConstruction(format!(
                "unsupported scheme '{}' for channel {}",
                source.locator.scheme(),
                source.number
            )));
        }
        if source.locator.host_str().map_or(true, str::is_empty) {
            return Err(RelayError::RelayConstruction(format!(
                "missing host for channel {}",
                source.number
            )));
        }

        Ok(Arc::new(FfmpegRelay {
            number: source.number,
            source: source.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            events,
            cancel: CancellationToken::new(),
            media: Arc::new(MediaInfo::default()),
        }))
    }
}

/// 编码就绪后写入的媒体信息
#[derive(Default)]
struct MediaInfo {
    codec: OnceLock<String>,
    header: OnceLock<Bytes>,
}

/// ffmpeg 中继
pub struct FfmpegRelay {
    number: u32,
    source: ChannelSource,
    ffmpeg_path: PathBuf,
    events: RelayEventSender,
    cancel: CancellationToken,
    media: Arc<MediaInfo>,
}

impl FfmpegRelay {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        if self.source.locator.scheme().starts_with("rtsp") {
            cmd.arg("-rtsp_transport").arg(self.source.transport.as_str());
        }
        cmd.arg("-i").arg(self.source.authenticated_url())
            // 只转发视频，不重新编码
            .arg("-an")
            .arg("-c:v").arg("copy")
            .arg("-f").arg("mp4")
            .arg("-movflags").arg("frag_keyframe+empty_moov+default_base_moof")
            .arg("pipe:1");

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl UpstreamRelay for FfmpegRelay {
    async fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!(channel = self.number, "Relay stopped before start");
            return Ok(());
        }

        info!(
            channel = self.number,
            source = %self.source.locator,
            transport = self.source.transport.as_str(),
            "Starting ffmpeg relay"
        );

        let mut child = self.command().spawn().map_err(|e| {
            RelayError::RelayStart(format!(
                "failed to spawn {}: {}",
                self.ffmpeg_path.display(),
                e
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::RelayStart("ffmpeg stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let number = self.number;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        warn!(channel = number, "ffmpeg: {}", line.trim());
                    }
                }
            });
        }

        tokio::spawn(read_loop(
            self.number,
            child,
            stdout,
            self.events.clone(),
            self.cancel.clone(),
            self.media.clone(),
        ));

        Ok(())
    }

    fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(channel = self.number, "Stopping ffmpeg relay");
            self.cancel.cancel();
        }
    }

    fn codec(&self) -> Option<String> {
        self.media.codec.get().cloned()
    }

    fn header(&self) -> Option<Bytes> {
        self.media.header.get().cloned()
    }
}

/// 读取ffmpeg输出并上报事件，结束时总是上报 `Closed`
async fn read_loop(
    number: u32,
    mut child: Child,
    mut stdout: ChildStdout,
    events: RelayEventSender,
    cancel: CancellationToken,
    media: Arc<MediaInfo>,
) {
    let mut splitter = Fmp4Splitter::new();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    'read: loop {
        buffer.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = stdout.read_buf(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                info!(channel = number, "ffmpeg output ended");
                break;
            }
            Ok(_) => {
                let items = match splitter.push(&buffer) {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(channel = number, error = %e, "Invalid fMP4 stream");
                        break;
                    }
                };

                for item in items {
                    let event = match item {
                        Fmp4Item::Init { codec, segment } => {
                            let _ = media.codec.set(codec.clone());
                            let _ = media.header.set(segment.clone());
                            info!(channel = number, codec = %codec, "Codec ready");
                            RelayEvent::CodecReady {
                                codec,
                                header: segment,
                            }
                        }
                        Fmp4Item::Fragment(data) => RelayEvent::Frame(data),
                    };
                    if events.send(event).await.is_err() {
                        debug!(channel = number, "Relay event receiver dropped");
                        break 'read;
                    }
                }
            }
            Err(e) => {
                warn!(channel = number, error = %e, "Failed to read ffmpeg output");
                break;
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(channel = number, error = %e, "ffmpeg already exited");
    }
    let _ = events.send(RelayEvent::Closed).await;
}
