//! Chunked file transfer over the direct channel
//!
//! A transfer is one `metadata` text frame, the file content as binary
//! frames of at most [`CHUNK_SIZE`] bytes in file order, then one
//! `complete` text frame. The channel is ordered and reliable, so the
//! receiver reassembles by simple concatenation.

use bytes::{Bytes, BytesMut};
use peerdrop_core::chunk::{chunk_count, chunk_lengths, digest, reassemble};
use peerdrop_core::proto::{ChannelMessage, Frame};
use peerdrop_core::{DataChannel, FileMetadata, Progress, Result, CHUNK_SIZE, DEFAULT_MIME_TYPE};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace, warn};

/// Name given to content that arrived without a metadata message
pub const FALLBACK_FILE_NAME: &str = "downloaded_file";

/// Result of [`send_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The channel was not open; nothing was sent
    Skipped,
    /// The whole file went out
    Sent { bytes: u64, chunks: u64 },
}

/// A file on disk ready to be sent
pub struct OutgoingFile {
    pub metadata: FileMetadata,
    pub file: tokio::fs::File,
}

impl OutgoingFile {
    pub async fn open(path: &Path) -> Result<Self> {
        let metadata = FileMetadata::from_path(path)?;
        let file = tokio::fs::File::open(path).await?;
        Ok(Self { metadata, file })
    }
}

/// Send one file over `channel`
///
/// `reader` must yield at least `metadata.size` bytes. `on_progress` gets
/// the percentage after every chunk, reaching 100 before the completion
/// message, and is reset to 0 once the transfer is done.
pub async fn send_file<C, R, F>(
    channel: &C,
    metadata: &FileMetadata,
    mut reader: R,
    mut on_progress: F,
) -> Result<SendOutcome>
where
    C: DataChannel,
    R: AsyncRead + Unpin,
    F: FnMut(f64),
{
    if !channel.is_open() {
        debug!("Direct channel not open, not sending {}", metadata.name);
        return Ok(SendOutcome::Skipped);
    }

    info!(
        "Sending {} ({} bytes, {}) in {} chunks",
        metadata.name,
        metadata.size,
        metadata.mime_type,
        chunk_count(metadata.size, CHUNK_SIZE)
    );
    channel
        .send_frame(Frame::message(&ChannelMessage::metadata(metadata))?)
        .await?;

    let mut sent = 0u64;
    let mut chunks = 0u64;
    for len in chunk_lengths(metadata.size, CHUNK_SIZE) {
        let mut chunk = BytesMut::zeroed(len);
        reader.read_exact(&mut chunk).await?;
        channel.send_binary(chunk.freeze()).await?;

        sent += len as u64;
        chunks += 1;
        let progress = Progress::new(sent, metadata.size);
        trace!("Sent chunk {} ({}/{} bytes)", chunks, sent, metadata.size);
        on_progress(progress.percent());
    }
    if chunks == 0 {
        on_progress(100.0);
    }

    channel
        .send_frame(Frame::message(&ChannelMessage::Complete)?)
        .await?;
    on_progress(0.0);

    info!("Sent {} in {} chunks", metadata.name, chunks);
    Ok(SendOutcome::Sent {
        bytes: sent,
        chunks,
    })
}

/// Where the receiving side stands in the current transfer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    MetadataReceived {
        metadata: FileMetadata,
    },
    ChunksInFlight {
        metadata: Option<FileMetadata>,
        chunks: Vec<Bytes>,
        received: u64,
    },
}

/// What a single inbound frame did to the transfer
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveEvent {
    /// A new transfer was announced
    Started(FileMetadata),
    /// Received percentage of the announced size
    Progress(f64),
    /// The transfer finished
    Completed(ReceivedFile),
    /// Nothing changed
    Ignored,
}

/// How the received byte count compares to the announced size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Verified,
    SizeMismatch { declared: u64, received: u64 },
    /// No metadata was received, so there is nothing to compare against
    Undeclared,
}

/// A completed inbound file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub mime_type: String,
    pub declared_size: Option<u64>,
    pub data: Bytes,
}

impl ReceivedFile {
    fn new(metadata: Option<FileMetadata>, data: Bytes) -> Self {
        match metadata {
            Some(metadata) => Self {
                name: metadata.name,
                mime_type: metadata.mime_type,
                declared_size: Some(metadata.size),
                data,
            },
            None => Self {
                name: FALLBACK_FILE_NAME.to_string(),
                mime_type: DEFAULT_MIME_TYPE.to_string(),
                declared_size: None,
                data,
            },
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn integrity(&self) -> Integrity {
        match self.declared_size {
            Some(declared) if declared == self.size() => Integrity::Verified,
            Some(declared) => Integrity::SizeMismatch {
                declared,
                received: self.size(),
            },
            None => Integrity::Undeclared,
        }
    }

    /// BLAKE3 digest of the content, hex encoded
    pub fn digest(&self) -> String {
        digest(&self.data)
    }

    /// Write the file into `dir` without overwriting anything already there
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = unique_path(dir, &sanitize_file_name(&self.name));
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// Strip anything that would let a peer-chosen name escape the target dir
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (name, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Receiving half of the transfer engine
///
/// Feed it every frame from the direct channel in arrival order.
#[derive(Debug, Default)]
pub struct TransferReceiver {
    state: TransferState,
}

impl TransferReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// Byte progress of the current transfer, if one was announced
    pub fn progress(&self) -> Option<Progress> {
        match &self.state {
            TransferState::Idle => None,
            TransferState::MetadataReceived { metadata } => Some(Progress::new(0, metadata.size)),
            TransferState::ChunksInFlight {
                metadata, received, ..
            } => metadata
                .as_ref()
                .map(|metadata| Progress::new(*received, metadata.size)),
        }
    }

    pub fn handle_frame(&mut self, frame: Frame) -> ReceiveEvent {
        match frame {
            Frame::Text(text) => self.handle_text(&text),
            Frame::Binary(data) => self.handle_chunk(data),
        }
    }

    fn handle_text(&mut self, text: &str) -> ReceiveEvent {
        let msg = match ChannelMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Malformed control message on direct channel: {}", e);
                return ReceiveEvent::Ignored;
            }
        };

        match msg {
            ChannelMessage::Complete => self.finish(),
            ChannelMessage::Unknown => {
                debug!("Ignoring unknown control message: {}", text);
                ReceiveEvent::Ignored
            }
            metadata_msg => match metadata_msg.into_metadata() {
                Some(metadata) => self.start(metadata),
                None => ReceiveEvent::Ignored,
            },
        }
    }

    fn start(&mut self, metadata: FileMetadata) -> ReceiveEvent {
        if self.state != TransferState::Idle {
            warn!("New metadata received, discarding the transfer in progress");
        }
        info!(
            "Receiving {} ({} bytes, {})",
            metadata.name, metadata.size, metadata.mime_type
        );
        self.state = TransferState::MetadataReceived {
            metadata: metadata.clone(),
        };
        ReceiveEvent::Started(metadata)
    }

    fn handle_chunk(&mut self, data: Bytes) -> ReceiveEvent {
        let (metadata, mut chunks, mut received) = match std::mem::take(&mut self.state) {
            TransferState::Idle => {
                warn!("Chunk received before metadata");
                (None, Vec::new(), 0)
            }
            TransferState::MetadataReceived { metadata } => (Some(metadata), Vec::new(), 0),
            TransferState::ChunksInFlight {
                metadata,
                chunks,
                received,
            } => (metadata, chunks, received),
        };

        received += data.len() as u64;
        chunks.push(data);
        let percent = metadata
            .as_ref()
            .map(|metadata| Progress::new(received, metadata.size).percent());
        trace!("Received chunk {} ({} bytes so far)", chunks.len(), received);

        self.state = TransferState::ChunksInFlight {
            metadata,
            chunks,
            received,
        };
        match percent {
            Some(percent) => ReceiveEvent::Progress(percent),
            None => ReceiveEvent::Ignored,
        }
    }

    fn finish(&mut self) -> ReceiveEvent {
        let file = match std::mem::take(&mut self.state) {
            TransferState::Idle => {
                warn!("Completion received with no transfer in progress");
                return ReceiveEvent::Ignored;
            }
            TransferState::MetadataReceived { metadata } => {
                ReceivedFile::new(Some(metadata), Bytes::new())
            }
            TransferState::ChunksInFlight {
                metadata, chunks, ..
            } => ReceivedFile::new(metadata, reassemble(&chunks)),
        };

        match file.integrity() {
            Integrity::SizeMismatch { declared, received } => warn!(
                "{} announced {} bytes but {} arrived",
                file.name, declared, received
            ),
            Integrity::Undeclared => warn!(
                "Received {} bytes without metadata, saving as {}",
                file.size(),
                file.name
            ),
            Integrity::Verified => {}
        }
        info!(
            "Received {} ({} bytes, blake3 {})",
            file.name,
            file.size(),
            file.digest()
        );
        ReceiveEvent::Completed(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdrop_core::transport::mock::MockDataChannel;
    use peerdrop_core::Error;

    /// Feed every frame to a fresh receiver and return the completed file
    fn receive_all(frames: impl IntoIterator<Item = Frame>) -> Result<ReceivedFile> {
        let mut receiver = TransferReceiver::new();
        for frame in frames {
            if let ReceiveEvent::Completed(file) = receiver.handle_frame(frame) {
                return Ok(file);
            }
        }
        Err(Error::Protocol("transfer did not complete".to_string()))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn send_bytes(
        channel: &MockDataChannel,
        metadata: &FileMetadata,
        data: &[u8],
    ) -> (SendOutcome, Vec<f64>) {
        let mut progress = Vec::new();
        let outcome = send_file(channel, metadata, data, |p| progress.push(p))
            .await
            .unwrap();
        (outcome, progress)
    }

    #[tokio::test]
    async fn test_send_frames_in_order() {
        let channel = MockDataChannel::open();
        let data = pattern(40000);
        let metadata = FileMetadata::new("photo.png", 40000, "image/png");

        let (outcome, _) = send_bytes(&channel, &metadata, &data).await;
        assert_eq!(
            outcome,
            SendOutcome::Sent {
                bytes: 40000,
                chunks: 3
            }
        );

        let frames = channel.frames();
        assert_eq!(frames.len(), 5);
        assert_eq!(
            frames[0],
            Frame::Text(
                r#"{"type":"metadata","name":"photo.png","size":40000,"fileType":"image/png"}"#
                    .to_string()
            )
        );
        let sizes: Vec<usize> = frames[1..4].iter().map(Frame::len).collect();
        assert_eq!(sizes, vec![16384, 16384, 7232]);
        assert_eq!(frames[4], Frame::Text(r#"{"type":"complete"}"#.to_string()));
    }

    #[tokio::test]
    async fn test_send_progress_reaches_100_then_resets() {
        let channel = MockDataChannel::open();
        let data = pattern(40000);
        let metadata = FileMetadata::new("photo.png", 40000, "image/png");

        let (_, progress) = send_bytes(&channel, &metadata, &data).await;

        assert_eq!(progress.len(), 4);
        assert!(progress[..3].windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress[2], 100.0);
        assert_eq!(progress[3], 0.0);
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_is_noop() {
        let channel = MockDataChannel::new();
        let metadata = FileMetadata::new("a.txt", 3, "text/plain");

        let (outcome, progress) = send_bytes(&channel, &metadata, b"abc").await;

        assert_eq!(outcome, SendOutcome::Skipped);
        assert!(progress.is_empty());
        assert!(channel.frames().is_empty());
    }

    #[tokio::test]
    async fn test_send_empty_file() {
        let channel = MockDataChannel::open();
        let metadata = FileMetadata::new("empty.txt", 0, "text/plain");

        let (outcome, progress) = send_bytes(&channel, &metadata, b"").await;

        assert_eq!(
            outcome,
            SendOutcome::Sent {
                bytes: 0,
                chunks: 0
            }
        );
        assert_eq!(progress, vec![100.0, 0.0]);
        assert_eq!(channel.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_send_short_reader_fails() {
        let channel = MockDataChannel::open();
        let metadata = FileMetadata::new("a.bin", 100, "application/octet-stream");

        let mut progress = Vec::new();
        let result = send_file(&channel, &metadata, &b"short"[..], |p| progress.push(p)).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(channel.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_send_then_receive() {
        let channel = MockDataChannel::open();
        let data = pattern(40000);
        let metadata = FileMetadata::new("photo.png", 40000, "image/png");
        send_bytes(&channel, &metadata, &data).await;

        let mut receiver = TransferReceiver::new();
        let mut percents = Vec::new();
        let mut completed = None;
        for frame in channel.take_frames() {
            match receiver.handle_frame(frame) {
                ReceiveEvent::Progress(p) => percents.push(p),
                ReceiveEvent::Completed(file) => completed = Some(file),
                _ => {}
            }
        }

        let file = completed.unwrap();
        assert_eq!(file.name, "photo.png");
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.data.as_ref(), data.as_slice());
        assert_eq!(file.integrity(), Integrity::Verified);
        assert_eq!(file.digest(), digest(&data));
        assert_eq!(percents.len(), 3);
        assert_eq!(percents[2], 100.0);
        assert_eq!(receiver.state(), &TransferState::Idle);
    }

    #[test]
    fn test_new_metadata_discards_partial_transfer() {
        let mut receiver = TransferReceiver::new();
        let first = ChannelMessage::metadata(&FileMetadata::new("a.bin", 10, "x/y"));
        receiver.handle_frame(Frame::message(&first).unwrap());
        receiver.handle_frame(Frame::Binary(Bytes::from_static(b"aaaaa")));

        let second = ChannelMessage::metadata(&FileMetadata::new("b.bin", 3, "x/y"));
        let event = receiver.handle_frame(Frame::message(&second).unwrap());
        assert!(matches!(event, ReceiveEvent::Started(_)));

        receiver.handle_frame(Frame::Binary(Bytes::from_static(b"bbb")));
        let event = receiver.handle_frame(Frame::message(&ChannelMessage::Complete).unwrap());
        let file = match event {
            ReceiveEvent::Completed(file) => file,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(file.name, "b.bin");
        assert_eq!(file.data.as_ref(), b"bbb");
    }

    #[test]
    fn test_size_mismatch_still_completes() {
        let file = receive_all(vec![
            Frame::message(&ChannelMessage::metadata(&FileMetadata::new("a.bin", 10, "x/y")))
                .unwrap(),
            Frame::Binary(Bytes::from_static(b"1234")),
            Frame::message(&ChannelMessage::Complete).unwrap(),
        ])
        .unwrap();

        assert_eq!(
            file.integrity(),
            Integrity::SizeMismatch {
                declared: 10,
                received: 4
            }
        );
    }

    #[test]
    fn test_chunks_without_metadata_use_fallback_name() {
        let file = receive_all(vec![
            Frame::Binary(Bytes::from_static(b"abc")),
            Frame::Text(r#"{"type":"complete"}"#.to_string()),
        ])
        .unwrap();

        assert_eq!(file.name, FALLBACK_FILE_NAME);
        assert_eq!(file.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(file.integrity(), Integrity::Undeclared);
    }

    #[test]
    fn test_stray_frames_are_ignored() {
        let mut receiver = TransferReceiver::new();
        assert_eq!(
            receiver.handle_frame(Frame::Text(r#"{"type":"complete"}"#.to_string())),
            ReceiveEvent::Ignored
        );
        assert_eq!(
            receiver.handle_frame(Frame::Text("not json".to_string())),
            ReceiveEvent::Ignored
        );
        assert_eq!(
            receiver.handle_frame(Frame::Text(r#"{"type":"pause"}"#.to_string())),
            ReceiveEvent::Ignored
        );
        assert_eq!(receiver.state(), &TransferState::Idle);
    }

    #[test]
    fn test_empty_file_metadata_then_complete() {
        let file = receive_all(vec![
            Frame::Text(r#"{"type":"metadata","name":"e.txt","size":0,"fileType":""}"#.to_string()),
            Frame::Text(r#"{"type":"complete"}"#.to_string()),
        ])
        .unwrap();

        assert!(file.data.is_empty());
        assert_eq!(file.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(file.integrity(), Integrity::Verified);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("photo.png"), "photo.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\x\\a.txt"), "a.txt");
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
    }

    #[tokio::test]
    async fn test_save_does_not_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = ReceivedFile::new(
            Some(FileMetadata::new("note.txt", 2, "text/plain")),
            Bytes::from_static(b"hi"),
        );

        let first = file.save_to(dir.path()).await.unwrap();
        let second = file.save_to(dir.path()).await.unwrap();

        assert_eq!(first, dir.path().join("note.txt"));
        assert_eq!(second, dir.path().join("note (1).txt"));
        assert_eq!(std::fs::read(second).unwrap(), b"hi");
    }
}
