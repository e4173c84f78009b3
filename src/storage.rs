// SPDX-License-Identifier: MPL-2.0

//! Save queue accounting and the save pipeline boundary
//!
//! [`SaveQueue`] is a shared handle over atomic counters of unsaved work.
//! The result dispatcher increments it when it hands a unit to a
//! [`SavePipeline`]; the pipeline decrements it once the unit is written.
//! The backpressure gate only ever reads it.

use crate::backends::camera::types::{Bitmap, RawBuffer};
use crate::constants::file_formats;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default folder name for saved shots
const DEFAULT_SAVE_FOLDER: &str = "Camera";

/// One delivery unit handed to the save pipeline
///
/// For dual output both payloads of a frame travel together.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub shot_id: Uuid,
    pub frame_index: u32,
    pub total_frames: Option<u32>,
    pub jpeg: Option<Arc<[u8]>>,
    pub raw: Option<RawBuffer>,
    pub bitmap: Option<Bitmap>,
    pub capture_timestamp: DateTime<Local>,
}

impl SaveRequest {
    pub fn raw_count(&self) -> usize {
        self.raw.is_some() as usize
    }

    /// Processed (non-RAW) payloads in this unit
    pub fn jpeg_count(&self) -> usize {
        self.jpeg.is_some() as usize + self.bitmap.is_some() as usize
    }

    pub fn size_bytes(&self) -> u64 {
        let jpeg = self.jpeg.as_ref().map_or(0, |b| b.len());
        let raw = self.raw.as_ref().map_or(0, |r| r.data.len() * 2);
        let bitmap = self.bitmap.as_ref().map_or(0, |b| b.rgba.len());
        (jpeg + raw + bitmap) as u64
    }
}

/// Point-in-time view of the save queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub units: usize,
    pub raw: usize,
    pub jpeg: usize,
    pub bytes: u64,
}

struct Counters {
    units: AtomicUsize,
    raw: AtomicUsize,
    jpeg: AtomicUsize,
    bytes: AtomicU64,
    changed: watch::Sender<u64>,
}

/// Shared handle over the unsaved-work counters
///
/// Cloning shares the counters. Separate `SaveQueue::new()` values are fully
/// isolated, so several sessions can run side by side.
#[derive(Clone)]
pub struct SaveQueue {
    counters: Arc<Counters>,
}

fn saturating_sub_usize(counter: &AtomicUsize, n: usize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        Some(v.saturating_sub(n))
    });
}

impl SaveQueue {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            counters: Arc::new(Counters {
                units: AtomicUsize::new(0),
                raw: AtomicUsize::new(0),
                jpeg: AtomicUsize::new(0),
                bytes: AtomicU64::new(0),
                changed,
            }),
        }
    }

    /// Record a unit handed to the save pipeline
    pub fn enqueued(&self, request: &SaveRequest) {
        let c = &self.counters;
        c.units.fetch_add(1, Ordering::SeqCst);
        c.raw.fetch_add(request.raw_count(), Ordering::SeqCst);
        c.jpeg.fetch_add(request.jpeg_count(), Ordering::SeqCst);
        c.bytes.fetch_add(request.size_bytes(), Ordering::SeqCst);
        self.notify();
    }

    /// Record a unit the save pipeline has finished with
    pub fn completed(&self, request: &SaveRequest) {
        let c = &self.counters;
        saturating_sub_usize(&c.units, 1);
        saturating_sub_usize(&c.raw, request.raw_count());
        saturating_sub_usize(&c.jpeg, request.jpeg_count());
        let size = request.size_bytes();
        let _ = c
            .bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(size))
            });
        self.notify();
    }

    pub fn pending_units(&self) -> usize {
        self.counters.units.load(Ordering::SeqCst)
    }

    pub fn pending_raw(&self) -> usize {
        self.counters.raw.load(Ordering::SeqCst)
    }

    pub fn pending_jpeg(&self) -> usize {
        self.counters.jpeg.load(Ordering::SeqCst)
    }

    pub fn pending_bytes(&self) -> u64 {
        self.counters.bytes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            units: self.pending_units(),
            raw: self.pending_raw(),
            jpeg: self.pending_jpeg(),
            bytes: self.pending_bytes(),
        }
    }

    /// Receiver that changes whenever a counter changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.counters.changed.subscribe()
    }

    /// Wait until every handed-off unit has been saved
    pub async fn wait_until_drained(&self) {
        let mut rx = self.subscribe();
        while self.pending_units() > 0 {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn notify(&self) {
        self.counters.changed.send_modify(|generation| *generation += 1);
    }
}

impl Default for SaveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SaveQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveQueue")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// External save pipeline
///
/// `enqueue` must not block; the pipeline owns the request afterwards.
pub trait SavePipeline: Send + Sync {
    /// Whether the pipeline can take `raw_count` more RAW and `jpeg_count`
    /// more processed payloads
    fn can_accept_more(&self, raw_count: usize, jpeg_count: usize) -> bool;

    fn enqueue(&self, request: SaveRequest);

    /// Units accepted but not yet saved
    fn pending_count(&self) -> usize;
}

/// Save pipeline writing every unit to files in one directory
///
/// Writes happen on a background tokio task; construct it inside a runtime.
pub struct DirectorySaver {
    directory: PathBuf,
    queue: SaveQueue,
    max_pending: usize,
    sender: mpsc::UnboundedSender<SaveRequest>,
    saved: Arc<Mutex<Vec<PathBuf>>>,
}

impl DirectorySaver {
    pub fn new(directory: PathBuf, queue: SaveQueue, max_pending: usize) -> AppResult<Self> {
        std::fs::create_dir_all(&directory).map_err(|e| {
            AppError::Storage(format!("cannot create {}: {}", directory.display(), e))
        })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let saved = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(save_worker(
            directory.clone(),
            queue.clone(),
            receiver,
            Arc::clone(&saved),
        ));
        info!(directory = %directory.display(), "Directory saver started");

        Ok(Self {
            directory,
            queue,
            max_pending,
            sender,
            saved,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Files written so far, in write order
    pub fn saved_files(&self) -> Vec<PathBuf> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SavePipeline for DirectorySaver {
    fn can_accept_more(&self, raw_count: usize, jpeg_count: usize) -> bool {
        let incoming = raw_count.max(jpeg_count);
        self.queue.pending_units() + incoming <= self.max_pending
    }

    fn enqueue(&self, request: SaveRequest) {
        if let Err(err) = self.sender.send(request) {
            // Worker gone; release the counters so the gate does not stall
            error!("Save worker stopped, dropping frame {}", err.0.frame_index);
            self.queue.completed(&err.0);
        }
    }

    fn pending_count(&self) -> usize {
        self.queue.pending_units()
    }
}

async fn save_worker(
    directory: PathBuf,
    queue: SaveQueue,
    mut receiver: mpsc::UnboundedReceiver<SaveRequest>,
    saved: Arc<Mutex<Vec<PathBuf>>>,
) {
    while let Some(request) = receiver.recv().await {
        match write_request(&directory, &request).await {
            Ok(paths) => {
                for path in &paths {
                    info!(path = %path.display(), frame = request.frame_index, "Saved");
                }
                saved
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(paths);
            }
            Err(e) => error!(frame = request.frame_index, error = %e, "Failed to save frame"),
        }
        queue.completed(&request);
    }
    debug!("Save worker finished");
}

/// Base file name for a unit, without extension
pub fn file_stem(request: &SaveRequest) -> String {
    let shot = request.shot_id.simple().to_string();
    format!(
        "{}_{}_{:03}",
        request.capture_timestamp.format(file_formats::TIMESTAMP_FORMAT),
        &shot[..8],
        request.frame_index
    )
}

async fn write_request(directory: &Path, request: &SaveRequest) -> AppResult<Vec<PathBuf>> {
    let stem = file_stem(request);
    let mut written = Vec::new();

    if let Some(jpeg) = &request.jpeg {
        let path = directory.join(format!("{}.{}", stem, file_formats::JPEG_EXTENSION));
        tokio::fs::write(&path, jpeg.as_ref()).await?;
        written.push(path);
    }
    if let Some(raw) = &request.raw {
        let bytes: Vec<u8> = raw.data.iter().flat_map(|s| s.to_le_bytes()).collect();
        let path = directory.join(format!("{}.{}", stem, file_formats::RAW_EXTENSION));
        tokio::fs::write(&path, bytes).await?;
        written.push(path);
    }
    if let Some(bitmap) = &request.bitmap {
        let path = directory.join(format!("{}.{}", stem, file_formats::BITMAP_EXTENSION));
        tokio::fs::write(&path, bitmap.rgba.as_ref()).await?;
        written.push(path);
    }
    Ok(written)
}

/// Default directory for saved shots
pub fn default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(frame_index: u32, raw: bool) -> SaveRequest {
        SaveRequest {
            shot_id: Uuid::new_v4(),
            frame_index,
            total_frames: Some(3),
            jpeg: Some(Arc::from(vec![0xFFu8, 0xD8, 0xFF, 0xD9])),
            raw: raw.then(|| RawBuffer {
                width: 2,
                height: 2,
                bits_per_sample: 10,
                data: Arc::from(vec![1u16, 2, 3, 4]),
            }),
            bitmap: None,
            capture_timestamp: Local::now(),
        }
    }

    #[test]
    fn test_counters_track_enqueue_and_completion() {
        let queue = SaveQueue::new();
        let dual = request(0, true);
        queue.enqueued(&dual);
        assert_eq!(
            queue.snapshot(),
            QueueSnapshot {
                units: 1,
                raw: 1,
                jpeg: 1,
                bytes: 12,
            }
        );
        queue.completed(&dual);
        assert_eq!(queue.snapshot(), QueueSnapshot::default());
    }

    #[test]
    fn test_completion_never_underflows() {
        let queue = SaveQueue::new();
        queue.completed(&request(0, true));
        assert_eq!(queue.snapshot(), QueueSnapshot::default());
    }

    #[test]
    fn test_queues_are_isolated() {
        let a = SaveQueue::new();
        let b = SaveQueue::new();
        a.enqueued(&request(0, false));
        assert_eq!(a.pending_units(), 1);
        assert_eq!(b.pending_units(), 0);
        assert_eq!(a.clone().pending_units(), 1);
    }

    #[tokio::test]
    async fn test_directory_saver_writes_pair() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SaveQueue::new();
        let saver = DirectorySaver::new(dir.path().to_path_buf(), queue.clone(), 4).unwrap();

        let unit = request(2, true);
        queue.enqueued(&unit);
        saver.enqueue(unit);
        queue.wait_until_drained().await;

        let files = saver.saved_files();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p.extension().unwrap() == "jpg"));
        assert!(files.iter().any(|p| p.extension().unwrap() == "raw"));
        assert!(files[0].file_name().unwrap().to_string_lossy().contains("_002."));
    }

    #[test]
    fn test_can_accept_more_respects_limit() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let dir = tempfile::tempdir().unwrap();
        let queue = SaveQueue::new();
        let saver = DirectorySaver::new(dir.path().to_path_buf(), queue.clone(), 2).unwrap();
        queue.enqueued(&request(0, false));
        assert!(saver.can_accept_more(0, 1));
        queue.enqueued(&request(1, false));
        assert!(!saver.can_accept_more(0, 1));
    }
}
