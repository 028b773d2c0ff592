//! Map load/save off the simulation thread.
//!
//! File I/O and decoding run on tokio's blocking pool. The store keeps the
//! job's receiver and refuses map and camera mutation until the result has
//! been collected with [`MapStore::poll`] or [`MapStore::wait`]. A failed load
//! leaves the current map in place.

use std::path::{Path, PathBuf};

use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::error::{SimError, SimResult};
use crate::map::{MapCamera, MapRoot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapJobKind {
    Load,
    Save,
}

#[derive(Debug)]
enum JobOutput {
    Loaded(MapRoot),
    Saved,
}

/// Handle to a background map job.
#[derive(Debug)]
pub struct MapJob {
    kind: MapJobKind,
    path: PathBuf,
    rx: oneshot::Receiver<SimResult<JobOutput>>,
}

impl MapJob {
    fn spawn<F>(kind: MapJobKind, path: PathBuf, work: F) -> Self
    where
        F: FnOnce() -> SimResult<JobOutput> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            // the receiver may have been dropped with the store
            let _ = tx.send(work());
        });
        Self { kind, path, rx }
    }

    pub fn kind(&self) -> MapJobKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What a finished job did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapJobDone {
    Loaded(PathBuf),
    Saved(PathBuf),
}

/// The map and camera shared with background persistence jobs.
#[derive(Debug)]
pub struct MapStore {
    map: MapRoot,
    camera: MapCamera,
    job: Option<MapJob>,
}

impl MapStore {
    pub fn new(map: MapRoot, camera: MapCamera) -> Self {
        Self { map, camera, job: None }
    }

    pub fn map(&self) -> &MapRoot {
        &self.map
    }

    pub fn camera(&self) -> &MapCamera {
        &self.camera
    }

    pub fn is_busy(&self) -> bool {
        self.job.is_some()
    }

    pub fn pending_job(&self) -> Option<&MapJob> {
        self.job.as_ref()
    }

    pub fn map_mut(&mut self) -> SimResult<&mut MapRoot> {
        if self.is_busy() {
            return Err(SimError::InvalidState("map job in flight"));
        }
        Ok(&mut self.map)
    }

    pub fn camera_mut(&mut self) -> SimResult<&mut MapCamera> {
        if self.is_busy() {
            return Err(SimError::InvalidState("map job in flight"));
        }
        Ok(&mut self.camera)
    }

    /// Start loading `path` in the background.
    pub fn load(&mut self, path: impl Into<PathBuf>) -> SimResult<()> {
        if self.is_busy() {
            return Err(SimError::InvalidState("map job in flight"));
        }
        let path = path.into();
        let src = path.clone();
        self.job = Some(MapJob::spawn(MapJobKind::Load, path, move || {
            let data = std::fs::read(&src)?;
            Ok(JobOutput::Loaded(MapRoot::from_bytes(data)?))
        }));
        Ok(())
    }

    /// Start saving a snapshot of the current map to `path`.
    pub fn save(&mut self, path: impl Into<PathBuf>) -> SimResult<()> {
        if self.is_busy() {
            return Err(SimError::InvalidState("map job in flight"));
        }
        let path = path.into();
        let dst = path.clone();
        let bytes = self.map.to_bytes();
        self.job = Some(MapJob::spawn(MapJobKind::Save, path, move || {
            std::fs::write(&dst, &bytes)?;
            Ok(JobOutput::Saved)
        }));
        Ok(())
    }

    /// Collect the job result if it is ready. `None` while still running or
    /// when no job was started.
    pub fn poll(&mut self) -> Option<SimResult<MapJobDone>> {
        let job = self.job.as_mut()?;
        let result = match job.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(SimError::Io("map job was lost".into())),
        };
        let job = self.job.take()?;
        Some(self.finish(job, result))
    }

    /// Wait for the running job. The store stays busy until the result has
    /// arrived, so dropping this future early leaves the job pending.
    pub async fn wait(&mut self) -> Option<SimResult<MapJobDone>> {
        let job = self.job.as_mut()?;
        let result = (&mut job.rx)
            .await
            .unwrap_or_else(|_| Err(SimError::Io("map job was lost".into())));
        let job = self.job.take()?;
        Some(self.finish(job, result))
    }

    fn finish(&mut self, job: MapJob, result: SimResult<JobOutput>) -> SimResult<MapJobDone> {
        match result {
            Ok(JobOutput::Loaded(map)) => {
                info!("Loaded map from {} (weight {})", job.path.display(), map.weight());
                self.map = map;
                let weight = self.camera.weight;
                self.camera.set_weight(weight, self.map.weight());
                Ok(MapJobDone::Loaded(job.path))
            }
            Ok(JobOutput::Saved) => {
                info!("Saved map to {}", job.path.display());
                Ok(MapJobDone::Saved(job.path))
            }
            Err(e) => {
                warn!("Map {:?} of {} failed: {}", job.kind, job.path.display(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::MapPos;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voxel-arena-{}-{}", std::process::id(), name))
    }

    fn store() -> MapStore {
        MapStore::new(MapRoot::test_env0().unwrap(), MapCamera::new(MapPos::new(1, 1), 2, 1))
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let path = temp_path("roundtrip.map");
        let mut store = store();
        store.save(&path).unwrap();
        assert!(store.is_busy());
        assert!(store.map_mut().is_err());
        assert!(store.camera_mut().is_err());
        assert!(store.load(&path).is_err());
        assert_eq!(store.wait().await, Some(Ok(MapJobDone::Saved(path.clone()))));

        let original = store.map().clone();
        store.map_mut().unwrap().set_height(original.unit(0).unwrap(), 3).unwrap();
        store.load(&path).unwrap();
        assert!(matches!(store.wait().await, Some(Ok(MapJobDone::Loaded(_)))));
        assert_eq!(store.map(), &original);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_map() {
        let path = temp_path("corrupt.map");
        std::fs::write(&path, b"not a map").unwrap();
        let mut store = store();
        let before = store.map().clone();
        store.load(&path).unwrap();
        let mut result = None;
        for _ in 0..1000 {
            result = store.poll();
            if result.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(matches!(result, Some(Err(SimError::SerializationFailure(_)))));
        assert_eq!(store.map(), &before);
        assert!(!store.is_busy());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_abandoned_wait_keeps_job_pending() {
        let path = temp_path("pending.map");
        let mut store = store();
        let (tx, rx) = oneshot::channel();
        store.job = Some(MapJob {
            kind: MapJobKind::Load,
            path: path.clone(),
            rx,
        });

        let waited = tokio::time::timeout(std::time::Duration::ZERO, store.wait()).await;
        assert!(waited.is_err());
        assert!(store.is_busy());
        assert!(store.map_mut().is_err());

        let mut loaded = MapRoot::new(5).unwrap();
        let cell = loaded.cell_id(MapPos::new(0, 0), 5).unwrap();
        loaded.append(cell, crate::map::VoxelData::ground(4)).unwrap();
        tx.send(Ok(JobOutput::Loaded(loaded.clone()))).unwrap();
        assert_eq!(store.wait().await, Some(Ok(MapJobDone::Loaded(path))));
        assert_eq!(store.map(), &loaded);
        assert!(!store.is_busy());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let mut store = store();
        store.load(temp_path("does-not-exist.map")).unwrap();
        assert!(matches!(store.wait().await, Some(Err(SimError::Io(_)))));
        assert!(store.poll().is_none());
    }
}
