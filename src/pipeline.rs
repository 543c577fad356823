//! Load orchestration and background preprocessing.
//!
//! A load runs header parsing, payload reading, normalization and the
//! histogram on the calling thread. The resulting [`Dataset`] is published
//! right away so consumers can start using the normalized volume, then edge
//! detection and gradient estimation run on the rayon pool, each reporting
//! its own [`PipelineEvent`]. [`PipelineEvent::PreprocessCompleted`] follows
//! once both have finished successfully.
//!
//! A pipeline runs one load at a time. A load requested while another one is
//! still preprocessing is rejected with [`PipelineError::Busy`].

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures::channel::{mpsc, oneshot};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{error, info, instrument};
use web_time::Instant;

use crate::{
    config::PipelineConfig,
    edges::{EdgeDetector, EdgeMask},
    enums::Stage,
    gradient::{GradientEstimator, GradientField},
    header::{HeaderParser, VolumeHeader},
    histogram::Histogram,
    normalize::{NormalizedRange, Normalizer},
    volume::Volume,
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A volume is already being loaded")]
    Busy,

    #[error("Load failed: {0}")]
    Load(#[from] VolumeLoaderError),

    #[error("{stage} failed: {reason}")]
    StageFailed { stage: Stage, reason: String },

    #[error("Preprocessing stopped without reporting a result")]
    Disconnected,
}

/// Identity of one successfully normalized load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    HeaderParsed,
    Loaded,
    Normalized,
    Preprocessing {
        edges: StageStatus,
        gradient: StageStatus,
    },
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Loaded(DatasetId),
    EdgesComputed(DatasetId),
    GradientComputed(DatasetId),
    PreprocessCompleted(DatasetId),
    Failed {
        id: DatasetId,
        stage: Stage,
        reason: String,
    },
}

/// Everything derived from one volume.
///
/// The volume and histogram are present from the start; the edge mask and
/// gradient field appear once their stage has finished and never change
/// afterwards.
#[derive(Debug)]
pub struct Dataset {
    id: DatasetId,
    header: VolumeHeader,
    volume: Volume,
    range: NormalizedRange,
    histogram: Histogram,
    edges: OnceLock<EdgeMask>,
    gradient: OnceLock<GradientField>,
}

impl Dataset {
    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.header.content
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn range(&self) -> NormalizedRange {
        self.range
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn edges(&self) -> Option<&EdgeMask> {
        self.edges.get()
    }

    pub fn gradient(&self) -> Option<&GradientField> {
        self.gradient.get()
    }

    pub fn is_preprocessed(&self) -> bool {
        self.edges().is_some() && self.gradient().is_some()
    }
}

/// Handle to the background stages of a load.
#[must_use = "dropping the handle does not stop preprocessing, but its result is lost"]
pub struct Preprocessing {
    dataset: Arc<Dataset>,
    done: oneshot::Receiver<Result<(), PipelineError>>,
}

impl Preprocessing {
    /// The dataset, usable before preprocessing completes.
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// Wait for both background stages.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, in which case the dataset keeps
    /// only the outputs that were produced.
    pub async fn wait(self) -> Result<Arc<Dataset>, PipelineError> {
        match self.done.await {
            Ok(Ok(())) => Ok(self.dataset),
            Ok(Err(e)) => Err(e),
            Err(oneshot::Canceled) => Err(PipelineError::Disconnected),
        }
    }

    /// Blocking variant of [`wait`](Self::wait) for callers without an executor.
    pub fn wait_blocking(self) -> Result<Arc<Dataset>, PipelineError> {
        futures::executor::block_on(self.wait())
    }
}

// Marks the pipeline as busy until dropped.
struct FlightGuard(Arc<AtomicBool>);

impl FlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PipelineEvent>>>,
}

impl Shared {
    fn set_state(&self, state: PipelineState) {
        *self.state.lock() = state;
    }

    fn emit(&self, event: PipelineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

pub struct VolumePipeline {
    config: PipelineConfig,
    in_flight: Arc<AtomicBool>,
    shared: Arc<Shared>,
    current: RwLock<Option<Arc<Dataset>>>,
    next_id: AtomicU64,
}

impl Default for VolumePipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl VolumePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(Shared {
                state: Mutex::new(PipelineState::Idle),
                subscribers: Mutex::new(Vec::new()),
            }),
            current: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock()
    }

    /// Whether a load or its preprocessing is still running
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The most recently published dataset.
    pub fn current(&self) -> Option<Arc<Dataset>> {
        self.current.read().clone()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Load a volume and start its preprocessing
    ///
    /// Returns once the volume is normalized and its histogram computed. At
    /// that point the dataset has replaced the previous one in
    /// [`current`](Self::current) and edge detection and gradient estimation
    /// are running in the background.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Busy`] while a previous load is still running,
    /// and [`PipelineError::Load`] if the header or payload is rejected. A
    /// failed load publishes nothing.
    #[instrument(skip_all, fields(path = %header_path.as_ref().display()))]
    pub fn load(&self, header_path: impl AsRef<Path>) -> Result<Preprocessing, PipelineError> {
        let guard = FlightGuard::acquire(&self.in_flight).ok_or(PipelineError::Busy)?;
        let header_path = header_path.as_ref();

        let dataset = match self.load_dataset(header_path) {
            Ok(dataset) => Arc::new(dataset),
            Err(e) => {
                error!(error = %e, "Failed to load volume");
                self.shared.set_state(PipelineState::Failed);
                return Err(e.into());
            }
        };

        *self.current.write() = Some(dataset.clone());
        self.shared.emit(PipelineEvent::Loaded(dataset.id));

        Ok(self.preprocess(dataset, guard))
    }

    fn load_dataset(&self, header_path: &Path) -> Result<Dataset, VolumeLoaderError> {
        let started = Instant::now();

        let header = HeaderParser::parse_file(header_path)?;
        self.shared.set_state(PipelineState::HeaderParsed);
        info!(
            name = %header.content,
            sample_type = header.sample_type.name(),
            size = ?header.sizes,
            spacing = ?header.spacing,
            "Read volume header"
        );

        let field = VolumeLoader::load_raw(header.data_path(header_path), &header)?;
        self.shared.set_state(PipelineState::Loaded);

        let (volume, range) = Normalizer::normalize(field);
        let histogram = Histogram::from_volume(&volume);
        self.shared.set_state(PipelineState::Normalized);

        let id = DatasetId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(
            %id,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Volume loaded and normalized"
        );

        Ok(Dataset {
            id,
            header,
            volume,
            range,
            histogram,
            edges: OnceLock::new(),
            gradient: OnceLock::new(),
        })
    }

    fn preprocess(&self, dataset: Arc<Dataset>, guard: FlightGuard) -> Preprocessing {
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.set_state(PipelineState::Preprocessing {
            edges: StageStatus::Running,
            gradient: StageStatus::Running,
        });

        let completion = Arc::new(Completion {
            dataset: dataset.clone(),
            shared: self.shared.clone(),
            started: Instant::now(),
            join: Mutex::new(Join {
                pending: 2,
                failure: None,
                guard: Some(guard),
                done: Some(done_tx),
            }),
        });

        let detector = EdgeDetector::new(self.config.edges.clone(), self.config.use_spacing);
        spawn_stage(Stage::Edges, completion.clone(), move |dataset| {
            let _ = dataset.edges.set(detector.detect(&dataset.volume));
        });

        let estimator =
            GradientEstimator::new(self.config.gradient.clone(), self.config.use_spacing);
        spawn_stage(Stage::Gradient, completion, move |dataset| {
            let _ = dataset.gradient.set(estimator.estimate(&dataset.volume));
        });

        Preprocessing {
            dataset,
            done: done_rx,
        }
    }
}

// Joins the two background stages of one dataset.
struct Completion {
    dataset: Arc<Dataset>,
    shared: Arc<Shared>,
    started: Instant,
    join: Mutex<Join>,
}

struct Join {
    pending: usize,
    failure: Option<PipelineError>,
    guard: Option<FlightGuard>,
    done: Option<oneshot::Sender<Result<(), PipelineError>>>,
}

impl Completion {
    fn finish(&self, stage: Stage, result: Result<(), String>) {
        let id = self.dataset.id;
        let status = if result.is_ok() {
            StageStatus::Done
        } else {
            StageStatus::Failed
        };

        let finished = {
            let mut join = self.join.lock();
            {
                let mut state = self.shared.state.lock();
                if let PipelineState::Preprocessing { edges, gradient } = &mut *state {
                    match stage {
                        Stage::Edges => *edges = status,
                        Stage::Gradient => *gradient = status,
                    }
                }
            }

            match result {
                Ok(()) => self.shared.emit(match stage {
                    Stage::Edges => PipelineEvent::EdgesComputed(id),
                    Stage::Gradient => PipelineEvent::GradientComputed(id),
                }),
                Err(reason) => {
                    error!(%id, %stage, %reason, "Preprocessing stage failed");
                    self.shared.emit(PipelineEvent::Failed {
                        id,
                        stage,
                        reason: reason.clone(),
                    });
                    join.failure
                        .get_or_insert(PipelineError::StageFailed { stage, reason });
                }
            }

            join.pending -= 1;
            if join.pending == 0 {
                let failure = join.failure.take();
                self.shared.set_state(if failure.is_none() {
                    PipelineState::Ready
                } else {
                    PipelineState::Failed
                });
                Some((failure, join.guard.take(), join.done.take()))
            } else {
                None
            }
        };

        let Some((failure, guard, done)) = finished else {
            return;
        };
        // Free the pipeline before anyone hears about it, so a reload
        // triggered by the notification is accepted.
        drop(guard);

        let result = match failure {
            None => {
                info!(
                    %id,
                    elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0,
                    "Preprocessing completed"
                );
                self.shared.emit(PipelineEvent::PreprocessCompleted(id));
                Ok(())
            }
            Some(e) => Err(e),
        };
        if let Some(done) = done {
            let _ = done.send(result);
        }
    }
}

fn spawn_stage<F>(stage: Stage, completion: Arc<Completion>, work: F)
where
    F: FnOnce(&Dataset) + Send + 'static,
{
    rayon::spawn(move || {
        let started = Instant::now();
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| work(completion.dataset.as_ref())))
                .map_err(|payload| panic_message(payload.as_ref()));
        if result.is_ok() {
            info!(
                id = %completion.dataset.id,
                %stage,
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Stage finished"
            );
        }
        completion.finish(stage, result);
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_owned()
    }
}
