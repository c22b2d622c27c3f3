//! Background thread for AI segmentation.
//!
//! This module provides a [`SegmentationBridge`] that owns a background
//! thread running a [`SegmentationModel`]. Model loading and inference
//! happen off the main thread; the caller polls for events each frame.
//!
//! Requests carry monotonically increasing ids. The bridge tracks a
//! single live request: submitting a new prompt supersedes the previous
//! one, and results for superseded or invalidated ids are dropped when
//! they arrive. The worker itself is never interrupted mid-inference.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::PendingPolicy;
use crate::error::EngineError;
use crate::geometry::Mask;
use crate::tool::Prompt;

/// A segmentation backend run on the worker thread.
///
/// `load` is called once on the worker thread before any inference; it
/// covers weight loading and other heavy one-time setup.
pub trait SegmentationModel: Send + 'static {
    /// Load the model. Called once, on the worker thread.
    fn load(&mut self) -> Result<(), EngineError>;

    /// Segment the object indicated by the prompt in an image.
    fn segment(&mut self, image_path: &Path, prompt: &Prompt) -> Result<Mask, EngineError>;
}

/// Request to segment an image region, sent to the background thread.
struct SegmentationRequest {
    /// Unique request ID for matching the result
    id: u64,
    /// Image the prompt refers to
    image_path: PathBuf,
    /// The user's point or box prompt
    prompt: Prompt,
    /// Submission time, for latency logging
    issued_at: Instant,
}

/// Message sent to the worker thread.
enum ThreadMessage {
    /// Run segmentation
    Segment(SegmentationRequest),
    /// Shutdown the thread
    Shutdown,
}

/// Result sent back from the worker thread.
enum WorkerResult {
    /// Model finished loading
    ModelReady,
    /// Model failed to load; the worker thread has exited
    ModelFailed(String),
    /// Inference produced a mask
    Mask { request_id: u64, mask: Mask },
    /// Inference failed
    Failed { request_id: u64, error: EngineError },
}

/// Event surfaced to the caller by [`SegmentationBridge::poll`].
///
/// Stale results never appear here; the bridge drops them.
#[derive(Debug)]
pub enum BridgeEvent {
    /// The model is loaded and accepting prompts
    ModelReady,
    /// The model failed to load; all subsequent submits are rejected
    ModelFailed(String),
    /// The live request produced a mask
    MaskReady { request_id: u64, mask: Mask },
    /// The live request failed
    RequestFailed { request_id: u64, error: EngineError },
}

/// Manages a background thread running a segmentation model.
///
/// The bridge is the only owner of request-id bookkeeping: it decides
/// which result is still wanted and silently drops the rest.
pub struct SegmentationBridge {
    /// Sender for requests to the worker thread
    request_tx: Sender<ThreadMessage>,
    /// Receiver for results from the worker thread
    result_rx: Receiver<WorkerResult>,
    /// Handle to the worker thread (for joining on drop)
    thread_handle: Option<JoinHandle<()>>,
    /// Counter for generating unique request IDs
    next_id: u64,
    /// The request whose result will be accepted, if any
    live_request: Option<u64>,
    /// Prompt held back until the model is ready (latest wins)
    queued: Option<SegmentationRequest>,
    /// Whether the model has signaled it's ready
    ready: bool,
    /// Set when the model failed to load
    load_failed: bool,
    /// Handling of prompts submitted before the model is ready
    pending_policy: PendingPolicy,
}

impl SegmentationBridge {
    /// Spawn a worker thread around a model.
    ///
    /// The model starts loading immediately; poll for
    /// [`BridgeEvent::ModelReady`]. Returns `Err` if the thread fails to
    /// spawn.
    pub fn spawn<M: SegmentationModel>(
        model: M,
        pending_policy: PendingPolicy,
    ) -> Result<Self, EngineError> {
        let (request_tx, request_rx) = mpsc::channel::<ThreadMessage>();
        let (result_tx, result_rx) = mpsc::channel::<WorkerResult>();

        let thread_handle = thread::Builder::new()
            .name("segmentation-worker".to_string())
            .spawn(move || {
                log::info!("Segmentation worker thread started");
                Self::thread_loop(model, request_rx, result_tx);
                log::info!("Segmentation worker thread exiting");
            })
            .map_err(|e| {
                EngineError::InferenceFailure(format!("failed to spawn worker thread: {}", e))
            })?;

        Ok(Self {
            request_tx,
            result_rx,
            thread_handle: Some(thread_handle),
            next_id: 0,
            live_request: None,
            queued: None,
            ready: false,
            load_failed: false,
            pending_policy,
        })
    }

    /// Worker thread main loop.
    fn thread_loop<M: SegmentationModel>(
        mut model: M,
        request_rx: Receiver<ThreadMessage>,
        result_tx: Sender<WorkerResult>,
    ) {
        if let Err(e) = model.load() {
            log::error!("Model failed to load: {}", e);
            let _ = result_tx.send(WorkerResult::ModelFailed(e.to_string()));
            return;
        }
        if result_tx.send(WorkerResult::ModelReady).is_err() {
            return;
        }

        loop {
            match request_rx.recv() {
                Ok(ThreadMessage::Segment(request)) => {
                    log::debug!(
                        "Running segmentation request {} on {:?}",
                        request.id,
                        request.image_path
                    );
                    let result = match model.segment(&request.image_path, &request.prompt) {
                        Ok(mask) => {
                            log::debug!(
                                "Request {} done in {:?}",
                                request.id,
                                request.issued_at.elapsed()
                            );
                            WorkerResult::Mask {
                                request_id: request.id,
                                mask,
                            }
                        }
                        Err(error) => WorkerResult::Failed {
                            request_id: request.id,
                            error,
                        },
                    };
                    if result_tx.send(result).is_err() {
                        log::warn!("Result channel closed, worker thread exiting");
                        break;
                    }
                }
                Ok(ThreadMessage::Shutdown) => {
                    log::debug!("Received shutdown signal");
                    break;
                }
                Err(_) => {
                    // Channel closed, exit
                    log::debug!("Request channel closed, worker thread exiting");
                    break;
                }
            }
        }
    }

    /// Submit a segmentation prompt. Returns the assigned request id.
    ///
    /// A submit while another request is in flight supersedes it: the
    /// older result will be dropped on arrival. Before the model is
    /// ready, behavior follows the pending policy: queue the prompt
    /// (latest wins) or reject with `ModelNotLoaded`.
    pub fn submit(
        &mut self,
        image_path: impl Into<PathBuf>,
        prompt: Prompt,
    ) -> Result<u64, EngineError> {
        if self.load_failed {
            return Err(EngineError::ModelNotLoaded);
        }

        let id = self.next_id;
        self.next_id += 1;
        let request = SegmentationRequest {
            id,
            image_path: image_path.into(),
            prompt,
            issued_at: Instant::now(),
        };

        if !self.ready {
            match self.pending_policy {
                PendingPolicy::QueueLatest => {
                    if let Some(old) = self.queued.replace(request) {
                        log::debug!("Prompt {} superseded while model loads", old.id);
                    }
                    self.live_request = Some(id);
                    return Ok(id);
                }
                PendingPolicy::Reject => return Err(EngineError::ModelNotLoaded),
            }
        }

        if let Some(old) = self.live_request.replace(id) {
            log::debug!("Request {} superseded by {}", old, id);
        }
        self.send(request);
        Ok(id)
    }

    fn send(&self, request: SegmentationRequest) {
        let id = request.id;
        if self
            .request_tx
            .send(ThreadMessage::Segment(request))
            .is_err()
        {
            log::error!("Failed to send segmentation request {}: channel closed", id);
        }
    }

    /// Drop interest in a request; its result will be discarded.
    pub fn invalidate(&mut self, request_id: u64) {
        if self.live_request == Some(request_id) {
            self.live_request = None;
        }
        if self.queued.as_ref().map(|r| r.id) == Some(request_id) {
            self.queued = None;
        }
    }

    /// Drop interest in every outstanding request, e.g. when the active
    /// document changes.
    pub fn invalidate_all(&mut self) {
        if let Some(id) = self.live_request.take() {
            log::debug!("Invalidated in-flight request {}", id);
        }
        self.queued = None;
    }

    /// Drain completed results. Non-blocking.
    ///
    /// Stale results (superseded or invalidated ids) are dropped here
    /// and never surfaced.
    pub fn poll(&mut self) -> Vec<BridgeEvent> {
        let mut events = Vec::new();
        loop {
            match self.result_rx.try_recv() {
                Ok(WorkerResult::ModelReady) => {
                    self.ready = true;
                    events.push(BridgeEvent::ModelReady);
                    // Flush the prompt queued during loading
                    if let Some(request) = self.queued.take() {
                        log::debug!("Flushing queued request {}", request.id);
                        self.send(request);
                    }
                }
                Ok(WorkerResult::ModelFailed(error)) => {
                    self.load_failed = true;
                    self.live_request = None;
                    self.queued = None;
                    events.push(BridgeEvent::ModelFailed(error));
                }
                Ok(WorkerResult::Mask { request_id, mask }) => {
                    if self.live_request == Some(request_id) {
                        self.live_request = None;
                        events.push(BridgeEvent::MaskReady { request_id, mask });
                    } else {
                        log::debug!("Dropping stale result for request {}", request_id);
                    }
                }
                Ok(WorkerResult::Failed { request_id, error }) => {
                    if self.live_request == Some(request_id) {
                        self.live_request = None;
                        events.push(BridgeEvent::RequestFailed { request_id, error });
                    } else {
                        log::debug!("Dropping stale failure for request {}", request_id);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.load_failed {
                        log::warn!("Segmentation worker disconnected");
                    }
                    break;
                }
            }
        }
        events
    }

    /// Check if the model is loaded and accepting prompts.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Check if a request is awaiting a result.
    pub fn has_in_flight(&self) -> bool {
        self.live_request.is_some()
    }
}

impl Drop for SegmentationBridge {
    fn drop(&mut self) {
        log::debug!("Shutting down segmentation worker");

        // Send shutdown signal
        let _ = self.request_tx.send(ThreadMessage::Shutdown);

        // Wait for thread to finish
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                log::warn!("Segmentation worker panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use std::time::{Duration, Instant};

    /// Model returning a fixed rectangle mask, with optional load/infer
    /// failure and a small artificial delay to mimic real inference.
    struct FakeModel {
        fail_load: bool,
        fail_infer: bool,
        delay: Duration,
    }

    impl FakeModel {
        fn instant() -> Self {
            Self {
                fail_load: false,
                fail_infer: false,
                delay: Duration::ZERO,
            }
        }
    }

    impl SegmentationModel for FakeModel {
        fn load(&mut self) -> Result<(), EngineError> {
            if self.fail_load {
                return Err(EngineError::InferenceFailure("weights missing".into()));
            }
            Ok(())
        }

        fn segment(&mut self, _path: &Path, _prompt: &Prompt) -> Result<Mask, EngineError> {
            thread::sleep(self.delay);
            if self.fail_infer {
                return Err(EngineError::InferenceFailure("inference failed".into()));
            }
            Ok(Mask::from_fn(32, 32, |x, y| {
                if x >= 8 && x < 24 && y >= 8 && y < 24 {
                    1.0
                } else {
                    0.0
                }
            }))
        }
    }

    /// Poll until `n` events arrived or the deadline passes.
    fn poll_events(bridge: &mut SegmentationBridge, n: usize) -> Vec<BridgeEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < n && Instant::now() < deadline {
            events.extend(bridge.poll());
            thread::sleep(Duration::from_millis(2));
        }
        events
    }

    fn point_prompt() -> Prompt {
        Prompt::Point(Point::new(16.0, 16.0))
    }

    #[test]
    fn model_ready_then_mask() {
        let mut bridge =
            SegmentationBridge::spawn(FakeModel::instant(), PendingPolicy::QueueLatest)
                .expect("spawn");

        let events = poll_events(&mut bridge, 1);
        assert!(matches!(events[0], BridgeEvent::ModelReady));
        assert!(bridge.is_ready());

        let id = bridge.submit("img.jpg", point_prompt()).expect("submit");
        let events = poll_events(&mut bridge, 1);
        let BridgeEvent::MaskReady { request_id, mask } = &events[0] else {
            panic!("expected mask, got {:?}", events[0]);
        };
        assert_eq!(*request_id, id);
        assert!(mask.prob(16, 16) > 0.5);
        assert!(!bridge.has_in_flight());
    }

    #[test]
    fn prompt_queued_while_loading_latest_wins() {
        let mut bridge = SegmentationBridge::spawn(
            FakeModel {
                delay: Duration::from_millis(20),
                ..FakeModel::instant()
            },
            PendingPolicy::QueueLatest,
        )
        .expect("spawn");

        // Submit twice before polling ModelReady; only the second survives
        let first = bridge.submit("img.jpg", point_prompt()).expect("submit");
        let second = bridge.submit("img.jpg", point_prompt()).expect("submit");
        assert_ne!(first, second);

        let events = poll_events(&mut bridge, 2);
        assert!(matches!(events[0], BridgeEvent::ModelReady));
        let BridgeEvent::MaskReady { request_id, .. } = &events[1] else {
            panic!("expected mask, got {:?}", events[1]);
        };
        assert_eq!(*request_id, second);
        // Exactly one mask: the first prompt never ran
        assert!(bridge.poll().is_empty());
    }

    #[test]
    fn reject_policy_refuses_prompts_while_loading() {
        let mut bridge =
            SegmentationBridge::spawn(FakeModel::instant(), PendingPolicy::Reject)
                .expect("spawn");

        // Readiness is observed through poll, so this submit is early
        assert_eq!(
            bridge.submit("img.jpg", point_prompt()),
            Err(EngineError::ModelNotLoaded)
        );

        poll_events(&mut bridge, 1);
        assert!(bridge.submit("img.jpg", point_prompt()).is_ok());
    }

    #[test]
    fn newer_submit_supersedes_older() {
        let mut bridge =
            SegmentationBridge::spawn(FakeModel::instant(), PendingPolicy::QueueLatest)
                .expect("spawn");
        poll_events(&mut bridge, 1);

        // The worker processes requests in order, so the first result is
        // produced (and dropped) before the second arrives.
        let _first = bridge.submit("img.jpg", point_prompt()).expect("submit");
        let second = bridge.submit("img.jpg", point_prompt()).expect("submit");

        let events = poll_events(&mut bridge, 1);
        let BridgeEvent::MaskReady { request_id, .. } = &events[0] else {
            panic!("expected mask, got {:?}", events[0]);
        };
        assert_eq!(*request_id, second);
        assert!(bridge.poll().is_empty());
    }

    #[test]
    fn invalidated_result_is_dropped() {
        let mut bridge =
            SegmentationBridge::spawn(FakeModel::instant(), PendingPolicy::QueueLatest)
                .expect("spawn");
        poll_events(&mut bridge, 1);

        let id = bridge.submit("img.jpg", point_prompt()).expect("submit");
        bridge.invalidate(id);
        assert!(!bridge.has_in_flight());

        // Give the worker time to produce the now-unwanted result
        thread::sleep(Duration::from_millis(50));
        assert!(bridge.poll().is_empty());
    }

    #[test]
    fn invalidate_all_clears_queued_prompt() {
        let mut bridge = SegmentationBridge::spawn(
            FakeModel {
                delay: Duration::from_millis(20),
                ..FakeModel::instant()
            },
            PendingPolicy::QueueLatest,
        )
        .expect("spawn");

        bridge.submit("img.jpg", point_prompt()).expect("submit");
        bridge.invalidate_all();

        let events = poll_events(&mut bridge, 1);
        assert!(matches!(events[0], BridgeEvent::ModelReady));
        // Nothing was flushed, so no mask ever arrives
        thread::sleep(Duration::from_millis(50));
        assert!(bridge.poll().is_empty());
    }

    #[test]
    fn failed_load_rejects_submits() {
        let mut bridge = SegmentationBridge::spawn(
            FakeModel {
                fail_load: true,
                ..FakeModel::instant()
            },
            PendingPolicy::QueueLatest,
        )
        .expect("spawn");

        let events = poll_events(&mut bridge, 1);
        assert!(matches!(events[0], BridgeEvent::ModelFailed(_)));
        assert_eq!(
            bridge.submit("img.jpg", point_prompt()),
            Err(EngineError::ModelNotLoaded)
        );
    }

    #[test]
    fn inference_failure_surfaces_for_live_request() {
        let mut bridge = SegmentationBridge::spawn(
            FakeModel {
                fail_infer: true,
                ..FakeModel::instant()
            },
            PendingPolicy::QueueLatest,
        )
        .expect("spawn");
        poll_events(&mut bridge, 1);

        let id = bridge.submit("img.jpg", point_prompt()).expect("submit");
        let events = poll_events(&mut bridge, 1);
        let BridgeEvent::RequestFailed { request_id, error } = &events[0] else {
            panic!("expected failure, got {:?}", events[0]);
        };
        assert_eq!(*request_id, id);
        assert!(matches!(error, EngineError::InferenceFailure(_)));
    }

    #[test]
    fn drop_joins_worker_thread() {
        let bridge =
            SegmentationBridge::spawn(FakeModel::instant(), PendingPolicy::QueueLatest)
                .expect("spawn");
        // Must not hang
        drop(bridge);
    }
}
