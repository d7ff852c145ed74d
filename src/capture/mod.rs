//! Live capture layer
//!
//! A `CaptureSession` owns everything the live path needs: the camera, the
//! periodic analysis thread, the auto-capture controller and the channels that
//! report guidance back to the caller. Closing the session (explicitly or by
//! dropping it) stops the loop, joins the thread and releases the camera, in
//! that order, exactly once.

pub mod auto_capture;
pub mod frame;
pub mod guide;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::CaptureError;
use crate::shared::{SessionEvent, SessionEventKind, SessionState};
use crate::vision::FrameAnalyzer;

pub use auto_capture::{AutoCaptureController, CaptureDecision, CaptureState, StabilityCounter};
pub use frame::CapturedFrame;
pub use guide::{FitMode, GuideRegion, ScreenLayout, ScreenRect};

/// A live camera
///
/// Implementations wrap a platform camera API; the session calls them from its
/// analysis thread, never concurrently.
pub trait CameraSource: Send {
    /// Start streaming; failure ends the live path but not the application
    fn open(&mut self) -> Result<(), CaptureError>;
    /// Most recent preview frame, if the stream has produced one
    fn latest_frame(&mut self) -> Option<CapturedFrame>;
    /// Full resolution still
    fn capture_still(&mut self) -> Result<CapturedFrame, CaptureError>;
    /// Stop streaming and release the device
    fn close(&mut self);
}

/// Camera that serves one fixed image as both preview and still
///
/// Used to drive the live path from an image file.
#[derive(Debug, Clone)]
pub struct StillImageCamera {
    frame: CapturedFrame,
    open: bool,
}

impl StillImageCamera {
    pub fn new(frame: CapturedFrame) -> Self {
        Self { frame, open: false }
    }
}

impl CameraSource for StillImageCamera {
    fn open(&mut self) -> Result<(), CaptureError> {
        if !self.frame.is_complete() {
            return Err(CaptureError::CameraUnavailable("image has no pixels".to_string()));
        }
        self.open = true;
        Ok(())
    }

    fn latest_frame(&mut self) -> Option<CapturedFrame> {
        self.open.then(|| self.frame.clone())
    }

    fn capture_still(&mut self) -> Result<CapturedFrame, CaptureError> {
        if !self.open {
            return Err(CaptureError::SessionClosed);
        }
        Ok(self.frame.clone())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Cloneable handle that asks a session's analysis loop to stop
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    shutdown: Sender<()>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Stop the analysis loop; the owning session still releases the camera
    pub fn stop(&self) {
        let _ = self.shutdown.try_send(());
    }
}

/// Live camera session
pub struct CaptureSession {
    id: Uuid,
    camera: Arc<Mutex<Box<dyn CameraSource>>>,
    layout: Arc<RwLock<ScreenLayout>>,
    state: Arc<RwLock<SessionState>>,
    shutdown: Sender<()>,
    events: Receiver<SessionEvent>,
    still: Receiver<CapturedFrame>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl CaptureSession {
    /// Open the camera and start the analysis loop
    pub fn open(
        mut camera: Box<dyn CameraSource>,
        layout: ScreenLayout,
        config: &AppConfig,
    ) -> Result<Self, CaptureError> {
        let id = Uuid::new_v4();
        if let Err(e) = camera.open() {
            warn!("Camera unavailable for session {}: {}", id, e);
            return Err(e);
        }

        let camera = Arc::new(Mutex::new(camera));
        let layout = Arc::new(RwLock::new(layout));
        let state = Arc::new(RwLock::new(SessionState {
            active: true,
            ..Default::default()
        }));
        let (shutdown, shutdown_rx) = bounded(1);
        let (event_tx, events) = unbounded();
        let (still_tx, still) = bounded(1);

        let worker = AnalysisLoop {
            session_id: id,
            camera: camera.clone(),
            layout: layout.clone(),
            state: state.clone(),
            analyzer: FrameAnalyzer::new(config.analyzer.clone()),
            controller: AutoCaptureController::new(config.auto_capture.clone()),
            events: event_tx,
            still: still_tx,
        };
        let interval = config.analyzer.tick_interval();
        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", id))
            .spawn(move || worker.run(interval, shutdown_rx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                camera.lock().close();
                return Err(CaptureError::CameraUnavailable(format!(
                    "failed to start analysis: {}",
                    e
                )));
            }
        };

        info!("Capture session {} opened", id);
        Ok(Self {
            id,
            camera,
            layout,
            state,
            shutdown,
            events,
            still,
            worker: Some(handle),
            closed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Guidance and lifecycle events, tagged with this session's id
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.clone()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.id,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Replace the on-screen layout, e.g. after a resize
    pub fn set_layout(&self, layout: ScreenLayout) {
        *self.layout.write() = layout;
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Block until auto-capture takes the still or the loop stops
    pub fn wait_for_still(&self) -> Result<CapturedFrame, CaptureError> {
        if self.closed {
            return Err(CaptureError::SessionClosed);
        }
        self.still.recv().map_err(|_| CaptureError::SessionClosed)
    }

    /// Tear the session down; safe to call more than once
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Analysis thread of session {} panicked", self.id);
            }
        }
        self.camera.lock().close();
        self.state.write().active = false;
        info!("Capture session {} closed", self.id);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// State moved into the analysis thread
struct AnalysisLoop {
    session_id: Uuid,
    camera: Arc<Mutex<Box<dyn CameraSource>>>,
    layout: Arc<RwLock<ScreenLayout>>,
    state: Arc<RwLock<SessionState>>,
    analyzer: FrameAnalyzer,
    controller: AutoCaptureController,
    events: Sender<SessionEvent>,
    still: Sender<CapturedFrame>,
}

impl AnalysisLoop {
    fn run(mut self, interval: std::time::Duration, shutdown: Receiver<()>) {
        let ticker = tick(interval);
        debug!("Analysis loop for session {} running every {:?}", self.session_id, interval);

        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => {
                    if self.on_tick() {
                        break;
                    }
                }
            }
        }

        self.controller.reset();
        self.state.write().active = false;
        self.emit(SessionEventKind::Closed);
        debug!("Analysis loop for session {} stopped", self.session_id);
    }

    /// Run one tick; returns true once the still has been delivered
    fn on_tick(&mut self) -> bool {
        if self.controller.is_capture_in_flight() {
            trace!("Capture in flight, skipping tick");
            return false;
        }

        let frame = self.camera.lock().latest_frame();
        let layout = *self.layout.read();
        let verdict = self.analyzer.analyze(frame.as_ref(), &layout);
        trace!("Tick verdict: {:?}", verdict.reason());

        let before = self.controller.state();
        let decision = self.controller.observe(verdict.reason(), Instant::now());
        {
            let mut state = self.state.write();
            state.ticks += 1;
            state.last_verdict = Some(verdict);
            state.capture_state = self.controller.state();
        }
        self.emit(SessionEventKind::Guidance(verdict));
        if self.controller.state() != before {
            self.emit(SessionEventKind::StateChanged(self.controller.state()));
        }

        if decision == CaptureDecision::Capture {
            return self.take_still();
        }
        false
    }

    fn take_still(&mut self) -> bool {
        let result = self.camera.lock().capture_still();
        match result {
            Ok(still) if still.is_complete() => {
                info!(
                    "Session {} captured still {}x{}",
                    self.session_id, still.width, still.height
                );
                self.controller.capture_completed();
                self.state.write().still_captured = true;
                self.emit(SessionEventKind::StillCaptured {
                    width: still.width,
                    height: still.height,
                });
                let _ = self.still.try_send(still);
                true
            }
            other => {
                let error = match other {
                    Err(e) => e,
                    Ok(_) => CaptureError::StillFailed("incomplete frame".to_string()),
                };
                warn!("Still capture failed: {}", error);
                self.controller.capture_failed();
                self.state.write().capture_state = self.controller.state();
                self.emit(SessionEventKind::CaptureFailed(error));
                self.emit(SessionEventKind::StateChanged(self.controller.state()));
                false
            }
        }
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.events.send(SessionEvent {
            session_id: self.session_id,
            kind,
        });
    }
}
