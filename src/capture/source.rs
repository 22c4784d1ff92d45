//! A capture source: applies settings changes to its session

use std::sync::Arc;

use tracing::{error, info};

use super::device::DeviceOpener;
use super::error::{CaptureError, Result};
use super::session::{Session, SessionState};
use super::sink::FrameSink;
use crate::{CaptureSettings, StreamConfig};

/// Owns one session and restarts it whenever the settings change
pub struct CaptureSource<O: DeviceOpener> {
    session: Session<O>,
    sink: Arc<dyn FrameSink>,
    settings: Option<CaptureSettings>,
}

impl<O: DeviceOpener> CaptureSource<O> {
    pub fn new(opener: O, sink: Arc<dyn FrameSink>, options: StreamConfig) -> Self {
        Self {
            session: Session::new(opener, options),
            sink,
            settings: None,
        }
    }

    /// Apply new settings. Returns `Ok(false)` when nothing changed.
    pub fn update(&mut self, settings: &CaptureSettings) -> Result<bool> {
        if self.settings.as_ref() == Some(settings) {
            return Ok(false);
        }

        self.settings = Some(settings.clone());
        self.restart()?;
        Ok(true)
    }

    /// Tear down and bring the session up again with the recorded settings
    pub fn restart(&mut self) -> Result<()> {
        let Some(settings) = self.settings.clone() else {
            return Err(CaptureError::NotConfigured);
        };

        let result = self
            .session
            .configure(&settings)
            .map(|_| ())
            .and_then(|()| self.session.start(Arc::clone(&self.sink)));

        match &result {
            Ok(()) => info!(device = %settings.device_path, "Capture running"),
            Err(e) => error!(device = %settings.device_path, "Capture failed to start: {}", e),
        }
        result
    }

    /// Report a capture thread that died on its own
    pub fn poll_fault(&mut self) -> Option<CaptureError> {
        self.session.poll_fault()
    }

    pub fn settings(&self) -> Option<&CaptureSettings> {
        self.settings.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &Session<O> {
        &self.session
    }

    pub fn shutdown(&mut self) {
        self.session.teardown();
    }
}
