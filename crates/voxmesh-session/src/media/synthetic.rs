//! In-process capture backend with no hardware behind it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use voxmesh_common::VoiceError;

use super::{CaptureBackend, CaptureHandle, MediaConstraints};

/// Grants or denies capture on demand and counts open devices, which
/// stands in for the OS microphone indicator.
#[derive(Debug)]
pub struct SyntheticCapture {
    allow: AtomicBool,
    next_device: AtomicU64,
    open: AtomicUsize,
    closes: AtomicUsize,
}

impl SyntheticCapture {
    pub fn granting() -> Self {
        Self::with_permission(true)
    }

    pub fn denying() -> Self {
        Self::with_permission(false)
    }

    fn with_permission(allow: bool) -> Self {
        Self {
            allow: AtomicBool::new(allow),
            next_device: AtomicU64::new(1),
            open: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_allowed(&self, allow: bool) {
        self.allow.store(allow, Ordering::SeqCst);
    }

    /// Devices currently held open.
    pub fn open_devices(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::granting()
    }
}

#[async_trait]
impl CaptureBackend for SyntheticCapture {
    async fn open(&self, constraints: &MediaConstraints) -> Result<CaptureHandle, VoiceError> {
        if !self.allow.load(Ordering::SeqCst) {
            return Err(VoiceError::MediaAccessDenied(
                "capture permission refused".into(),
            ));
        }
        let device_id = self.next_device.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(CaptureHandle {
            device_id,
            label: constraints
                .input_device
                .clone()
                .unwrap_or_else(|| format!("synthetic-{device_id}")),
        })
    }

    fn close(&self, _handle: &CaptureHandle) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}
