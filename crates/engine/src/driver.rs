//! Device driver boundary.
//!
//! The engine never interprets UI semantics itself; it hands steps to a
//! [`Driver`] and records the outcome. Driver internals (Appium,
//! UIAutomator, XCUITest bridges) are opaque to the runner.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tapflow_types::{CommandResult, Platform, Step};

/// Application state reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
    Stopped,
    Unknown,
}

/// Identity of the device a driver is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub platform: Platform,
    pub device_id: String,
}

/// The external boundary that enacts steps against a device.
///
/// Calls are synchronous and may block. `set_find_timeout` must use interior
/// mutability: the flow interpreter installs the flow-level command timeout
/// through a shared reference at flow start.
pub trait Driver: Send + Sync {
    /// Executes one step. Step-level failures are reported through the
    /// result, not as a panic or transport error.
    fn execute(&self, step: &Step) -> CommandResult;

    /// PNG screenshot of the current screen.
    fn screenshot(&self) -> Result<Vec<u8>>;

    /// Opaque view-hierarchy dump (XML or similar).
    fn view_hierarchy(&self) -> Result<Vec<u8>>;

    fn app_state(&self) -> AppState;

    fn platform_info(&self) -> PlatformInfo;

    /// Idempotent mutation of the driver's element-find default, in ms.
    fn set_find_timeout(&self, timeout_ms: u64);
}

/// A driver that succeeds at everything without touching a device. Useful
/// for previews and tests.
#[derive(Debug, Default)]
pub struct NoopDriver {
    find_timeout_ms: AtomicU64,
}

impl Driver for NoopDriver {
    fn execute(&self, step: &Step) -> CommandResult {
        CommandResult::ok(format!("{} (noop)", step.kind.tag()))
    }

    fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    fn view_hierarchy(&self) -> Result<Vec<u8>> {
        Ok(b"<hierarchy/>".to_vec())
    }

    fn app_state(&self) -> AppState {
        AppState::Unknown
    }

    fn platform_info(&self) -> PlatformInfo {
        PlatformInfo {
            platform: Platform::Android,
            device_id: "noop".to_string(),
        }
    }

    fn set_find_timeout(&self, timeout_ms: u64) {
        self.find_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }
}

impl NoopDriver {
    /// Last installed find timeout, for assertions in tests.
    pub fn find_timeout_ms(&self) -> u64 {
        self.find_timeout_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapflow_types::StepKind;

    #[test]
    fn noop_driver_succeeds_and_remembers_timeout() {
        let driver = NoopDriver::default();
        let result = driver.execute(&Step::new(StepKind::Back));
        assert!(result.success);
        driver.set_find_timeout(15_000);
        assert_eq!(driver.find_timeout_ms(), 15_000);
    }
}
