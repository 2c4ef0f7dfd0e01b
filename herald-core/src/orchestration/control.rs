use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::HeraldError;

/// Shared on/off gate for claiming new work.
///
/// Cloned into every producer; flipping it takes effect on the next tick.
/// Work already on the bus is still delivered.
#[derive(Clone)]
pub struct ProcessingSwitch {
    enabled: Arc<AtomicBool>,
}

impl fmt::Debug for ProcessingSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingSwitch")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Default for ProcessingSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ProcessingSwitch {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }

    /// Applies an administrative command and returns the resulting state.
    pub fn apply(&self, command: ProcessingCommand) -> bool {
        match command {
            ProcessingCommand::Start => self.enable(),
            ProcessingCommand::Stop => self.disable(),
        }
        self.is_enabled()
    }
}

/// Administrative command understood by [`ProcessingSwitch::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingCommand {
    Start,
    Stop,
}

impl FromStr for ProcessingCommand {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(ProcessingCommand::Start),
            "stop" => Ok(ProcessingCommand::Stop),
            "" => Err(HeraldError::Validation("command is required".into())),
            other => Err(HeraldError::Validation(format!(
                "invalid command: {other}"
            ))),
        }
    }
}
