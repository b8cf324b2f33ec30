use anyhow::Result;
use std::time::Duration;

use crate::capture::Capabilities;
use crate::paths::{self, Layout};
use crate::process::{self, ProcessController};
use crate::registry::Registry;
use crate::report::{ConsoleReporter, Reporter};

/// Everything one invocation needs, built once in `main` and passed down.
pub struct Context {
    pub layout: Layout,
    pub registry: Registry,
    pub controller: Box<dyn ProcessController>,
    pub reporter: Box<dyn Reporter>,
    pub capabilities: Capabilities,
    pub graceful_timeout: Duration,
}

impl Context {
    pub fn from_env() -> Result<Self> {
        let layout = Layout::new(paths::mdc_home()?);
        Ok(Self::new(
            layout,
            process::platform_controller(),
            Box::new(ConsoleReporter::stdout()),
            Capabilities::probe(),
        ))
    }

    pub fn new(
        layout: Layout,
        controller: Box<dyn ProcessController>,
        reporter: Box<dyn Reporter>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            registry: Registry::new(layout.clone()),
            layout,
            controller,
            reporter,
            capabilities,
            graceful_timeout: process::DEFAULT_GRACEFUL_TIMEOUT,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::report::testing::RecordingReporter;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Context over a temp base directory with plain pipes and a recording
    /// reporter.
    pub fn context() -> (TempDir, Context, Arc<RecordingReporter>) {
        context_with(Capabilities::plain())
    }

    pub fn context_with(capabilities: Capabilities) -> (TempDir, Context, Arc<RecordingReporter>) {
        let base = TempDir::new().expect("tempdir");
        let reporter = Arc::new(RecordingReporter::default());
        let ctx = Context::new(
            Layout::new(base.path().join("mdc")),
            process::platform_controller(),
            Box::new(reporter.clone()),
            capabilities,
        );
        (base, ctx, reporter)
    }
}
