use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info};

use philote_types::{DisciplineOptions, DisciplineProperties, PhiloteError, Result, StreamOptions};

use crate::discipline::Hosted;
use crate::meta::{DisciplineKind, DisciplineMeta};

// ── Lifecycle State Machine ──────────────────────────────────────────────────

/// Created → Initialized → Configured → VariablesDeclared → PartialsDeclared → Ready
///
/// `set_options` and `setup` may be repeated from any state after
/// `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Registered but `initialize` has not run.
    Created,
    /// Options declared.
    Initialized,
    /// Options applied and `configure` has run.
    Configured,
    /// `setup` declared the variables.
    VariablesDeclared,
    /// `setup_partials` declared the partials.
    PartialsDeclared,
    /// Metadata validated; compute calls are accepted.
    Ready,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created           => write!(f, "Created"),
            Self::Initialized       => write!(f, "Initialized"),
            Self::Configured        => write!(f, "Configured"),
            Self::VariablesDeclared => write!(f, "VariablesDeclared"),
            Self::PartialsDeclared  => write!(f, "PartialsDeclared"),
            Self::Ready             => write!(f, "Ready"),
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

/// A discipline together with its metadata, negotiated stream options and
/// lifecycle state.
pub struct Lifecycle {
    hosted: Hosted,
    meta: DisciplineMeta,
    stream: StreamOptions,
    state: LifecycleState,
    /// Bumped by every successful `setup`, so a call can tell whether the
    /// metadata it sized buffers from is still current.
    generation: u64,
}

impl Lifecycle {
    pub fn new(hosted: Hosted) -> Self {
        let meta = DisciplineMeta::new(hosted.kind());
        Self {
            hosted,
            meta,
            stream: StreamOptions::default(),
            state: LifecycleState::Created,
            generation: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn kind(&self) -> DisciplineKind {
        self.hosted.kind()
    }

    pub fn hosted(&self) -> &Hosted {
        &self.hosted
    }

    pub fn meta(&self) -> &DisciplineMeta {
        &self.meta
    }

    pub fn stream_options(&self) -> StreamOptions {
        self.stream
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn properties(&self) -> Result<DisciplineProperties> {
        run_hook("properties", || Ok(self.hosted.properties()))
    }

    /// Run the `initialize` hook. `Created → Initialized`.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != LifecycleState::Created {
            return Err(PhiloteError::Precondition(format!(
                "cannot initialize a discipline in state {}",
                self.state
            )));
        }
        let Self { hosted, meta, .. } = self;
        run_hook("initialize", || hosted.initialize(meta))?;
        self.state = LifecycleState::Initialized;
        debug!(kind = %self.kind(), options = self.meta.available_options().len(), "discipline initialized");
        Ok(())
    }

    pub fn set_stream_options(&mut self, options: StreamOptions) -> Result<()> {
        options.validate()?;
        self.stream = options;
        debug!(chunk_size = options.chunk_size, "stream options set");
        Ok(())
    }

    /// Apply options, then run `configure`. Any state from `Initialized`
    /// on moves to `Configured`; a later `setup` is needed before computing.
    pub fn set_options(&mut self, options: &DisciplineOptions) -> Result<()> {
        self.require_at_least(LifecycleState::Initialized, "set options")?;
        let hosted = &mut self.hosted;
        run_hook("set_options", || hosted.set_options(options))?;
        run_hook("configure", || hosted.configure())?;
        self.state = LifecycleState::Configured;
        debug!(options = options.values.len(), "discipline configured");
        Ok(())
    }

    /// Clear all variable and partial metadata, then run `setup` and
    /// `setup_partials`. On failure the state reflects the last step that
    /// completed.
    pub fn setup(&mut self) -> Result<()> {
        self.require_at_least(LifecycleState::Initialized, "set up")?;
        self.meta.clear_variables();
        self.meta.clear_partials();
        self.state = self.state.min(LifecycleState::Configured);
        self.generation += 1;

        let Self { hosted, meta, .. } = self;
        run_hook("setup", || hosted.setup(meta))?;
        self.meta
            .validate()
            .map_err(|e| PhiloteError::callback("setup", e.to_string()))?;
        self.state = LifecycleState::VariablesDeclared;

        let Self { hosted, meta, .. } = self;
        run_hook("setup_partials", || hosted.setup_partials(meta))?;
        self.meta
            .validate()
            .map_err(|e| PhiloteError::callback("setup_partials", e.to_string()))?;
        self.state = LifecycleState::PartialsDeclared;

        self.state = LifecycleState::Ready;
        info!(
            kind = %self.kind(),
            variables = self.meta.variables().len(),
            partials = self.meta.partials().len(),
            "discipline ready"
        );
        Ok(())
    }

    pub fn require_ready(&self) -> Result<()> {
        if self.state != LifecycleState::Ready {
            return Err(PhiloteError::Precondition(format!(
                "discipline is not set up (state {})",
                self.state
            )));
        }
        Ok(())
    }

    fn require_at_least(&self, min: LifecycleState, action: &str) -> Result<()> {
        if self.state < min {
            return Err(PhiloteError::Precondition(format!(
                "cannot {action} a discipline in state {}",
                self.state
            )));
        }
        Ok(())
    }
}

// ── Hook guard ───────────────────────────────────────────────────────────────

/// Run a discipline hook, turning its error or panic into a `Callback` error.
pub(crate) fn run_hook<T>(hook: &str, f: impl FnOnce() -> anyhow::Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PhiloteError::callback(hook, format!("{e:#}"))),
        Err(payload) => Err(PhiloteError::callback(
            hook,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
