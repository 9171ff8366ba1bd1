//! Callback surface implemented by discipline authors.
//!
//! Every hook has a no-op default, so a discipline only overrides what it
//! needs. Hooks report failure through `anyhow`; the server turns errors and
//! panics alike into an `internal` status without bringing the process down.
//!
//! ```
//! use philote_discipline::{Discipline, DisciplineMeta, ExplicitDiscipline};
//! use philote_types::{Partials, PartialKey, Variables};
//!
//! /// f(x) = 2x
//! struct Double;
//!
//! impl Discipline for Double {
//!     fn setup(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
//!         meta.add_input("x", &[1], "")?;
//!         meta.add_output("f", &[1], "")?;
//!         Ok(())
//!     }
//!
//!     fn setup_partials(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
//!         meta.declare_partials("f", "x")?;
//!         Ok(())
//!     }
//! }
//!
//! impl ExplicitDiscipline for Double {
//!     fn compute(&self, inputs: &Variables, outputs: &mut Variables) -> anyhow::Result<()> {
//!         let x = inputs["x"][0];
//!         if let Some(f) = outputs.get_mut("f") {
//!             f[0] = 2.0 * x;
//!         }
//!         Ok(())
//!     }
//!
//!     fn compute_partials(&self, _inputs: &Variables, partials: &mut Partials) -> anyhow::Result<()> {
//!         if let Some(df) = partials.get_mut(&PartialKey::new("f", "x")) {
//!             df[0] = 2.0;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use philote_types::{DisciplineOptions, DisciplineProperties, Partials, Variables};

use crate::meta::{DisciplineKind, DisciplineMeta};

/// Lifecycle hooks shared by explicit and implicit disciplines.
pub trait Discipline: Send + Sync {
    fn properties(&self) -> DisciplineProperties {
        DisciplineProperties::default()
    }

    /// Runs once at registration. Declare accepted options here with
    /// [`DisciplineMeta::add_option`].
    fn initialize(&mut self, _meta: &mut DisciplineMeta) -> anyhow::Result<()> {
        Ok(())
    }

    /// Receives the options sent by the client.
    fn set_options(&mut self, _options: &DisciplineOptions) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after every `set_options`.
    fn configure(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Declare inputs and outputs. Metadata from any previous setup has
    /// already been cleared.
    fn setup(&mut self, _meta: &mut DisciplineMeta) -> anyhow::Result<()> {
        Ok(())
    }

    /// Declare partials, after all variables are known.
    fn setup_partials(&mut self, _meta: &mut DisciplineMeta) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Outputs computed directly from inputs.
pub trait ExplicitDiscipline: Discipline {
    /// Fill `outputs`, which arrives zero-filled and sized from metadata.
    fn compute(&self, _inputs: &Variables, _outputs: &mut Variables) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fill every declared d(output)/d(input) block.
    fn compute_partials(&self, _inputs: &Variables, _partials: &mut Partials) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Outputs defined by residuals R(inputs, outputs) = 0.
pub trait ImplicitDiscipline: Discipline {
    /// Fill one residual per output, keyed by the output's name.
    fn compute_residuals(
        &self,
        _inputs: &Variables,
        _outputs: &Variables,
        _residuals: &mut Variables,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Solve R = 0 for `outputs`.
    fn solve_residuals(&self, _inputs: &Variables, _outputs: &mut Variables) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fill every declared d(residual)/d(variable) block, including blocks
    /// taken with respect to outputs.
    fn compute_residual_gradients(
        &self,
        _inputs: &Variables,
        _outputs: &Variables,
        _partials: &mut Partials,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A registered discipline of either kind.
pub enum Hosted {
    Explicit(Box<dyn ExplicitDiscipline>),
    Implicit(Box<dyn ImplicitDiscipline>),
}

/// Run `$body` with `$d` bound to the discipline, whichever kind it is.
macro_rules! with_base {
    ($hosted:expr, $d:ident => $body:expr) => {
        match $hosted {
            Hosted::Explicit($d) => $body,
            Hosted::Implicit($d) => $body,
        }
    };
}

impl Hosted {
    pub fn explicit(discipline: impl ExplicitDiscipline + 'static) -> Self {
        Self::Explicit(Box::new(discipline))
    }

    pub fn implicit(discipline: impl ImplicitDiscipline + 'static) -> Self {
        Self::Implicit(Box::new(discipline))
    }

    pub fn kind(&self) -> DisciplineKind {
        match self {
            Self::Explicit(_) => DisciplineKind::Explicit,
            Self::Implicit(_) => DisciplineKind::Implicit,
        }
    }

    pub fn as_explicit(&self) -> Option<&dyn ExplicitDiscipline> {
        match self {
            Self::Explicit(d) => Some(d.as_ref()),
            Self::Implicit(_) => None,
        }
    }

    pub fn as_implicit(&self) -> Option<&dyn ImplicitDiscipline> {
        match self {
            Self::Implicit(d) => Some(d.as_ref()),
            Self::Explicit(_) => None,
        }
    }

    pub(crate) fn properties(&self) -> DisciplineProperties {
        with_base!(self, d => d.properties())
    }

    pub(crate) fn initialize(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
        with_base!(self, d => d.initialize(meta))
    }

    pub(crate) fn set_options(&mut self, options: &DisciplineOptions) -> anyhow::Result<()> {
        with_base!(self, d => d.set_options(options))
    }

    pub(crate) fn configure(&mut self) -> anyhow::Result<()> {
        with_base!(self, d => d.configure())
    }

    pub(crate) fn setup(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
        with_base!(self, d => d.setup(meta))
    }

    pub(crate) fn setup_partials(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
        with_base!(self, d => d.setup_partials(meta))
    }
}
