use std::ops::{Deref, DerefMut};

use philote_net::{Channel, Method};
use philote_types::config::ClientConfig;
use philote_types::{Partials, Result, VariableType, Variables};

use crate::discipline::{DisciplineClient, PartialsAssembly, VariableAssembly};

/// Client for an explicit discipline. Negotiation methods come from the
/// wrapped [`DisciplineClient`].
pub struct ExplicitClient {
    base: DisciplineClient,
}

impl ExplicitClient {
    pub fn new(channel: Channel, config: ClientConfig) -> Self {
        Self { base: DisciplineClient::new(channel, config) }
    }

    /// Evaluate the outputs. Only declared inputs present in `inputs` are
    /// sent; the server treats the rest as zero.
    pub async fn compute_function(&mut self, inputs: &Variables) -> Result<Variables> {
        let outgoing = self.base.selected(VariableType::Input, inputs)?;
        let declared = self
            .base
            .variable_meta_all()
            .iter()
            .filter(|m| m.kind == VariableType::Output);
        let mut outputs = VariableAssembly::new(VariableType::Output, declared);
        self.base
            .exchange(Method::ComputeFunction, outgoing, |chunk| outputs.accept(chunk))
            .await?;
        outputs.finish()
    }

    /// Evaluate every declared Jacobian block.
    pub async fn compute_gradient(&mut self, inputs: &Variables) -> Result<Partials> {
        let outgoing = self.base.selected(VariableType::Input, inputs)?;
        let mut partials = PartialsAssembly::new(self.base.partials_meta());
        self.base
            .exchange(Method::ComputeGradient, outgoing, |chunk| partials.accept(chunk))
            .await?;
        partials.finish()
    }
}

impl Deref for ExplicitClient {
    type Target = DisciplineClient;

    fn deref(&self) -> &DisciplineClient {
        &self.base
    }
}

impl DerefMut for ExplicitClient {
    fn deref_mut(&mut self) -> &mut DisciplineClient {
        &mut self.base
    }
}
