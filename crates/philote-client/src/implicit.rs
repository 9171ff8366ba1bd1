use std::ops::{Deref, DerefMut};

use philote_net::{Channel, Method};
use philote_types::config::ClientConfig;
use philote_types::{Partials, Result, VariableMetaData, VariableType, Variables};

use crate::discipline::{DisciplineClient, PartialsAssembly, VariableAssembly};

/// Client for an implicit discipline. Negotiation methods come from the
/// wrapped [`DisciplineClient`].
pub struct ImplicitClient {
    base: DisciplineClient,
}

impl ImplicitClient {
    pub fn new(channel: Channel, config: ClientConfig) -> Self {
        Self { base: DisciplineClient::new(channel, config) }
    }

    /// Residuals at the candidate `outputs`, one per declared output and
    /// keyed by the output's name.
    pub async fn compute_residuals(
        &mut self,
        inputs: &Variables,
        outputs: &Variables,
    ) -> Result<Variables> {
        let mut outgoing = self.base.selected(VariableType::Input, inputs)?;
        outgoing.extend(self.base.selected(VariableType::Output, outputs)?);

        let mut residuals = VariableAssembly::new(VariableType::Residual, self.declared_outputs());
        self.base
            .exchange(Method::ComputeResiduals, outgoing, |chunk| residuals.accept(chunk))
            .await?;
        residuals.finish()
    }

    /// Outputs that zero the residuals for `inputs`.
    pub async fn solve_residuals(&mut self, inputs: &Variables) -> Result<Variables> {
        let outgoing = self.base.selected(VariableType::Input, inputs)?;
        let mut outputs = VariableAssembly::new(VariableType::Output, self.declared_outputs());
        self.base
            .exchange(Method::SolveResiduals, outgoing, |chunk| outputs.accept(chunk))
            .await?;
        outputs.finish()
    }

    /// Every declared residual Jacobian block, including blocks taken with
    /// respect to outputs.
    pub async fn compute_residual_gradients(
        &mut self,
        inputs: &Variables,
        outputs: &Variables,
    ) -> Result<Partials> {
        let mut outgoing = self.base.selected(VariableType::Input, inputs)?;
        outgoing.extend(self.base.selected(VariableType::Output, outputs)?);

        let mut partials = PartialsAssembly::new(self.base.partials_meta());
        self.base
            .exchange(Method::ComputeResidualGradients, outgoing, |chunk| partials.accept(chunk))
            .await?;
        partials.finish()
    }

    fn declared_outputs(&self) -> impl Iterator<Item = &VariableMetaData> {
        self.base
            .variable_meta_all()
            .iter()
            .filter(|m| m.kind == VariableType::Output)
    }
}

impl Deref for ImplicitClient {
    type Target = DisciplineClient;

    fn deref(&self) -> &DisciplineClient {
        &self.base
    }
}

impl DerefMut for ImplicitClient {
    fn deref_mut(&mut self) -> &mut DisciplineClient {
        &mut self.base
    }
}
