// ComputeResiduals, SolveResiduals and ComputeResidualGradients.
//
// Residual evaluation needs the candidate outputs, so ComputeResiduals and
// ComputeResidualGradients accept both inputs and outputs. SolveResiduals
// accepts inputs only.

use tracing::debug;

use philote_net::{Method, ServerCall};
use philote_types::{Result, VariableType};

use super::stream::{drain, send_partials, send_variables, Accept};
use super::{unimplemented, Registration};
use crate::discipline::{Hosted, ImplicitDiscipline};
use crate::lifecycle::run_hook;
use crate::meta::DisciplineKind;

fn implicit(hosted: &Hosted, method: Method) -> Result<&dyn ImplicitDiscipline> {
    hosted
        .as_implicit()
        .ok_or_else(|| unimplemented(DisciplineKind::Explicit, method))
}

pub(crate) async fn compute_residuals(reg: &Registration, call: &mut ServerCall) -> Result<()> {
    let snap = reg.snapshot()?;
    let received = drain(call, &snap.meta, Accept::InputsAndOutputs).await?;

    let mut residuals = snap.meta.residual_buffers();
    reg.with_ready(snap.generation, |hosted| {
        let d = implicit(hosted, Method::ComputeResiduals)?;
        run_hook("compute_residuals", || {
            d.compute_residuals(&received.inputs, &received.outputs, &mut residuals)
        })
    })?;

    let declared: Vec<_> = snap.meta.outputs().collect();
    send_variables(
        call,
        "compute_residuals",
        &declared,
        &residuals,
        VariableType::Residual,
        snap.chunk_size,
    )
    .await?;
    debug!(residuals = declared.len(), "residuals computed");
    Ok(())
}

pub(crate) async fn solve_residuals(reg: &Registration, call: &mut ServerCall) -> Result<()> {
    let snap = reg.snapshot()?;
    let received = drain(call, &snap.meta, Accept::Inputs).await?;

    let mut outputs = snap.meta.output_buffers();
    reg.with_ready(snap.generation, |hosted| {
        let d = implicit(hosted, Method::SolveResiduals)?;
        run_hook("solve_residuals", || d.solve_residuals(&received.inputs, &mut outputs))
    })?;

    let declared: Vec<_> = snap.meta.outputs().collect();
    send_variables(
        call,
        "solve_residuals",
        &declared,
        &outputs,
        VariableType::Output,
        snap.chunk_size,
    )
    .await?;
    debug!(outputs = declared.len(), "residuals solved");
    Ok(())
}

pub(crate) async fn compute_residual_gradients(
    reg: &Registration,
    call: &mut ServerCall,
) -> Result<()> {
    let snap = reg.snapshot()?;
    let received = drain(call, &snap.meta, Accept::InputsAndOutputs).await?;

    let mut partials = snap.meta.partial_buffers();
    reg.with_ready(snap.generation, |hosted| {
        let d = implicit(hosted, Method::ComputeResidualGradients)?;
        run_hook("compute_residual_gradients", || {
            d.compute_residual_gradients(&received.inputs, &received.outputs, &mut partials)
        })
    })?;

    send_partials(
        call,
        "compute_residual_gradients",
        snap.meta.partials(),
        &partials,
        snap.chunk_size,
    )
    .await?;
    debug!(partials = partials.len(), "residual gradients computed");
    Ok(())
}
