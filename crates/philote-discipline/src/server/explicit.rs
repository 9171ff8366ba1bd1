// ComputeFunction and ComputeGradient.

use tracing::debug;

use philote_net::{Method, ServerCall};
use philote_types::{Result, VariableType};

use super::stream::{drain, send_partials, send_variables, Accept};
use super::{unimplemented, Registration};
use crate::lifecycle::run_hook;
use crate::meta::DisciplineKind;

pub(crate) async fn compute_function(reg: &Registration, call: &mut ServerCall) -> Result<()> {
    let snap = reg.snapshot()?;
    let received = drain(call, &snap.meta, Accept::Inputs).await?;

    let mut outputs = snap.meta.output_buffers();
    reg.with_ready(snap.generation, |hosted| {
        let d = hosted
            .as_explicit()
            .ok_or_else(|| unimplemented(DisciplineKind::Implicit, Method::ComputeFunction))?;
        run_hook("compute", || d.compute(&received.inputs, &mut outputs))
    })?;

    let declared: Vec<_> = snap.meta.outputs().collect();
    send_variables(call, "compute", &declared, &outputs, VariableType::Output, snap.chunk_size)
        .await?;
    debug!(outputs = declared.len(), "function computed");
    Ok(())
}

pub(crate) async fn compute_gradient(reg: &Registration, call: &mut ServerCall) -> Result<()> {
    let snap = reg.snapshot()?;
    let received = drain(call, &snap.meta, Accept::Inputs).await?;

    let mut partials = snap.meta.partial_buffers();
    reg.with_ready(snap.generation, |hosted| {
        let d = hosted
            .as_explicit()
            .ok_or_else(|| unimplemented(DisciplineKind::Implicit, Method::ComputeGradient))?;
        run_hook("compute_partials", || d.compute_partials(&received.inputs, &mut partials))
    })?;

    send_partials(call, "compute_partials", snap.meta.partials(), &partials, snap.chunk_size)
        .await?;
    debug!(partials = partials.len(), "gradient computed");
    Ok(())
}
