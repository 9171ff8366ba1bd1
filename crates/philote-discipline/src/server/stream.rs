// Moving compute-call data between the call stream and metadata-shaped
// buffers.

use tracing::debug;

use philote_net::{send_variable, ChunkTag, ServerCall};
use philote_types::variable::shape_len;
use philote_types::{
    PartialKey, Partials, PartialsMetaData, PhiloteError, Result, Variable, VariableMetaData,
    VariableType, Variables,
};

use crate::meta::DisciplineMeta;

/// Which roles a compute call accepts on its inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Accept {
    Inputs,
    InputsAndOutputs,
}

#[derive(Debug)]
pub(crate) struct Received {
    pub inputs: Variables,
    pub outputs: Variables,
}

/// Drain the inbound stream into zero-filled buffers sized from `meta`.
///
/// Every chunk must name a declared variable, carry that variable's role,
/// and have a role this call accepts. Values the client did not send stay
/// zero.
pub(crate) async fn drain(
    call: &mut ServerCall,
    meta: &DisciplineMeta,
    accept: Accept,
) -> Result<Received> {
    let mut inputs = meta.input_buffers();
    let mut outputs = match accept {
        Accept::Inputs => Variables::new(),
        Accept::InputsAndOutputs => meta.output_buffers(),
    };

    let mut chunks = 0usize;
    while let Some(msg) = call.recv().await? {
        let chunk = msg.into_chunk()?;
        let declared = meta
            .lookup(&chunk.name)
            .ok_or_else(|| PhiloteError::Protocol(format!("Variable not found: {}", chunk.name)))?;

        if chunk.kind != declared.kind {
            return Err(PhiloteError::Protocol(format!(
                "Type mismatch for variable '{}': chunk is {} but it is declared {}",
                chunk.name, chunk.kind, declared.kind
            )));
        }

        let target = match (declared.kind, accept) {
            (VariableType::Input, _) => inputs.get_mut(&chunk.name),
            (VariableType::Output, Accept::InputsAndOutputs) => outputs.get_mut(&chunk.name),
            (kind, _) => {
                return Err(PhiloteError::Protocol(format!(
                    "{} does not accept {kind} variable '{}'",
                    call.method(),
                    chunk.name
                )))
            }
        };
        target
            .ok_or_else(|| PhiloteError::Protocol(format!("Variable not found: {}", chunk.name)))?
            .assign_chunk(&chunk)?;
        chunks += 1;
    }

    debug!(method = %call.method(), chunks, "inbound stream drained");
    Ok(Received { inputs, outputs })
}

/// Stream `values` back in metadata order, one variable per declared entry.
/// A hook that dropped or resized a declared variable is reported against
/// `hook`.
pub(crate) async fn send_variables(
    call: &mut ServerCall,
    hook: &str,
    declared: &[&VariableMetaData],
    values: &Variables,
    kind: VariableType,
    chunk_size: usize,
) -> Result<()> {
    let cancel = call.cancel_token().clone();
    for m in declared {
        let var = checked(hook, &m.name, &m.shape, values.get(&m.name))?;
        let tag = ChunkTag::variable(&m.name, kind);
        send_variable(&mut *call, tag, var, chunk_size, Some(&cancel)).await?;
    }
    Ok(())
}

/// Stream every declared Jacobian block back, tagged with output and input.
pub(crate) async fn send_partials(
    call: &mut ServerCall,
    hook: &str,
    declared: &[PartialsMetaData],
    values: &Partials,
    chunk_size: usize,
) -> Result<()> {
    let cancel = call.cancel_token().clone();
    for p in declared {
        let key = PartialKey::new(&p.name, &p.input_name);
        let var = checked(hook, &key.to_string(), &p.shape, values.get(&key))?;
        let tag = ChunkTag::partial(&p.name, &p.input_name);
        send_variable(&mut *call, tag, var, chunk_size, Some(&cancel)).await?;
    }
    Ok(())
}

fn checked<'a>(
    hook: &str,
    name: &str,
    shape: &[usize],
    var: Option<&'a Variable>,
) -> Result<&'a Variable> {
    let var = var.ok_or_else(|| PhiloteError::callback(hook, format!("'{name}' was removed")))?;
    let expected = shape_len(shape);
    if var.len() != expected {
        return Err(PhiloteError::callback(
            hook,
            format!("'{name}' holds {} values but its shape {shape:?} needs {expected}", var.len()),
        ));
    }
    Ok(var)
}
