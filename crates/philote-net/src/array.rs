// Streaming a shaped array as chunk messages. The same sender serves the
// client (inputs, and outputs for implicit calls) and the server (outputs,
// residuals and partials).

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use philote_types::{Chunk, PhiloteError, Result, Variable, VariableType};

use crate::call::{ClientCall, ServerCall};
use crate::rpc::Message;

/// Anything chunk messages can be written to.
#[async_trait]
pub trait ChunkSink: Send {
    async fn send_chunk(&mut self, chunk: Chunk) -> Result<()>;
}

#[async_trait]
impl ChunkSink for ClientCall {
    async fn send_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.send(Message::Chunk(chunk)).await
    }
}

#[async_trait]
impl ChunkSink for ServerCall {
    async fn send_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.send(Message::Chunk(chunk)).await
    }
}

#[async_trait]
impl ChunkSink for mpsc::Sender<Message> {
    async fn send_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.send(Message::Chunk(chunk))
            .await
            .map_err(|_| PhiloteError::Transport("chunk receiver dropped".into()))
    }
}

/// Which variable a stream of chunks belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTag<'a> {
    pub name: &'a str,
    /// Input name for partials.
    pub input_name: Option<&'a str>,
    pub kind: VariableType,
}

impl<'a> ChunkTag<'a> {
    pub fn variable(name: &'a str, kind: VariableType) -> Self {
        Self { name, input_name: None, kind }
    }

    pub fn partial(output: &'a str, input: &'a str) -> Self {
        Self { name: output, input_name: Some(input), kind: VariableType::Partial }
    }
}

/// Send `var` as `max(1, ceil(len / chunk_size))` chunks in increasing
/// index order. The token, if given, is checked before every chunk.
/// Returns the number of chunks written.
pub async fn send_variable<S>(
    sink: &mut S,
    tag: ChunkTag<'_>,
    var: &Variable,
    chunk_size: usize,
    cancel: Option<&CancellationToken>,
) -> Result<usize>
where
    S: ChunkSink + ?Sized,
{
    let chunks = var.chunks(tag.name, tag.input_name, tag.kind, chunk_size)?;
    let mut sent = 0;
    for chunk in chunks {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(PhiloteError::Cancelled(format!(
                "stopped sending {} '{}' after {sent} chunks",
                tag.kind, tag.name
            )));
        }
        if let Err(e) = sink.send_chunk(chunk).await {
            warn!(variable = tag.name, kind = %tag.kind, chunk = sent, error = %e, "chunk write failed");
            return Err(e);
        }
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.into_chunk().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn sends_ceil_len_over_chunk_size() {
        let (mut tx, mut rx) = mpsc::channel(16);
        let var = Variable::with_data(VariableType::Output, &[7], (0..7).map(f64::from).collect())
            .unwrap();

        let n = send_variable(&mut tx, ChunkTag::variable("y", VariableType::Output), &var, 3, None)
            .await
            .unwrap();
        assert_eq!(n, 3);

        let chunks = drain(&mut rx);
        let bounds: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(bounds, vec![(0, 2), (3, 5), (6, 6)]);
        assert_eq!(chunks[2].data, vec![6.0]);
        assert!(chunks.iter().all(|c| c.name == "y" && c.kind == VariableType::Output));
    }

    #[tokio::test]
    async fn partial_chunks_carry_input_name() {
        let (mut tx, mut rx) = mpsc::channel(4);
        let var = Variable::scalar(VariableType::Partial, -2.0);
        send_variable(&mut tx, ChunkTag::partial("f", "x"), &var, 1000, None)
            .await
            .unwrap();
        let chunks = drain(&mut rx);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].input_name.as_deref(), Some("x"));
        assert_eq!(chunks[0].kind, VariableType::Partial);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_chunk() {
        let (mut tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        token.cancel();
        let var = Variable::new(VariableType::Input, &[5]);
        let err = send_variable(&mut tx, ChunkTag::variable("x", VariableType::Input), &var, 2, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, PhiloteError::Cancelled(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn dropped_receiver_surfaces_transport_error() {
        let (mut tx, rx) = mpsc::channel(1);
        drop(rx);
        let var = Variable::new(VariableType::Input, &[2]);
        let err = send_variable(&mut tx, ChunkTag::variable("x", VariableType::Input), &var, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PhiloteError::Transport(_)));
    }
}
