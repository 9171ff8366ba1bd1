//! Negotiation half of a discipline client: properties, options, stream
//! options and metadata. [`ExplicitClient`](crate::ExplicitClient) and
//! [`ImplicitClient`](crate::ImplicitClient) build their compute calls on top.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use philote_net::{send_variable, Channel, ChunkTag, Message, Method};
use philote_types::config::ClientConfig;
use philote_types::variable::shape_len;
use philote_types::{
    Chunk, DisciplineOptions, DisciplineProperties, OptionDescriptor, PartialKey, Partials,
    PartialsMetaData, PhiloteError, Result, StreamOptions, Variable, VariableMetaData,
    VariableType, Variables,
};

pub struct DisciplineClient {
    channel: Channel,
    config: ClientConfig,
    cancel: Option<CancellationToken>,
    properties: Option<DisciplineProperties>,
    var_meta: Vec<VariableMetaData>,
    partials_meta: Vec<PartialsMetaData>,
    /// Set once variable definitions have been fetched.
    has_definitions: bool,
}

impl DisciplineClient {
    pub fn new(channel: Channel, config: ClientConfig) -> Self {
        Self {
            channel: channel.with_max_frame_bytes(config.max_frame_bytes),
            config,
            cancel: None,
            properties: None,
            var_meta: Vec::new(),
            partials_meta: Vec::new(),
            has_definitions: false,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.config.rpc_timeout
    }

    pub fn set_rpc_timeout(&mut self, timeout: Duration) {
        self.config.rpc_timeout = timeout;
    }

    /// Local chunking for values this client sends. Push it to the server
    /// with [`send_stream_options`](Self::send_stream_options).
    pub fn set_stream_options(&mut self, options: StreamOptions) -> Result<()> {
        options.validate()?;
        self.config.stream_options = options;
        Ok(())
    }

    /// Compute calls made while `token` is cancelled stop sending, tell the
    /// server to abandon the call, and return `Cancelled`.
    pub fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = Some(token);
    }

    // ── Negotiation RPCs ─────────────────────────────────────────────────

    pub async fn get_info(&mut self) -> Result<&DisciplineProperties> {
        let properties = self
            .unary(Method::GetInfo, Message::Empty)
            .await?
            .into_properties()?;
        debug!(name = %properties.name, version = %properties.version, "discipline info");
        Ok(self.properties.insert(properties))
    }

    pub async fn send_stream_options(&mut self) -> Result<()> {
        let options = self.config.stream_options;
        self.unary(Method::SetStreamOptions, Message::StreamOptions(options))
            .await?
            .expect_empty()
    }

    pub async fn send_options(&mut self, options: &DisciplineOptions) -> Result<()> {
        self.unary(Method::SetOptions, Message::Options(options.clone()))
            .await?
            .expect_empty()
    }

    pub async fn setup(&mut self) -> Result<()> {
        self.unary(Method::Setup, Message::Empty).await?.expect_empty()
    }

    /// Fetch variable metadata, replacing whatever was fetched before.
    pub async fn get_variable_definitions(&mut self) -> Result<&[VariableMetaData]> {
        let responses = self
            .channel
            .server_streaming(Method::GetVariableDefinitions, Message::Empty, self.config.rpc_timeout)
            .await?;
        let var_meta = responses
            .into_iter()
            .map(Message::into_variable_meta)
            .collect::<Result<Vec<_>>>()?;
        debug!(variables = var_meta.len(), "variable definitions fetched");
        self.var_meta = var_meta;
        self.has_definitions = true;
        Ok(&self.var_meta)
    }

    /// Fetch partials metadata, replacing whatever was fetched before.
    pub async fn get_partial_definitions(&mut self) -> Result<&[PartialsMetaData]> {
        let responses = self
            .channel
            .server_streaming(Method::GetPartialDefinitions, Message::Empty, self.config.rpc_timeout)
            .await?;
        let partials_meta = responses
            .into_iter()
            .map(Message::into_partials_meta)
            .collect::<Result<Vec<_>>>()?;
        debug!(partials = partials_meta.len(), "partial definitions fetched");
        self.partials_meta = partials_meta;
        Ok(&self.partials_meta)
    }

    pub async fn get_available_options(&mut self) -> Result<Vec<OptionDescriptor>> {
        self.unary(Method::GetAvailableOptions, Message::Empty)
            .await?
            .into_options_list()
    }

    /// Full negotiation in protocol order: info, stream options, options
    /// (skipped when empty), setup, then both definition lists.
    pub async fn negotiate(&mut self, options: &DisciplineOptions) -> Result<()> {
        self.get_info().await?;
        self.send_stream_options().await?;
        if !options.is_empty() {
            self.send_options(options).await?;
        }
        self.setup().await?;
        self.get_variable_definitions().await?;
        self.get_partial_definitions().await?;
        Ok(())
    }

    // ── Cached metadata ──────────────────────────────────────────────────

    /// Properties from the last `get_info`.
    pub fn properties(&self) -> Option<&DisciplineProperties> {
        self.properties.as_ref()
    }

    pub fn variable_meta_all(&self) -> &[VariableMetaData] {
        &self.var_meta
    }

    pub fn partials_meta(&self) -> &[PartialsMetaData] {
        &self.partials_meta
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.var_meta.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn variable_meta(&self, name: &str) -> Result<&VariableMetaData> {
        self.var_meta
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| PhiloteError::NotFound(format!("Variable not found: {name}")))
    }

    // ── Compute plumbing ─────────────────────────────────────────────────

    async fn unary(&self, method: Method, request: Message) -> Result<Message> {
        self.channel.unary(method, request, self.config.rpc_timeout).await
    }

    fn require_definitions(&self) -> Result<()> {
        if !self.has_definitions {
            return Err(PhiloteError::Precondition(
                "variable definitions have not been fetched".into(),
            ));
        }
        Ok(())
    }

    /// Declared variables with role `kind` that the caller supplied in
    /// `values`, in declaration order. Entries the caller left out are
    /// skipped; entries that were never declared are ignored.
    pub(crate) fn selected<'a>(
        &'a self,
        kind: VariableType,
        values: &'a Variables,
    ) -> Result<Vec<(ChunkTag<'a>, &'a Variable)>> {
        self.require_definitions()?;
        let mut selected = Vec::new();
        for m in self.var_meta.iter().filter(|m| m.kind == kind) {
            let Some(var) = values.get(&m.name) else {
                continue;
            };
            let expected = shape_len(&m.shape);
            if var.len() != expected {
                return Err(PhiloteError::Bounds(format!(
                    "{kind} '{}' holds {} values but is declared with shape {:?}",
                    m.name,
                    var.len(),
                    m.shape
                )));
            }
            selected.push((ChunkTag::variable(&m.name, kind), var));
        }
        Ok(selected)
    }

    /// Run one compute call: stream `outgoing`, half-close, and hand every
    /// result chunk to `on_chunk` as it arrives.
    pub(crate) async fn exchange(
        &self,
        method: Method,
        outgoing: Vec<(ChunkTag<'_>, &Variable)>,
        mut on_chunk: impl FnMut(Chunk) -> Result<()> + Send,
    ) -> Result<()> {
        let mut call = self.channel.open(method, self.config.rpc_timeout).await?;
        let chunk_size = self.config.stream_options.chunk_size;

        let mut sent = 0;
        for (tag, var) in outgoing {
            match send_variable(&mut call, tag, var, chunk_size, self.cancel.as_ref()).await {
                Ok(n) => sent += n,
                Err(e @ PhiloteError::Cancelled(_)) => {
                    call.cancel().await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        call.half_close().await?;
        debug!(%method, chunks = sent, "inputs sent");

        let mut received = 0;
        loop {
            let next = match &self.cancel {
                Some(token) => {
                    let next = tokio::select! {
                        next = call.recv() => Some(next),
                        _ = token.cancelled() => None,
                    };
                    match next {
                        Some(next) => next,
                        None => {
                            call.cancel().await;
                            return Err(PhiloteError::Cancelled(format!(
                                "{method} cancelled while awaiting results"
                            )));
                        }
                    }
                }
                None => call.recv().await,
            };
            match next? {
                Some(msg) => {
                    on_chunk(msg.into_chunk()?)?;
                    received += 1;
                }
                None => break,
            }
        }
        debug!(%method, chunks = received, "results received");
        Ok(())
    }
}

// ── Reassembly ───────────────────────────────────────────────────────────────

/// One result buffer and how much of it has arrived. The server emits each
/// entry's chunks in increasing index order, so coverage is a single
/// watermark.
struct Slot {
    value: Variable,
    received: usize,
}

impl Slot {
    fn new(value: Variable) -> Self {
        Self { value, received: 0 }
    }

    fn accept(&mut self, label: &str, chunk: &Chunk) -> Result<()> {
        if self.value.is_empty() && chunk.is_framing_only() {
            return Ok(());
        }
        if chunk.start != self.received as i64 {
            return Err(PhiloteError::Protocol(format!(
                "chunk for '{label}' starts at {} but {} values have arrived",
                chunk.start, self.received
            )));
        }
        self.value.assign_chunk(chunk)?;
        self.received += chunk.data.len();
        Ok(())
    }

    fn check_complete(&self, label: &str) -> Result<()> {
        if self.received != self.value.len() {
            return Err(PhiloteError::Protocol(format!(
                "incomplete result for '{label}': received {} of {} values",
                self.received,
                self.value.len()
            )));
        }
        Ok(())
    }
}

/// Result buffers for named variables, sized from metadata.
pub(crate) struct VariableAssembly {
    kind: VariableType,
    slots: BTreeMap<String, Slot>,
}

impl VariableAssembly {
    pub(crate) fn new<'a>(
        kind: VariableType,
        declared: impl Iterator<Item = &'a VariableMetaData>,
    ) -> Self {
        let slots = declared
            .map(|m| (m.name.clone(), Slot::new(Variable::new(kind, &m.shape))))
            .collect();
        Self { kind, slots }
    }

    pub(crate) fn accept(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.kind != self.kind {
            return Err(PhiloteError::Protocol(format!(
                "expected {} chunk for '{}', got {}",
                self.kind, chunk.name, chunk.kind
            )));
        }
        self.slots
            .get_mut(&chunk.name)
            .ok_or_else(|| PhiloteError::Protocol(format!("Variable not found: {}", chunk.name)))?
            .accept(&chunk.name, &chunk)
    }

    /// The reassembled values. Fails on the first variable that did not
    /// arrive in full.
    pub(crate) fn finish(self) -> Result<Variables> {
        let mut values = Variables::new();
        for (name, slot) in self.slots {
            slot.check_complete(&name)?;
            values.insert(name, slot.value);
        }
        Ok(values)
    }
}

/// Result buffers for Jacobian blocks, sized from partials metadata.
pub(crate) struct PartialsAssembly {
    slots: BTreeMap<PartialKey, Slot>,
}

impl PartialsAssembly {
    pub(crate) fn new(declared: &[PartialsMetaData]) -> Self {
        let slots = declared
            .iter()
            .map(|p| {
                let key = PartialKey::new(&p.name, &p.input_name);
                (key, Slot::new(Variable::from_partials_meta(p)))
            })
            .collect();
        Self { slots }
    }

    pub(crate) fn accept(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.kind != VariableType::Partial {
            return Err(PhiloteError::Protocol(format!(
                "expected partial chunk for '{}', got {}",
                chunk.name, chunk.kind
            )));
        }
        let input = chunk.input_name.as_deref().ok_or_else(|| {
            PhiloteError::Protocol(format!("partial chunk for '{}' has no input name", chunk.name))
        })?;
        let key = PartialKey::new(&chunk.name, input);
        self.slots
            .get_mut(&key)
            .ok_or_else(|| PhiloteError::Protocol(format!("Partial not found: {key}")))?
            .accept(&key.to_string(), &chunk)
    }

    /// The reassembled blocks. Fails on the first block that did not arrive
    /// in full.
    pub(crate) fn finish(self) -> Result<Partials> {
        let mut values = Partials::new();
        for (key, slot) in self.slots {
            slot.check_complete(&key.to_string())?;
            values.insert(key, slot.value);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, shape: &[usize]) -> VariableMetaData {
        VariableMetaData {
            name: name.into(),
            kind: VariableType::Output,
            shape: shape.to_vec(),
            units: String::new(),
        }
    }

    fn chunk(name: &str, input: Option<&str>, kind: VariableType, data: Vec<f64>) -> Chunk {
        Chunk {
            name: name.into(),
            input_name: input.map(str::to_string),
            start: 0,
            end: data.len() as i64 - 1,
            kind,
            data,
        }
    }

    #[test]
    fn variable_assembly_rejects_unknown_names() {
        let declared = [meta("f", &[2])];
        let mut asm = VariableAssembly::new(VariableType::Output, declared.iter());
        asm.accept(chunk("f", None, VariableType::Output, vec![1.0, 2.0])).unwrap();
        let err = asm.accept(chunk("g", None, VariableType::Output, vec![1.0])).unwrap_err();
        assert_eq!(err, PhiloteError::Protocol("Variable not found: g".into()));
        assert_eq!(asm.finish().unwrap()["f"].data(), &[1.0, 2.0]);
    }

    #[test]
    fn variable_assembly_checks_role() {
        let declared = [meta("f", &[1])];
        let mut asm = VariableAssembly::new(VariableType::Residual, declared.iter());
        let err = asm.accept(chunk("f", None, VariableType::Output, vec![1.0])).unwrap_err();
        assert!(matches!(err, PhiloteError::Protocol(_)));
    }

    #[test]
    fn partials_assembly_keys_on_both_names() {
        let declared = vec![PartialsMetaData {
            name: "f".into(),
            input_name: "x".into(),
            shape: vec![1],
        }];
        let mut asm = PartialsAssembly::new(&declared);
        asm.accept(chunk("f", Some("x"), VariableType::Partial, vec![-2.0])).unwrap();
        assert!(asm.accept(chunk("f", Some("y"), VariableType::Partial, vec![1.0])).is_err());
        assert!(asm.accept(chunk("f", None, VariableType::Partial, vec![1.0])).is_err());
        assert_eq!(asm.finish().unwrap()[&PartialKey::new("f", "x")][0], -2.0);
    }

    fn chunk_at(name: &str, start: i64, data: Vec<f64>) -> Chunk {
        Chunk {
            start,
            end: start + (data.len() as i64 - 1).max(0),
            ..chunk(name, None, VariableType::Output, data)
        }
    }

    #[test]
    fn missing_chunks_fail_the_result() {
        let declared = [meta("f", &[5]), meta("g", &[1])];
        let mut asm = VariableAssembly::new(VariableType::Output, declared.iter());
        asm.accept(chunk_at("f", 0, vec![1.0, 2.0, 3.0])).unwrap();
        asm.accept(chunk_at("g", 0, vec![7.0])).unwrap();
        let err = asm.finish().unwrap_err();
        assert_eq!(
            err,
            PhiloteError::Protocol("incomplete result for 'f': received 3 of 5 values".into())
        );
    }

    #[test]
    fn out_of_order_or_repeated_chunks_rejected() {
        let declared = [meta("f", &[4])];
        let mut asm = VariableAssembly::new(VariableType::Output, declared.iter());
        assert!(asm.accept(chunk_at("f", 2, vec![1.0, 2.0])).is_err());
        asm.accept(chunk_at("f", 0, vec![1.0, 2.0])).unwrap();
        assert!(asm.accept(chunk_at("f", 0, vec![1.0, 2.0])).is_err());
        asm.accept(chunk_at("f", 2, vec![3.0, 4.0])).unwrap();
        assert_eq!(asm.finish().unwrap()["f"].data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn zero_length_entries_complete_with_or_without_framing_chunk() {
        let declared = [meta("e", &[0]), meta("z", &[0])];
        let mut asm = VariableAssembly::new(VariableType::Output, declared.iter());
        asm.accept(chunk_at("e", 0, vec![])).unwrap();
        let values = asm.finish().unwrap();
        assert!(values["e"].is_empty() && values["z"].is_empty());
    }

    #[test]
    fn missing_partial_block_fails_the_result() {
        let declared = vec![PartialsMetaData {
            name: "f".into(),
            input_name: "x".into(),
            shape: vec![2, 2],
        }];
        let asm = PartialsAssembly::new(&declared);
        let err = asm.finish().unwrap_err();
        assert!(err.to_string().contains("'f/x': received 0 of 4"), "{err}");
    }
}
