// philote-discipline::server — hosts one discipline behind the call
// transport.
//
// The discipline lives in a `Registration` shared by every in-flight call.
// Lifecycle RPCs take its write lock; compute RPCs snapshot the metadata,
// drain their inbound stream without any lock, then run the compute hook
// under the read lock. No lock guard is held across an await point.

mod explicit;
mod implicit;
mod stream;

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use philote_net::{Message, Method, ServerCall, Service};
use philote_types::config::ConcurrencyPolicy;
use philote_types::{PhiloteError, Result, Status, StatusCode};

use crate::discipline::{ExplicitDiscipline, Hosted, ImplicitDiscipline};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::meta::{DisciplineKind, DisciplineMeta};

// ── Registration ─────────────────────────────────────────────────────────────

pub(crate) struct Registration {
    kind: DisciplineKind,
    lifecycle: RwLock<Lifecycle>,
    /// Present under `ConcurrencyPolicy::Serialized`.
    gate: Option<tokio::sync::Mutex<()>>,
}

/// What a compute call needs from the lifecycle before it drains input.
pub(crate) struct Snapshot {
    pub meta: DisciplineMeta,
    pub chunk_size: usize,
    pub generation: u64,
}

impl Registration {
    fn read(&self) -> Result<RwLockReadGuard<'_, Lifecycle>> {
        self.lifecycle
            .read()
            .map_err(|_| PhiloteError::Precondition("discipline state is poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Lifecycle>> {
        self.lifecycle
            .write()
            .map_err(|_| PhiloteError::Precondition("discipline state is poisoned".into()))
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot> {
        let lc = self.read()?;
        lc.require_ready()?;
        Ok(Snapshot {
            meta: lc.meta().clone(),
            chunk_size: lc.stream_options().chunk_size,
            generation: lc.generation(),
        })
    }

    /// Run `f` under the read lock, provided the discipline has not been set
    /// up again since `generation` was taken.
    pub(crate) fn with_ready<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&Hosted) -> Result<R>,
    ) -> Result<R> {
        let lc = self.read()?;
        lc.require_ready()?;
        if lc.generation() != generation {
            return Err(PhiloteError::Precondition(
                "discipline was set up again while the call was in flight".into(),
            ));
        }
        f(lc.hosted())
    }
}

// ── Discipline Server ────────────────────────────────────────────────────────

/// Serves one discipline. Implements [`Service`], so it can be handed to a
/// [`philote_net::Server`] or an in-process [`philote_net::Channel`].
pub struct DisciplineServer {
    slot: Mutex<Option<Arc<Registration>>>,
}

impl DisciplineServer {
    /// Register `hosted` and run its `initialize` hook.
    pub fn new(hosted: Hosted, concurrency: ConcurrencyPolicy) -> Result<Self> {
        let kind = hosted.kind();
        let mut lifecycle = Lifecycle::new(hosted);
        lifecycle.initialize()?;
        let gate = match concurrency {
            ConcurrencyPolicy::Concurrent => None,
            ConcurrencyPolicy::Serialized => Some(tokio::sync::Mutex::new(())),
        };
        info!(%kind, ?concurrency, "discipline registered");
        let registration = Registration { kind, lifecycle: RwLock::new(lifecycle), gate };
        Ok(Self { slot: Mutex::new(Some(Arc::new(registration))) })
    }

    pub fn explicit(discipline: impl ExplicitDiscipline + 'static) -> Result<Self> {
        Self::new(Hosted::explicit(discipline), ConcurrencyPolicy::default())
    }

    pub fn implicit(discipline: impl ImplicitDiscipline + 'static) -> Result<Self> {
        Self::new(Hosted::implicit(discipline), ConcurrencyPolicy::default())
    }

    /// Drop the discipline. Calls already running finish against it; later
    /// calls fail with `failed-precondition`.
    pub fn unlink(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.take().is_some() {
                info!("discipline unlinked");
            }
        }
    }

    pub fn is_linked(&self) -> bool {
        self.registration().is_ok()
    }

    /// Lifecycle state, `None` once unlinked.
    pub fn state(&self) -> Option<LifecycleState> {
        let reg = self.registration().ok()?;
        let state = reg.read().ok()?.state();
        Some(state)
    }

    fn registration(&self) -> Result<Arc<Registration>> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or_else(|| PhiloteError::Precondition("Discipline is not linked".into()))
    }

    async fn dispatch(&self, call: &mut ServerCall) -> Result<()> {
        let reg = self.registration()?;
        let method = call.method();

        if method.is_lifecycle() {
            return lifecycle_rpc(&reg, call).await;
        }

        let _permit = match &reg.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        match (reg.kind, method) {
            (DisciplineKind::Explicit, Method::ComputeFunction) => {
                explicit::compute_function(&reg, call).await
            }
            (DisciplineKind::Explicit, Method::ComputeGradient) => {
                explicit::compute_gradient(&reg, call).await
            }
            (DisciplineKind::Implicit, Method::ComputeResiduals) => {
                implicit::compute_residuals(&reg, call).await
            }
            (DisciplineKind::Implicit, Method::SolveResiduals) => {
                implicit::solve_residuals(&reg, call).await
            }
            (DisciplineKind::Implicit, Method::ComputeResidualGradients) => {
                implicit::compute_residual_gradients(&reg, call).await
            }
            (kind, method) => Err(unimplemented(kind, method)),
        }
    }
}

#[async_trait]
impl Service for DisciplineServer {
    async fn call(&self, mut call: ServerCall) -> std::result::Result<(), Status> {
        let method = call.method();
        debug!(%method, "dispatching");
        self.dispatch(&mut call).await.map_err(Status::from)
    }
}

pub(crate) fn unimplemented(kind: DisciplineKind, method: Method) -> PhiloteError {
    PhiloteError::Rpc {
        code: StatusCode::Unimplemented,
        message: format!("{method} is not served by an {kind} discipline"),
    }
}

// ── Lifecycle RPCs ───────────────────────────────────────────────────────────

async fn lifecycle_rpc(reg: &Registration, call: &mut ServerCall) -> Result<()> {
    let request = call.recv_request().await?;
    match call.method() {
        Method::GetInfo => {
            request.expect_empty()?;
            let properties = reg.read()?.properties()?;
            call.send(Message::Properties(properties)).await
        }
        Method::SetStreamOptions => {
            let options = request.into_stream_options()?;
            reg.write()?.set_stream_options(options)?;
            call.send(Message::Empty).await
        }
        Method::SetOptions => {
            let options = request.into_options()?;
            reg.write()?.set_options(&options)?;
            call.send(Message::Empty).await
        }
        Method::Setup => {
            request.expect_empty()?;
            reg.write()?.setup()?;
            call.send(Message::Empty).await
        }
        Method::GetVariableDefinitions => {
            request.expect_empty()?;
            let vars = reg.read()?.meta().variables().to_vec();
            for var in vars {
                call.send(Message::VariableMeta(var)).await?;
            }
            Ok(())
        }
        Method::GetPartialDefinitions => {
            request.expect_empty()?;
            let partials = reg.read()?.meta().partials().to_vec();
            for partial in partials {
                call.send(Message::PartialsMeta(partial)).await?;
            }
            Ok(())
        }
        Method::GetAvailableOptions => {
            request.expect_empty()?;
            let options = reg.read()?.meta().available_options();
            call.send(Message::OptionsList(options)).await
        }
        method => Err(PhiloteError::Protocol(format!("{method} is not a lifecycle call"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discipline::Discipline;
    use philote_types::{DataType, DisciplineProperties, StreamOptions};

    #[derive(Default)]
    struct Probe {
        panic_in_setup: bool,
    }

    impl Discipline for Probe {
        fn properties(&self) -> DisciplineProperties {
            DisciplineProperties {
                name: "probe".into(),
                version: "0.3.1".into(),
                provides_gradients: false,
                ..DisciplineProperties::default()
            }
        }

        fn initialize(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
            meta.add_option("tolerance", DataType::from_type_name("float"))?;
            meta.add_option("label", DataType::from_type_name("list"))?;
            Ok(())
        }

        fn setup(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
            assert!(!self.panic_in_setup, "probe refuses to set up");
            meta.add_input("x", &[1], "m")?;
            meta.add_input("y", &[3], "m")?;
            meta.add_output("f", &[1], "m**2")?;
            Ok(())
        }

        fn setup_partials(&mut self, meta: &mut DisciplineMeta) -> anyhow::Result<()> {
            meta.declare_partials("f", "x")?;
            meta.declare_partials("f", "y")?;
            Ok(())
        }
    }

    impl ExplicitDiscipline for Probe {}

    async fn run(
        server: &DisciplineServer,
        method: Method,
        request: Message,
    ) -> std::result::Result<Vec<Message>, Status> {
        let (call, mut out) = ServerCall::from_messages(method, vec![request], 64);
        server.call(call).await?;
        let mut responses = Vec::new();
        while let Ok(msg) = out.try_recv() {
            responses.push(msg);
        }
        Ok(responses)
    }

    #[tokio::test]
    async fn negotiation_sequence() {
        let server = DisciplineServer::explicit(Probe::default()).unwrap();
        assert_eq!(server.state(), Some(LifecycleState::Initialized));

        let info = run(&server, Method::GetInfo, Message::Empty).await.unwrap();
        let props = info[0].clone().into_properties().unwrap();
        assert_eq!(props.name, "probe");
        assert!(!props.provides_gradients);

        let opts = StreamOptions::new(8).unwrap();
        run(&server, Method::SetStreamOptions, Message::StreamOptions(opts)).await.unwrap();
        run(&server, Method::Setup, Message::Empty).await.unwrap();
        assert_eq!(server.state(), Some(LifecycleState::Ready));

        let vars = run(&server, Method::GetVariableDefinitions, Message::Empty).await.unwrap();
        let names: Vec<_> = vars
            .into_iter()
            .map(|m| m.into_variable_meta().unwrap().name)
            .collect();
        assert_eq!(names, vec!["x", "y", "f"]);

        let partials = run(&server, Method::GetPartialDefinitions, Message::Empty).await.unwrap();
        let shapes: Vec<_> = partials
            .into_iter()
            .map(|m| m.into_partials_meta().unwrap().shape)
            .collect();
        assert_eq!(shapes, vec![vec![1], vec![3]]);

        let options = run(&server, Method::GetAvailableOptions, Message::Empty).await.unwrap();
        let list = options[0].clone().into_options_list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "label");
        assert_eq!(list[0].data_type, DataType::String);
        assert_eq!(list[1].data_type, DataType::Double);
    }

    #[tokio::test]
    async fn repeated_setup_over_rpc_does_not_accumulate() {
        let server = DisciplineServer::explicit(Probe::default()).unwrap();
        for _ in 0..3 {
            run(&server, Method::Setup, Message::Empty).await.unwrap();
        }
        let vars = run(&server, Method::GetVariableDefinitions, Message::Empty).await.unwrap();
        assert_eq!(vars.len(), 3);
        let partials = run(&server, Method::GetPartialDefinitions, Message::Empty).await.unwrap();
        assert_eq!(partials.len(), 2);
    }

    #[tokio::test]
    async fn zero_chunk_size_is_invalid_argument() {
        let server = DisciplineServer::explicit(Probe::default()).unwrap();
        let opts = StreamOptions { chunk_size: 0 };
        let status = run(&server, Method::SetStreamOptions, Message::StreamOptions(opts))
            .await
            .unwrap_err();
        assert_eq!(status.code, StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn setup_panic_is_internal_and_server_survives() {
        let server = DisciplineServer::explicit(Probe { panic_in_setup: true }).unwrap();
        let status = run(&server, Method::Setup, Message::Empty).await.unwrap_err();
        assert_eq!(status.code, StatusCode::Internal);
        assert!(status.message.contains("probe refuses to set up"));

        // Still answers.
        assert!(run(&server, Method::GetInfo, Message::Empty).await.is_ok());
        assert_eq!(server.state(), Some(LifecycleState::Initialized));
    }

    #[tokio::test]
    async fn wrong_request_message_is_invalid_argument() {
        let server = DisciplineServer::explicit(Probe::default()).unwrap();
        let status = run(&server, Method::SetOptions, Message::Empty).await.unwrap_err();
        assert_eq!(status.code, StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn unlinked_server_fails_precondition() {
        let server = DisciplineServer::explicit(Probe::default()).unwrap();
        assert!(server.is_linked());
        server.unlink();
        assert!(!server.is_linked());
        assert_eq!(server.state(), None);

        let status = run(&server, Method::GetInfo, Message::Empty).await.unwrap_err();
        assert_eq!(status.code, StatusCode::FailedPrecondition);
        assert!(status.message.contains("Discipline is not linked"));
    }
}
