pub mod config;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod snapshot;
pub mod term;
pub mod transport;
pub mod wire;

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::protocol::{FramedTransport, ServerEnvelope};

pub use crate::config::ClientConfig;
pub use crate::error::Error;
pub use crate::protocol::{CLIENT_TO_SERVER_CAP, SERVER_TO_CLIENT_CAP};
pub use crate::queue::{
    CommandFailure, CommandQueue, CommandQueueItem, CommandSpec, CommandStatus, FollowUp,
    FollowUpReceiver, QueueError,
};
pub use crate::registry::ComponentRegistry;
pub use crate::snapshot::{SnapshotRecord, SnapshotStore, StoreError};
pub use crate::term::{Term, TermKind};
pub use crate::transport::{PushOutcome, Transport, TransportError};
pub use crate::wire::{HostValue, decode, decode_term, encode, encode_term};

/// Host hooks invoked by [`run`].
pub trait HostBindings: Send + Sync {
    /// Runs a follow-up action on a turn after the command that produced it
    /// left the queue. Zero-arity local closures are invoked; anything else
    /// is logged.
    fn run_follow_up(&self, follow_up: FollowUp) {
        let FollowUp { command_id, action } = follow_up;
        match action.as_function() {
            Some(function) if function.closure_id().is_some() && function.arity() == 0 => {
                match function.invoke(&[]) {
                    Ok(result) => debug!(%command_id, %result, "follow-up action completed"),
                    Err(err) => warn!(%command_id, error = %err, "follow-up action failed"),
                }
            }
            _ => info!(%command_id, %action, "follow-up action received"),
        }
    }

    fn page_stored(&self, snapshot_id: u64) {
        debug!(snapshot_id, "page snapshot stored");
    }

    fn server_error(&self, code: &str, message: &str) {
        error!(%code, %message, "server error");
    }
}

/// Bindings that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBindings;

impl HostBindings for LoggingBindings {}

/// Drives one client session over `reader`/`writer` until the server closes
/// its side of the stream.
pub async fn run<R, W, B>(config: ClientConfig, reader: R, writer: W, bindings: B) -> Result<(), Error>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    B: HostBindings,
{
    let store = SnapshotStore::init(&config.snapshot_dir, &config.environment).await?;
    let registry = Arc::new(ComponentRegistry::new());
    let (transport, mut events) = FramedTransport::spawn(
        reader,
        writer,
        config.sid.clone(),
        config.push_timeout,
        config.outbound_queue_cap,
    );
    let (queue, mut follow_ups) = CommandQueue::new(transport.clone(), registry.clone());
    let queue = Arc::new(queue);

    transport.connect().await?;
    info!(sid = %config.sid, environment = %config.environment, "client session started");

    let session = Session {
        sid: &config.sid,
        registry: &registry,
        queue: &queue,
        store: &store,
        bindings: &bindings,
    };

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(envelope) => session.handle(envelope).await,
                None => break,
            },
            Some(follow_up) = follow_ups.recv() => bindings.run_follow_up(follow_up),
        }
    }

    // Follow-ups already posted still get their turn.
    while let Ok(follow_up) = follow_ups.try_recv() {
        bindings.run_follow_up(follow_up);
    }

    info!(sid = %config.sid, "server stream closed; client session stopping");
    Ok(())
}

struct Session<'a, B> {
    sid: &'a str,
    registry: &'a Arc<ComponentRegistry>,
    queue: &'a Arc<CommandQueue>,
    store: &'a SnapshotStore,
    bindings: &'a B,
}

impl<B: HostBindings> Session<'_, B> {
    async fn handle(&self, envelope: ServerEnvelope) {
        if envelope.sid() != self.sid {
            warn!(expected = %self.sid, actual = %envelope.sid(), "dropping envelope for foreign session");
            return;
        }

        match envelope {
            ServerEnvelope::Mount { cid, module, .. } => self.registry.register(cid, module),
            ServerEnvelope::Unmount { cid, .. } => {
                if self.registry.unregister(&cid).is_none() {
                    debug!(%cid, "unmount for unknown component");
                }
            }
            ServerEnvelope::Page { state, .. } => self.store_page(state).await,
            ServerEnvelope::Dispatch {
                target,
                module,
                name,
                params,
                ..
            } => self.dispatch(target, module, name, params),
            ServerEnvelope::Error { code, message, .. } => {
                self.bindings.server_error(&code, &message)
            }
            ServerEnvelope::Reply { push_ref, .. } => {
                debug!(push_ref, "reply reached the session loop; ignoring");
            }
        }
    }

    async fn store_page(&self, state: Value) {
        match self.store.put(state).await {
            Ok(id) => self.bindings.page_stored(id),
            Err(err) => error!(error = %err, "failed to store page snapshot"),
        }
    }

    fn dispatch(&self, target: String, module: String, name: String, params: Option<Value>) {
        let params = match params.as_ref().map(wire::term_from_json).transpose() {
            Ok(params) => params.unwrap_or_else(|| Term::map([])),
            Err(err) => {
                warn!(%target, %name, error = %err, "dropping dispatch with undecodable params");
                return;
            }
        };

        if let Err(err) = self.queue.push(CommandSpec::new(target, module, name, params)) {
            error!(error = %err, "command rejected");
            return;
        }

        let queue = self.queue.clone();
        tokio::spawn(async move {
            if let Err(err) = queue.process().await {
                error!(error = %err, "command queue drain failed");
            }
        });
    }
}
