use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use num_bigint::BigInt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::registry::ComponentRegistry;
use crate::term::{Atom, Term};
use crate::transport::{PushOutcome, Transport};
use crate::wire::{EncodeError, decode_term, encode_term};

/// Event name every command push travels under.
pub const COMMAND_EVENT: &str = "command";

const ACK_SUCCESS: u8 = 1;

pub type FollowUpReceiver = mpsc::UnboundedReceiver<FollowUp>;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub target: String,
    pub module: Atom,
    pub name: Atom,
    pub params: Term,
}

impl CommandSpec {
    pub fn new(
        target: impl Into<String>,
        module: impl AsRef<str>,
        name: impl AsRef<str>,
        params: Term,
    ) -> Self {
        Self {
            target: target.into(),
            module: Atom::new(module),
            name: Atom::new(name),
            params,
        }
    }

    /// The `{module, name, params, target}` map the server's command handler
    /// expects.
    pub fn payload(&self) -> Term {
        Term::map([
            (Term::atom("module"), Term::Atom(self.module.clone())),
            (Term::atom("name"), Term::Atom(self.name.clone())),
            (Term::atom("params"), self.params.clone()),
            (Term::atom("target"), Term::string(self.target.as_str())),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Sending,
    Failed,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Sending => "sending",
            CommandStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandQueueItem {
    pub id: Uuid,
    pub spec: CommandSpec,
    pub status: CommandStatus,
    pub fail_count: u32,
}

/// A follow-up action returned in a command ack. It is posted only after the
/// command has left the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub command_id: Uuid,
    pub action: Term,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    Rejected(String),
    TimedOut,
    BadAck(String),
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandFailure::Rejected(reply) => write!(f, "rejected by server: {reply}"),
            CommandFailure::TimedOut => f.write_str("timed out waiting for ack"),
            CommandFailure::BadAck(reply) => write!(f, "unreadable ack: {reply}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("target {target:?} is not a registered component")]
    InvalidTarget { target: String },

    #[error("command {id} failed: {failure}")]
    CommandFailed { id: Uuid, failure: CommandFailure },

    #[error("command {id} has a payload that cannot be sent: {source}")]
    Encode {
        id: Uuid,
        #[source]
        source: EncodeError,
    },

    #[error("no command with id {0}")]
    UnknownCommand(Uuid),

    #[error("command {id} is {status}, only failed commands can be requeued")]
    NotFailed { id: Uuid, status: CommandStatus },
}

/// FIFO of server-bound commands with a single active drain.
pub struct CommandQueue {
    transport: Arc<dyn Transport>,
    registry: Arc<ComponentRegistry>,
    items: Mutex<Vec<CommandQueueItem>>,
    draining: AtomicBool,
    follow_ups: mpsc::UnboundedSender<FollowUp>,
}

impl CommandQueue {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ComponentRegistry>,
    ) -> (Self, FollowUpReceiver) {
        let (follow_ups, follow_up_rx) = mpsc::unbounded_channel();
        let queue = Self {
            transport,
            registry,
            items: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            follow_ups,
        };
        (queue, follow_up_rx)
    }

    pub fn push(&self, spec: CommandSpec) -> Result<Uuid, QueueError> {
        if !self.registry.contains(&spec.target) {
            return Err(QueueError::InvalidTarget {
                target: spec.target,
            });
        }

        let id = Uuid::new_v4();
        info!(command_id = %id, target = %spec.target, name = %spec.name, "command queued");
        self.items.lock().push(CommandQueueItem {
            id,
            spec,
            status: CommandStatus::Pending,
            fail_count: 0,
        });
        Ok(id)
    }

    /// Sends pending commands oldest first, one at a time, until none remain.
    /// A failed command stays queued as failed and the drain moves on; the
    /// first failure is returned once the queue has no pending item left.
    /// Returns immediately when disconnected or when another drain is
    /// already running.
    pub async fn process(&self) -> Result<(), QueueError> {
        if !self.transport.is_connected() {
            debug!("transport disconnected; leaving commands queued");
            return Ok(());
        }

        let Some(mut guard) = DrainGuard::acquire(self) else {
            debug!("queue drain already in progress");
            return Ok(());
        };

        let mut first_error = None;
        while let Some((id, spec)) = guard.next() {
            if let Err(err) = self.send(id, &spec).await {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    pub fn remove(&self, id: Uuid) -> Option<CommandQueueItem> {
        let mut items = self.items.lock();
        let index = items.iter().position(|item| item.id == id)?;
        Some(items.remove(index))
    }

    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    pub fn get(&self, id: Uuid) -> Option<CommandQueueItem> {
        self.items.lock().iter().find(|item| item.id == id).cloned()
    }

    pub fn items(&self) -> Vec<CommandQueueItem> {
        self.items.lock().clone()
    }

    /// Moves a failed command back to pending so the next drain retries it.
    pub fn requeue(&self, id: Uuid) -> Result<(), QueueError> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(QueueError::UnknownCommand(id))?;

        if item.status != CommandStatus::Failed {
            return Err(QueueError::NotFailed {
                id,
                status: item.status,
            });
        }

        item.status = CommandStatus::Pending;
        info!(command_id = %id, fail_count = item.fail_count, "command requeued");
        Ok(())
    }

    /// Drops every item. A drain in flight keeps its flag and carries on
    /// with whatever is pushed afterwards.
    pub fn reset(&self) {
        self.items.lock().clear();
    }

    async fn send(&self, id: Uuid, spec: &CommandSpec) -> Result<(), QueueError> {
        let payload = match encode_term(&spec.payload()) {
            Ok(payload) => payload,
            Err(source) => {
                self.mark_failed(id);
                error!(command_id = %id, error = %source, "command payload cannot be encoded");
                return Err(QueueError::Encode { id, source });
            }
        };

        debug!(command_id = %id, target = %spec.target, "sending command");
        let failure = match self.transport.push(COMMAND_EVENT, payload).await {
            PushOutcome::Ok(reply) => match parse_ack(&reply) {
                Ok(follow_up) => {
                    self.resolve(id, follow_up);
                    return Ok(());
                }
                Err(failure) => failure,
            },
            PushOutcome::Rejected(reply) => CommandFailure::Rejected(reply),
            PushOutcome::TimedOut => CommandFailure::TimedOut,
        };

        self.mark_failed(id);
        warn!(command_id = %id, %failure, "command failed");
        Err(QueueError::CommandFailed { id, failure })
    }

    fn resolve(&self, id: Uuid, follow_up: Option<Term>) {
        if self.remove(id).is_none() {
            debug!(command_id = %id, "acked command was already removed");
        }
        info!(command_id = %id, "command acknowledged");

        let Some(action) = follow_up else {
            return;
        };
        debug!(command_id = %id, %action, "scheduling follow-up action");
        if self
            .follow_ups
            .send(FollowUp {
                command_id: id,
                action,
            })
            .is_err()
        {
            warn!(command_id = %id, "follow-up receiver dropped; action discarded");
        }
    }

    fn mark_failed(&self, id: Uuid) {
        let mut items = self.items.lock();
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.status = CommandStatus::Failed;
            item.fail_count += 1;
        }
    }
}

/// Holds the drain flag for one `process` call. Dropping it mid-send, as
/// happens when the drain future is cancelled, fails the in-flight command.
struct DrainGuard<'a> {
    queue: &'a CommandQueue,
    released: bool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(queue: &'a CommandQueue) -> Option<Self> {
        queue
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                queue,
                released: false,
            })
    }

    /// Marks the oldest pending item as sending. When nothing is pending the
    /// flag is released under the same lock `push` takes, so a command queued
    /// concurrently is either seen here or finds the flag already clear.
    fn next(&mut self) -> Option<(Uuid, CommandSpec)> {
        if self.released {
            return None;
        }

        let mut items = self.queue.items.lock();
        match items
            .iter_mut()
            .find(|item| item.status == CommandStatus::Pending)
        {
            Some(item) => {
                item.status = CommandStatus::Sending;
                Some((item.id, item.spec.clone()))
            }
            None => {
                self.queue.draining.store(false, Ordering::Release);
                self.released = true;
                None
            }
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let mut items = self.queue.items.lock();
        for item in items.iter_mut() {
            if item.status == CommandStatus::Sending {
                warn!(command_id = %item.id, "drain abandoned while command was in flight");
                item.status = CommandStatus::Failed;
                item.fail_count += 1;
            }
        }
        self.queue.draining.store(false, Ordering::Release);
    }
}

/// Reads a `[status, result]` ack. `Ok(None)` means success without a
/// follow-up action.
fn parse_ack(reply: &str) -> Result<Option<Term>, CommandFailure> {
    let term = decode_term(reply).map_err(|_| CommandFailure::BadAck(reply.to_string()))?;
    let fields = match &term {
        Term::List(list) if list.is_proper() => list.items(),
        Term::Tuple(tuple) => tuple.elements(),
        _ => return Err(CommandFailure::BadAck(reply.to_string())),
    };

    match fields {
        [status, result] if status.as_integer() == Some(&BigInt::from(ACK_SUCCESS)) => {
            Ok((!result.is_nil()).then(|| result.clone()))
        }
        [_, _] => Err(CommandFailure::Rejected(reply.to_string())),
        _ => Err(CommandFailure::BadAck(reply.to_string())),
    }
}
