//! FIFO gate for human approval of tool calls.
//!
//! Requests queue in arrival order and only the head is ever reported to the
//! listener. Each request resolves exactly once; resolving an unknown or
//! already-resolved id does nothing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;

/// What the UI needs to render a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub id: String,
    pub tool_name: String,
    pub title: String,
    pub arguments: Value,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Approved,
    Denied,
}

struct Pending {
    request: PermissionRequest,
    resolve: oneshot::Sender<PermissionDecision>,
}

type HeadListener = Box<dyn Fn(Option<&PermissionRequest>) + Send + Sync>;

pub struct PermissionGate {
    queue: Mutex<VecDeque<Pending>>,
    next_id: AtomicU64,
    on_head_change: HeadListener,
}

/// Handle for one queued request.
#[derive(Debug)]
pub struct PermissionTicket {
    pub id: String,
    decision: oneshot::Receiver<PermissionDecision>,
}

impl PermissionTicket {
    /// Waits for the decision. A request withdrawn before it was decided
    /// counts as denied.
    pub async fn decision(self) -> PermissionDecision {
        self.decision.await.unwrap_or(PermissionDecision::Denied)
    }
}

impl PermissionGate {
    pub fn new(on_head_change: impl Fn(Option<&PermissionRequest>) + Send + Sync + 'static) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            on_head_change: Box::new(on_head_change),
        }
    }

    /// Queues a request; the listener hears about it only if it is now the head.
    pub fn request(
        &self,
        tool_name: impl Into<String>,
        title: impl Into<String>,
        arguments: Value,
        read_only: bool,
    ) -> PermissionTicket {
        let id = format!("perm-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (resolve, decision) = oneshot::channel();
        let request = PermissionRequest {
            id: id.clone(),
            tool_name: tool_name.into(),
            title: title.into(),
            arguments,
            read_only,
        };

        let mut queue = lock_unpoisoned(&self.queue);
        queue.push_back(Pending {
            request: request.clone(),
            resolve,
        });
        if queue.len() == 1 {
            (self.on_head_change)(Some(&request));
        }
        drop(queue);

        tracing::debug!(permission_id = %id, tool = %request.tool_name, "permission requested");
        PermissionTicket { id, decision }
    }

    pub fn approve(&self, id: &str) -> bool {
        self.resolve(id, Some(PermissionDecision::Approved))
    }

    pub fn deny(&self, id: &str) -> bool {
        self.resolve(id, Some(PermissionDecision::Denied))
    }

    /// Removes a request without deciding it.
    pub fn withdraw(&self, id: &str) -> bool {
        self.resolve(id, None)
    }

    /// Withdraws every queued request.
    pub fn clear(&self) {
        let mut queue = lock_unpoisoned(&self.queue);
        if queue.is_empty() {
            return;
        }
        queue.clear();
        (self.on_head_change)(None);
    }

    pub fn current(&self) -> Option<PermissionRequest> {
        lock_unpoisoned(&self.queue)
            .front()
            .map(|pending| pending.request.clone())
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, id: &str, decision: Option<PermissionDecision>) -> bool {
        let mut queue = lock_unpoisoned(&self.queue);
        let Some(index) = queue.iter().position(|pending| pending.request.id == id) else {
            return false;
        };
        let Some(pending) = queue.remove(index) else {
            return false;
        };
        if let Some(decision) = decision {
            let _ = pending.resolve.send(decision);
        }
        if index == 0 {
            (self.on_head_change)(queue.front().map(|next| &next.request));
        }
        true
    }
}

impl std::fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGate")
            .field("pending", &self.len())
            .finish()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
