//! Asynchronous request capability drained by the session thread.

use crate::client::Http11Client;
use crate::http::FragmentRequest;
use crate::http::FragmentResponse;
use pn_core::NavError;
use pn_core::NavResult;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::warn;

const EXCHANGE_THREAD_STACK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl ExchangeId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Outcome of a started exchange. Transport failures arrive as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: ExchangeId,
    pub result: NavResult<FragmentResponse>,
}

/// Starts requests now and reports their completions later.
pub trait Exchange {
    fn start(&mut self, request: FragmentRequest) -> ExchangeId;

    /// Returns a finished exchange without blocking.
    fn try_complete(&mut self) -> Option<Completion>;

    /// Blocks up to `timeout` for the next finished exchange.
    fn wait_complete(&mut self, timeout: Duration) -> Option<Completion>;

    /// Number of started exchanges whose completion has not been handed out yet.
    fn outstanding(&self) -> usize;
}

/// Runs each request on its own short-lived worker thread.
pub struct ThreadedExchange {
    client: Http11Client,
    next_id: u64,
    outstanding: usize,
    sender: mpsc::Sender<Completion>,
    receiver: mpsc::Receiver<Completion>,
}

impl ThreadedExchange {
    pub fn new(client: Http11Client) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            client,
            next_id: 0,
            outstanding: 0,
            sender,
            receiver,
        }
    }

    fn received(&mut self, completion: Completion) -> Completion {
        self.outstanding = self.outstanding.saturating_sub(1);
        completion
    }
}

impl Exchange for ThreadedExchange {
    fn start(&mut self, request: FragmentRequest) -> ExchangeId {
        self.next_id = self.next_id.saturating_add(1);
        let id = ExchangeId(self.next_id);
        self.outstanding += 1;

        let client = self.client.clone();
        let sender = self.sender.clone();
        let job = move || {
            let result = settle(|| client.execute(&request));
            let _ = sender.send(Completion { id, result });
        };

        if let Err(error) = thread::Builder::new()
            .name(format!("partialnav-exchange-{}", id.0))
            .stack_size(EXCHANGE_THREAD_STACK_SIZE)
            .spawn(job)
        {
            warn!(target: "partialnav::net", exchange = id.0, %error, "failed to spawn exchange worker");
            let _ = self.sender.send(Completion {
                id,
                result: Err(NavError::new(
                    "net.exchange.spawn_failed",
                    format!("failed to spawn exchange worker: {error}"),
                )),
            });
        }

        id
    }

    fn try_complete(&mut self) -> Option<Completion> {
        let completion = self.receiver.try_recv().ok()?;
        Some(self.received(completion))
    }

    fn wait_complete(&mut self, timeout: Duration) -> Option<Completion> {
        if self.outstanding == 0 {
            return None;
        }
        let completion = self.receiver.recv_timeout(timeout).ok()?;
        Some(self.received(completion))
    }

    fn outstanding(&self) -> usize {
        self.outstanding
    }
}

/// Runs `work`, turning a panic into an error so the completion is still delivered.
fn settle(
    work: impl FnOnce() -> NavResult<FragmentResponse>,
) -> NavResult<FragmentResponse> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|text| (*text).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        warn!(target: "partialnav::net", %detail, "exchange worker panicked");
        Err(NavError::new(
            "net.exchange.worker_panicked",
            format!("exchange worker panicked: {detail}"),
        ))
    })
}

#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedExchange;

#[cfg(any(test, feature = "test-support"))]
mod scripted {
    use super::Completion;
    use super::Exchange;
    use super::ExchangeId;
    use crate::http::FragmentRequest;
    use crate::http::FragmentResponse;
    use pn_core::NavResult;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Records started requests; the test decides when and how each one finishes.
    #[derive(Debug, Default)]
    pub struct ScriptedExchange {
        next_id: u64,
        started: Vec<(ExchangeId, FragmentRequest)>,
        pending: Vec<ExchangeId>,
        ready: VecDeque<Completion>,
    }

    impl ScriptedExchange {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every request started so far, in order.
        pub fn started(&self) -> &[(ExchangeId, FragmentRequest)] {
            &self.started
        }

        pub fn last_started(&self) -> Option<&(ExchangeId, FragmentRequest)> {
            self.started.last()
        }

        /// Ids started but not yet resolved by the test.
        pub fn pending(&self) -> &[ExchangeId] {
            &self.pending
        }

        /// Finishes `id`; its completion becomes visible to `try_complete`.
        pub fn resolve(&mut self, id: ExchangeId, result: NavResult<FragmentResponse>) -> bool {
            let Some(index) = self.pending.iter().position(|pending| *pending == id) else {
                return false;
            };
            self.pending.remove(index);
            self.ready.push_back(Completion { id, result });
            true
        }

        /// Finishes the most recently started pending exchange.
        pub fn resolve_last(&mut self, result: NavResult<FragmentResponse>) -> Option<ExchangeId> {
            let id = *self.pending.last()?;
            self.resolve(id, result);
            Some(id)
        }

        /// Finishes the oldest pending exchange.
        pub fn resolve_next(&mut self, result: NavResult<FragmentResponse>) -> Option<ExchangeId> {
            let id = *self.pending.first()?;
            self.resolve(id, result);
            Some(id)
        }
    }

    impl Exchange for ScriptedExchange {
        fn start(&mut self, request: FragmentRequest) -> ExchangeId {
            self.next_id += 1;
            let id = ExchangeId(self.next_id);
            self.started.push((id, request));
            self.pending.push(id);
            id
        }

        fn try_complete(&mut self) -> Option<Completion> {
            self.ready.pop_front()
        }

        fn wait_complete(&mut self, _timeout: Duration) -> Option<Completion> {
            self.ready.pop_front()
        }

        fn outstanding(&self) -> usize {
            self.pending.len() + self.ready.len()
        }
    }
}
