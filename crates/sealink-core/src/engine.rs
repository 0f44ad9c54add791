//! Protocol engine: worker pool, retry timers and callback dispatch.
//!
//! The engine is the driver around the handshake state machine. It owns the
//! transport, the identity and the endpoint table, runs `workers` receive
//! loops on the shared socket, executes the [`Action`]s the state machine
//! returns and invokes the application's [`Handler`].
//!
//! # Lifecycle
//!
//! ```text
//! Engine::spawn()  ──> workers receive + dispatch
//!       │
//!       ├─ greet() / introduce_to() / renew_session() / send_data()
//!       │
//! close()          ──> workers stop, pending greets fail with Closed,
//!                      endpoint table cleared
//! join().await     ──> wait for workers to exit
//! ```
//!
//! `close()` is synchronous, idempotent and never blocks. Workers hold the
//! engine alive until it is called.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use sealink_proto::{Hello, Message};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    context::{EndpointHandle, EndpointTable, HandshakeState, PendingHello, lock},
    env::Environment,
    error::ChannelError,
    handler::Handler,
    handshake::Action,
    identity::IdentityStore,
    transport::DatagramTransport,
};

/// Handle to a running protocol engine.
///
/// Cheap to clone; all clones drive the same engine.
pub struct Engine<T, E>
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Engine<T, E>
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<T, E> {
    identity: IdentityStore,
    transport: T,
    env: E,
    config: EngineConfig,
    handler: Arc<dyn Handler>,
    endpoints: EndpointTable,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T, E> Engine<T, E>
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    /// Start an engine on `transport` with `config.workers` receive loops.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        identity: IdentityStore,
        transport: T,
        env: E,
        config: EngineConfig,
        handler: impl Handler,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let worker_count = config.workers.max(1);
        let inner = Arc::new(Inner {
            identity,
            transport,
            env,
            config,
            handler: Arc::new(handler),
            endpoints: EndpointTable::new(),
            shutdown,
            workers: Mutex::new(Vec::new()),
        });

        let handles: Vec<_> =
            (0..worker_count).map(|id| tokio::spawn(worker_loop(Arc::clone(&inner), id))).collect();
        *inner.workers.lock().unwrap_or_else(PoisonError::into_inner) = handles;

        info!(
            local = ?inner.transport.local_addr().ok(),
            workers = worker_count,
            "engine started"
        );
        Self { inner }
    }

    /// Probe `endpoint` with HELLO_REQUEST until it answers or the retry
    /// budget is spent.
    ///
    /// Reports the outcome to [`Handler::on_hello_response`] and, on success
    /// with `introduce_after_greet` set, sends our PRESENTATION.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no response arrived in time; the pending entry is
    ///   removed
    /// - `Transport` if a send failed
    /// - `Closed` if the engine closed or the endpoint was forgotten
    pub async fn greet(&self, endpoint: SocketAddr) -> Result<Duration, ChannelError> {
        let inner = &self.inner;
        let start = inner.env.now();

        let result = if inner.is_closed() {
            Err(ChannelError::Closed)
        } else {
            let (responder, mut response) = oneshot::channel();
            let handle = inner.endpoints.get_or_create(endpoint);
            let nonce = {
                let mut ctx = lock(&handle);
                let nonce = ctx.allocate_hello_nonce();
                ctx.record_pending(nonce, PendingHello::new(start, responder));
                nonce
            };
            inner.await_hello(endpoint, &handle, nonce, start, &mut response).await
        };

        let elapsed = inner.env.now() - start;
        match &result {
            Ok(()) => info!(peer = %endpoint, ?elapsed, "greet succeeded"),
            Err(error) => info!(peer = %endpoint, ?elapsed, %error, "greet failed"),
        }
        inner.handler.on_hello_response(endpoint, result.as_ref().err(), elapsed);
        result?;

        if inner.config.introduce_after_greet {
            if let Err(error) = self.introduce_to(endpoint).await {
                warn!(peer = %endpoint, %error, "failed to introduce after greet");
            }
        }
        Ok(elapsed)
    }

    /// Send our PRESENTATION to `endpoint`.
    ///
    /// # Errors
    ///
    /// `Transport` if the send failed, `Closed` after [`Engine::close`].
    pub async fn introduce_to(&self, endpoint: SocketAddr) -> Result<(), ChannelError> {
        self.inner.ensure_open()?;
        let message = {
            let handle = self.inner.endpoints.get_or_create(endpoint);
            let mut ctx = lock(&handle);
            ctx.introduce(&self.inner.identity)
        };
        debug!(peer = %endpoint, "sending PRESENTATION");
        self.inner.send(endpoint, &message).await
    }

    /// Negotiate a new session with a higher session number.
    ///
    /// The current session keeps working until the peer answers.
    ///
    /// # Errors
    ///
    /// `UntrustedPeer` if the peer has not presented trusted certificates,
    /// `Transport` if the send failed, `Closed` after [`Engine::close`].
    pub async fn renew_session(&self, endpoint: SocketAddr) -> Result<(), ChannelError> {
        self.inner.ensure_open()?;
        let handle = self.inner.endpoints.get(&endpoint).ok_or(ChannelError::UntrustedPeer)?;
        let message = lock(&handle).begin_session(&self.inner.identity, &self.inner.env)?;
        debug!(peer = %endpoint, "sending SESSION_REQUEST");
        self.inner.send(endpoint, &message).await
    }

    /// Encrypt and send `payload` to `endpoint`.
    ///
    /// When the outbound sequence space runs out, a renewal is started and
    /// `SequenceExhausted` is returned; retry once the new session is up.
    ///
    /// # Errors
    ///
    /// `NoSession`, `SequenceExhausted`, `PayloadTooLarge`, `Transport` or
    /// `Closed`.
    pub async fn send_data(&self, endpoint: SocketAddr, payload: &[u8]) -> Result<(), ChannelError> {
        self.inner.ensure_open()?;
        let handle = self.inner.endpoints.get(&endpoint).ok_or(ChannelError::NoSession)?;

        let sealed = {
            let mut ctx = lock(&handle);
            match ctx.seal_data(payload) {
                Err(ChannelError::SequenceExhausted) if ctx.pending_session().is_none() => {
                    info!(peer = %endpoint, "sequence numbers exhausted, renewing session");
                    let renewal = ctx.begin_session(&self.inner.identity, &self.inner.env)?;
                    Err(renewal)
                },
                other => Ok(other?),
            }
        };

        match sealed {
            Ok(message) => self.inner.send(endpoint, &message).await,
            Err(renewal) => {
                self.inner.send(endpoint, &renewal).await?;
                Err(ChannelError::SequenceExhausted)
            },
        }
    }

    /// Drop everything known about `endpoint`. Returns whether it was known.
    ///
    /// Pending greets to it fail with `Closed`.
    pub fn forget(&self, endpoint: SocketAddr) -> bool {
        let forgotten = self.inner.endpoints.forget(&endpoint);
        if forgotten {
            info!(peer = %endpoint, "forgot endpoint");
        }
        forgotten
    }

    /// Derived handshake state for `endpoint`
    #[must_use]
    pub fn state(&self, endpoint: SocketAddr) -> HandshakeState {
        self.inner.endpoints.get(&endpoint).map_or(HandshakeState::Unknown, |h| lock(&h).state())
    }

    /// Established session number with `endpoint`, if any
    #[must_use]
    pub fn session_number(&self, endpoint: SocketAddr) -> Option<u32> {
        let handle = self.inner.endpoints.get(&endpoint)?;
        let ctx = lock(&handle);
        ctx.session().map(|s| s.session_number())
    }

    /// Address the transport is bound to.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.inner.transport.local_addr()?)
    }

    /// Identity this engine presents
    #[must_use]
    pub fn identity(&self) -> &IdentityStore {
        &self.inner.identity
    }

    /// Stop the workers and fail pending greets.
    ///
    /// Synchronous, idempotent and non-blocking. Handler invocations already
    /// in progress run to completion.
    pub fn close(&self) {
        if !self.inner.shutdown.send_replace(true) {
            info!(local = ?self.inner.transport.local_addr().ok(), "engine closing");
        }
    }

    /// Whether [`Engine::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Wait for every worker to exit. Call after [`Engine::close`].
    pub async fn join(&self) {
        let handles = std::mem::take(
            &mut *self.inner.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "engine worker panicked");
            }
        }
    }
}

impl<T, E> Inner<T, E>
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_closed() { Err(ChannelError::Closed) } else { Ok(()) }
    }

    async fn send(&self, endpoint: SocketAddr, message: &Message) -> Result<(), ChannelError> {
        let datagram = message.to_bytes()?;
        self.transport.send_to(&datagram, endpoint).await?;
        Ok(())
    }

    async fn await_hello(
        &self,
        endpoint: SocketAddr,
        handle: &EndpointHandle,
        nonce: u32,
        start: Instant,
        response: &mut oneshot::Receiver<()>,
    ) -> Result<(), ChannelError> {
        let datagram = Message::HelloRequest(Hello { nonce }).to_bytes()?;
        let mut closed = self.shutdown.subscribe();

        for attempt in 0..self.config.hello_attempts.max(1) {
            if let Err(error) = self.transport.send_to(&datagram, endpoint).await {
                lock(handle).resolve_pending(nonce);
                return Err(error.into());
            }
            debug!(peer = %endpoint, nonce, attempt, "sent HELLO_REQUEST");

            let wait = self.config.retry_policy.attempt_timeout(self.config.hello_timeout, attempt);
            tokio::select! {
                result = &mut *response => return result.map_err(|_| ChannelError::Closed),
                () = self.env.sleep(wait) => {},
                () = wait_closed(&mut closed) => {
                    lock(handle).resolve_pending(nonce);
                    return Err(ChannelError::Closed);
                },
            }
        }

        // Whoever removes the entry owns its completion. If a worker beat us
        // to it, its signal is on the way.
        let expired = lock(handle).resolve_pending(nonce).is_some();
        if expired {
            return Err(ChannelError::Timeout { elapsed: self.env.now() - start });
        }
        response.await.map_err(|_| ChannelError::Closed)
    }

    async fn dispatch(&self, sender: SocketAddr, datagram: &[u8]) {
        let message = match Message::decode(datagram) {
            Ok(message) => message,
            Err(error) => {
                debug!(peer = %sender, len = datagram.len(), %error, "dropping undecodable datagram");
                return;
            },
        };
        let kind = message.message_type().name();

        let handle = self.endpoints.get_or_create(sender);
        let actions = lock(&handle).handle_message(message, &self.identity, &self.env);
        match actions {
            Ok(actions) => self.execute(sender, &handle, actions).await,
            Err(error) => debug!(peer = %sender, kind, %error, "dropping message"),
        }
    }

    async fn execute(&self, sender: SocketAddr, handle: &EndpointHandle, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(message) => {
                    let kind = message.message_type().name();
                    if let Err(error) = self.send(sender, &message).await {
                        warn!(peer = %sender, kind, %error, "send failed");
                    }
                },
                Action::ConsultHelloPolicy { nonce } => {
                    let accept = self
                        .handler
                        .on_hello_received(sender, self.config.accept_hello_by_default);
                    debug!(peer = %sender, nonce, accept, "HELLO_REQUEST");
                    if accept {
                        queue.push_back(Action::Send(Message::HelloResponse(Hello { nonce })));
                    }
                },
                Action::CompleteHello { nonce, pending } => {
                    let rtt = self.env.now().saturating_duration_since(pending.sent_at());
                    if pending.complete() {
                        debug!(peer = %sender, nonce, ?rtt, "HELLO_RESPONSE matched");
                    } else {
                        debug!(peer = %sender, nonce, "late HELLO_RESPONSE, greet already gave up");
                    }
                },
                Action::ConsultTrust { presentation, is_new } => {
                    let accepted = self.handler.on_presentation_received(
                        sender,
                        &presentation.signature_certificate,
                        &presentation.encryption_certificate,
                        is_new,
                    );
                    let subject = presentation.signature_certificate.subject();
                    info!(
                        peer = %sender,
                        subject = subject.as_deref().unwrap_or("<none>"),
                        is_new,
                        accepted,
                        "PRESENTATION"
                    );
                    let follow_up = lock(handle).apply_trust_decision(
                        &presentation,
                        is_new,
                        accepted,
                        &self.identity,
                        &self.env,
                    );
                    match follow_up {
                        Ok(actions) => queue.extend(actions),
                        Err(error) => warn!(peer = %sender, %error, "cannot continue handshake"),
                    }
                },
                Action::SessionEstablished { session_number } => {
                    info!(peer = %sender, session_number, "session established");
                    self.handler.on_session_established(sender, session_number);
                },
                Action::Deliver(payload) => {
                    self.handler.on_data_received(sender, &payload);
                },
            }
        }
    }
}

async fn worker_loop<T, E>(inner: Arc<Inner<T, E>>, id: usize)
where
    T: DatagramTransport,
    E: Environment<Instant = Instant>,
{
    let mut closed = inner.shutdown.subscribe();
    let mut buffer = vec![0u8; inner.config.max_datagram_size];

    loop {
        tokio::select! {
            biased;
            () = wait_closed(&mut closed) => break,
            received = inner.transport.recv_from(&mut buffer) => match received {
                Ok((len, sender)) => inner.dispatch(sender, &buffer[..len]).await,
                Err(error) => {
                    warn!(worker = id, %error, "receive failed");
                    inner.env.sleep(RECEIVE_ERROR_BACKOFF).await;
                },
            },
        }
    }

    inner.endpoints.clear();
    debug!(worker = id, "worker stopped");
}

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}
