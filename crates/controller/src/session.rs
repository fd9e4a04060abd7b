//! Sessão supervisionada: compõe transporte, poll engine e watchdog.
//!
//! ```text
//! Idle ──attach──► Attaching ──initiate ok──► Attached ──detach──► Detaching ──► Detached
//!                      │                          │
//!                 initiate falhou           bark / erro de link
//!                      ▼                          ▼
//!                    Idle                      Errored ──detach──► Detached
//! ```
//!
//! Os eventos para o host saem por um channel ([`SessionEvent`]).

use crate::poll_engine::{IoHandle, LinkError, LinkObserver, PollEngine};
use crate::transport::{self, Transport};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use iothub_core::config::ControllerConfig;
use iothub_core::protocol::ProtocolError;
use iothub_core::queue::QueueError;
use iothub_core::types::SampleRecord;
use iothub_core::watchdog::Watchdog;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

// ──────────────────────────────────────────────
// Estados e eventos
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Errored,
}

impl SessionState {
    /// Estados em que existe algo para desmontar.
    fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Attaching | SessionState::Attached | SessionState::Errored
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "ociosa",
            SessionState::Attaching => "conectando",
            SessionState::Attached => "conectada",
            SessionState::Detaching => "desconectando",
            SessionState::Detached => "desconectada",
            SessionState::Errored => "em erro",
        })
    }
}

/// Eventos entregues ao host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Conectado ao endpoint (rótulo)
    Attached(String),
    Detached,
    Data(SampleRecord),
    /// Watchdog latiu: sessão encerrada
    Timeout,
    /// Janela de espera passou sem amostra (não fatal)
    Stalled,
    /// Resposta com token inválido (não fatal)
    Malformed(String),
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Sessão ocupada (estado: {0})")]
    Busy(SessionState),

    #[error("Falha ao criar thread da sessão: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Constrói o transporte de cada `attach`.
pub type TransportFactory = Arc<dyn Fn(&ControllerConfig) -> Box<dyn Transport> + Send + Sync>;

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Falhas fatais sinalizadas à thread de orquestração.
enum Fault {
    Bark,
    Link(String),
}

// ──────────────────────────────────────────────
// Estado compartilhado
// ──────────────────────────────────────────────

struct Shared {
    state: Mutex<SessionState>,
    transport: Slot<Box<dyn Transport>>,
    engine: Slot<Arc<PollEngine>>,
    watchdog: Mutex<Option<Watchdog>>,
    cancelled: AtomicBool,
    events: Sender<SessionEvent>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Nenhum consumidor de eventos da sessão");
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Aplica `from → to` somente se o estado atual ainda for `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn feed(&self, timeout_ms: i64) {
        if let Some(dog) = self.watchdog.lock().as_ref() {
            dog.feed(timeout_ms);
        }
    }

    /// Para o engine, fecha o transporte, espera o engine e solta o watchdog.
    fn release(&self) {
        let engine = self.engine.lock().take();
        if let Some(engine) = &engine {
            engine.stop();
        }

        let transport = self.transport.lock().take();
        if let Some(mut transport) = transport {
            transport.destroy();
        }

        if let Some(engine) = engine {
            engine.join();
        }

        // Drop abraça o watchdog e espera a thread dele
        let watchdog = self.watchdog.lock().take();
        drop(watchdog);
    }
}

/// Ponte entre o poll engine e a sessão.
struct SessionLink {
    transport: Slot<Box<dyn Transport>>,
    faults: Sender<Fault>,
    events: Sender<SessionEvent>,
}

impl LinkObserver for SessionLink {
    fn on_exception(&self, error: &LinkError) {
        let _ = self.faults.send(Fault::Link(error.to_string()));
    }

    // Roda na thread de orquestração, dentro de `receive_timeout`
    fn on_parse_error(&self, error: &ProtocolError) {
        let _ = self.events.send(SessionEvent::Malformed(error.to_string()));
    }

    fn on_reconnect(&self, io: &IoHandle) {
        let mut slot = self.transport.lock();
        let Some(transport) = slot.as_mut() else {
            return;
        };
        match transport.reconnect() {
            Ok(Some(stream)) => io.update(stream),
            Ok(None) => {}
            Err(e) => {
                warn!("Falha ao reconectar {}: {e}", transport.label());
                let _ = self.faults.send(Fault::Link(e.to_string()));
                io.clear();
            }
        }
    }
}

// ──────────────────────────────────────────────
// Sessão
// ──────────────────────────────────────────────

struct Worker {
    thread: JoinHandle<()>,
    cancel: Sender<()>,
}

/// Sessão de telemetria com um dispositivo.
pub struct Session {
    config: ControllerConfig,
    factory: TransportFactory,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Session {
    /// Sessão com o transporte do meio configurado.
    pub fn new(config: ControllerConfig, events: Sender<SessionEvent>) -> Self {
        Self::with_factory(config, events, Arc::new(transport::build))
    }

    pub fn with_factory(
        config: ControllerConfig,
        events: Sender<SessionEvent>,
        factory: TransportFactory,
    ) -> Self {
        Self {
            config,
            factory,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                transport: Arc::new(Mutex::new(None)),
                engine: Arc::new(Mutex::new(None)),
                watchdog: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Inicia a conexão em background. Permitido só em `Idle`/`Detached`.
    pub fn attach(&self) -> Result<(), SessionError> {
        {
            let mut state = self.shared.state.lock();
            if !matches!(*state, SessionState::Idle | SessionState::Detached) {
                return Err(SessionError::Busy(*state));
            }
            *state = SessionState::Attaching;
        }

        // Thread de uma tentativa anterior (one-shot ou initiate com falha)
        self.join_worker();
        self.shared.cancelled.store(false, Ordering::SeqCst);

        match self.start() {
            Ok(worker) => {
                *self.worker.lock() = Some(worker);
                Ok(())
            }
            Err(e) => {
                error!("Falha ao iniciar sessão: {e}");
                self.shared.release();
                self.shared
                    .transition(SessionState::Attaching, SessionState::Idle);
                Err(e.into())
            }
        }
    }

    fn start(&self) -> std::io::Result<Worker> {
        let (fault_tx, fault_rx) = unbounded();

        let watchdog = {
            let faults = fault_tx.clone();
            let engine = Arc::clone(&self.shared.engine);
            Watchdog::spawn(move || {
                let _ = faults.send(Fault::Bark);
                // Acorda a thread de orquestração presa no receive
                if let Some(engine) = engine.lock().as_ref() {
                    engine.stop();
                }
            })?
        };
        *self.shared.watchdog.lock() = Some(watchdog);

        let transport = (self.factory)(&self.config);
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let orchestrator = Orchestrator {
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            faults: fault_tx,
            fault_rx,
            cancel: cancel_rx,
        };

        let thread = std::thread::Builder::new()
            .name("session".into())
            .spawn(move || orchestrator.run(transport))?;

        Ok(Worker {
            thread,
            cancel: cancel_tx,
        })
    }

    /// Desmonta a sessão. Seguro em qualquer estado e idempotente.
    pub fn detach(&self) {
        let previous = {
            let mut state = self.shared.state.lock();
            let previous = *state;
            if previous.is_live() {
                *state = SessionState::Detaching;
            }
            previous
        };

        self.shared.cancelled.store(true, Ordering::SeqCst);
        let worker = self.worker.lock().take();
        let thread = worker.map(|Worker { thread, cancel }| {
            // Derrubar o sender interrompe o sono entre ciclos
            drop(cancel);
            thread
        });

        if previous.is_live() {
            info!("Desconectando sessão ({previous})");
            self.shared.release();
        }
        if let Some(thread) = thread {
            join_thread(thread);
        }

        if previous.is_live() {
            self.shared
                .transition(SessionState::Detaching, SessionState::Detached);
            info!("Sessão desconectada");
            self.shared.emit(SessionEvent::Detached);
        }
    }

    fn join_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(Worker { thread, cancel }) = worker {
            drop(cancel);
            join_thread(thread);
        }
    }
}

fn join_thread(thread: JoinHandle<()>) {
    if thread.thread().id() == std::thread::current().id() {
        return;
    }
    if thread.join().is_err() {
        error!("Thread da sessão terminou em pânico");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach();
    }
}

// ──────────────────────────────────────────────
// Thread de orquestração
// ──────────────────────────────────────────────

struct Orchestrator {
    shared: Arc<Shared>,
    config: ControllerConfig,
    faults: Sender<Fault>,
    fault_rx: Receiver<Fault>,
    cancel: Receiver<()>,
}

impl Orchestrator {
    fn run(self, mut transport: Box<dyn Transport>) {
        info!(
            "Conectando via {} a {}",
            transport.medium(),
            transport.label()
        );

        let stream = match transport.initiate() {
            Ok(stream) => stream,
            Err(e) => {
                error!("Falha ao conectar: {e}");
                self.abort(e.to_string());
                return;
            }
        };
        self.shared.feed(self.config.watchdog_timeout_ms);
        let label = transport.label().to_string();

        {
            let mut slot = self.shared.transport.lock();
            if self.shared.is_cancelled() {
                drop(slot);
                transport.destroy();
                return;
            }
            *slot = Some(transport);
        }

        let link = Arc::new(SessionLink {
            transport: Arc::clone(&self.shared.transport),
            faults: self.faults.clone(),
            events: self.shared.events.clone(),
        });
        let engine = match PollEngine::spawn(
            stream,
            link,
            self.config.poll_period(),
            self.config.queue_capacity,
        ) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                error!("Falha ao iniciar poll engine: {e}");
                self.abort(e.to_string());
                return;
            }
        };

        {
            let mut slot = self.shared.engine.lock();
            if self.shared.is_cancelled() {
                drop(slot);
                engine.destroy();
                return;
            }
            *slot = Some(Arc::clone(&engine));
        }

        if !self
            .shared
            .transition(SessionState::Attaching, SessionState::Attached)
        {
            return;
        }
        info!("Sessão conectada a {label}");
        self.shared.emit(SessionEvent::Attached(label));

        self.supervise(&engine);
    }

    /// Falha antes de `Attached`: libera tudo e volta a `Idle`.
    fn abort(&self, message: String) {
        self.shared.release();
        if self
            .shared
            .transition(SessionState::Attaching, SessionState::Idle)
        {
            self.shared.emit(SessionEvent::Error(message));
        }
    }

    fn supervise(&self, engine: &PollEngine) {
        let stall = self.config.stall_timeout();
        let scan = self.config.scan_period();
        // Início conta como sucesso: o primeiro silêncio já é reportado
        let mut last_ok = true;
        let mut received = false;

        loop {
            // Sem amostras o watchdog deixa de ser alimentado e acaba latindo
            if last_ok {
                self.shared.feed(self.config.watchdog_timeout_ms);
            }

            let draining = self.config.one_shot && received;
            let window = if draining { scan } else { stall };

            match engine.receive_timeout(window) {
                Ok(sample) => {
                    debug!("Amostra recebida {}={}", sample.key, sample.value);
                    last_ok = true;
                    received = true;
                    self.shared.emit(SessionEvent::Data(sample.into()));
                }
                Err(QueueError::Timeout) if draining => break,
                Err(QueueError::Timeout) => {
                    if last_ok {
                        warn!("Nenhuma amostra em {} ms", stall.as_millis());
                        self.shared.emit(SessionEvent::Stalled);
                    }
                    last_ok = false;
                }
                Err(QueueError::Closed) => {
                    self.on_closed();
                    return;
                }
            }

            if self.config.one_shot && received {
                continue;
            }
            match self.cancel.recv_timeout(scan) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
        }

        // One-shot: primeira resposta entregue, a própria thread desmonta
        if self
            .shared
            .transition(SessionState::Attached, SessionState::Detaching)
        {
            self.shared.release();
            self.shared
                .transition(SessionState::Detaching, SessionState::Detached);
            info!("Sessão one-shot concluída");
            self.shared.emit(SessionEvent::Detached);
        }
    }

    /// Fila fechada: latido, falha de link ou detach.
    fn on_closed(&self) {
        let event = match self.fault_rx.try_recv() {
            Ok(Fault::Bark) => {
                error!("Watchdog expirou: dispositivo sem resposta");
                SessionEvent::Timeout
            }
            Ok(Fault::Link(message)) => {
                error!("Falha no link: {message}");
                SessionEvent::Error(message)
            }
            Err(_) => {
                debug!("Fila fechada pelo detach");
                return;
            }
        };

        if self
            .shared
            .transition(SessionState::Attached, SessionState::Errored)
        {
            self.shared.emit(event);
            self.shared.release();
        }
    }
}
