//! Thread de polling: envia a requisição fixa, lê a resposta, converte em
//! amostras e publica na fila consumida por `receive`.
//!
//! ```text
//! loop {
//!     GET / HTTP/1.0  ──►  dispositivo
//!     linhas          ◄──  até EOF / linha vazia / timeout
//!     parse → fila (ordem dos tokens, erro de parse no fim)
//!     on_reconnect()
//!     dorme o período (cancelável)
//! }
//! ```

use crate::transport::ByteStream;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use iothub_core::protocol::{self, ProtocolError, REQUEST_LINE};
use iothub_core::queue::{QueueError, SampleQueue};
use iothub_core::types::RawSample;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Falha de E/S de uma transação (fatal para o engine).
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Erro de E/S no link: {0}")]
    Io(#[from] io::Error),

    #[error("Dispositivo não respondeu")]
    NoResponse,

    #[error("Nenhum stream de E/S associado")]
    NoStream,
}

/// Stream atual do engine, trocável via `update`.
#[derive(Clone, Default)]
pub struct IoHandle {
    stream: Arc<Mutex<Option<Box<dyn ByteStream>>>>,
}

impl IoHandle {
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self {
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// Substitui o stream usado a partir da próxima transação.
    pub fn update(&self, stream: Box<dyn ByteStream>) {
        *self.stream.lock() = Some(stream);
    }

    pub fn clear(&self) {
        self.stream.lock().take();
    }

    /// Uma troca requisição/resposta completa.
    pub fn transact(&self) -> Result<Vec<String>, LinkError> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(LinkError::NoStream)?;

        stream.write_all(REQUEST_LINE.as_bytes())?;
        stream.flush()?;
        read_response(stream.as_mut())
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Lê linhas até EOF, linha vazia ou timeout depois de pelo menos uma linha.
fn read_response<R: Read + ?Sized>(stream: &mut R) -> Result<Vec<String>, LinkError> {
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    let mut answered = false;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                answered = true;
                let line = line.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    break;
                }
                lines.push(line.to_string());
            }
            Err(e) if is_timeout(&e) && answered => break,
            Err(e) => return Err(e.into()),
        }
    }

    if answered {
        Ok(lines)
    } else {
        Err(LinkError::NoResponse)
    }
}

/// Observador dos eventos do engine (implementado pela sessão).
pub trait LinkObserver: Send + Sync {
    /// Falha de E/S; o engine encerra logo em seguida.
    fn on_exception(&self, error: &LinkError);

    /// Token inválido; o restante do ciclo foi descartado.
    ///
    /// Chamado na thread de `receive`, depois das amostras anteriores do
    /// mesmo ciclo.
    fn on_parse_error(&self, _error: &ProtocolError) {}

    /// Fim de ciclo: chance de trocar o stream via [`IoHandle::update`].
    fn on_reconnect(&self, _io: &IoHandle) {}
}

/// Item da fila do engine.
enum Polled {
    Sample(RawSample),
    Malformed(ProtocolError),
}

/// Engine de polling com sua thread dedicada.
pub struct PollEngine {
    io: IoHandle,
    queue: Arc<SampleQueue<Polled>>,
    observer: Arc<dyn LinkObserver>,
    cancel: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PollEngine {
    /// Inicia a thread de polling sobre `stream`.
    pub fn spawn(
        stream: Box<dyn ByteStream>,
        observer: Arc<dyn LinkObserver>,
        period: Duration,
        capacity: usize,
    ) -> io::Result<Self> {
        let io = IoHandle::new(stream);
        let queue = Arc::new(SampleQueue::new(capacity));
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        let thread = {
            let io = io.clone();
            let queue = Arc::clone(&queue);
            let observer = Arc::clone(&observer);
            std::thread::Builder::new()
                .name("poll-engine".into())
                .spawn(move || poll_loop(&io, &queue, observer.as_ref(), period, &cancel_rx))?
        };

        Ok(Self {
            io,
            queue,
            observer,
            cancel: Mutex::new(Some(cancel_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Troca o stream sem reconstruir o engine.
    pub fn update_io(&self, stream: Box<dyn ByteStream>) {
        self.io.update(stream);
    }

    /// Espera uma amostra. `None` se o engine foi encerrado.
    ///
    /// Erros de parse encontrados no caminho vão para
    /// [`LinkObserver::on_parse_error`].
    pub fn receive(&self) -> Option<RawSample> {
        loop {
            match self.queue.pop()? {
                Polled::Sample(sample) => return Some(sample),
                Polled::Malformed(e) => self.observer.on_parse_error(&e),
            }
        }
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<RawSample, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.queue.pop_timeout(left)? {
                Polled::Sample(sample) => return Ok(sample),
                Polled::Malformed(e) => self.observer.on_parse_error(&e),
            }
        }
    }

    /// Acorda quem espera em `receive` e pede o fim do laço.
    pub fn stop(&self) {
        self.queue.close();
        // Derrubar o sender interrompe o sono entre ciclos
        self.cancel.lock().take();
    }

    /// Espera a thread terminar.
    pub fn join(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("Thread de polling terminou em pânico");
        }
    }

    pub fn destroy(&self) {
        self.stop();
        self.join();
    }

    pub fn is_stopped(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Drop for PollEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn poll_loop(
    io: &IoHandle,
    queue: &SampleQueue<Polled>,
    observer: &dyn LinkObserver,
    period: Duration,
    cancel: &Receiver<()>,
) {
    info!("Poll engine iniciado (período {} ms)", period.as_millis());

    loop {
        let lines = match io.transact() {
            Ok(lines) => lines,
            Err(e) => {
                // Erro causado pelo próprio encerramento não é reportado
                if !matches!(cancel.try_recv(), Err(TryRecvError::Disconnected)) {
                    error!("Falha na transação: {e}");
                    observer.on_exception(&e);
                }
                break;
            }
        };

        let mut delivered = 0usize;
        for item in protocol::samples(lines.as_slice()) {
            match item {
                Ok(sample) => {
                    debug!("Amostra {}={}", sample.key, sample.value);
                    if queue.push(Polled::Sample(sample)) {
                        delivered += 1;
                    }
                }
                Err(e) => {
                    warn!("Resposta inválida: {e}");
                    queue.push(Polled::Malformed(e));
                    break;
                }
            }
        }
        debug!("Ciclo concluído: {delivered} amostras");

        observer.on_reconnect(io);

        match cancel.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }

    queue.close();
    info!("Poll engine encerrado");
}
