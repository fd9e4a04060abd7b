//! Watchdog de vivacidade da sessão.
//!
//! Um único prazo, vigiado por uma thread própria. `feed` rearma o prazo;
//! se ele vencer sem nova alimentação o callback de latido é chamado uma
//! vez. `hug` cancela o watchdog de forma permanente: depois que retorna,
//! nenhum latido começa.
//!
//! ```text
//! feed(100) ──┬── feed(100) ──┬── ... 100ms sem feed ──► bark()
//!             └── hug() ──────┴── silêncio definitivo
//! ```

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

enum Command {
    /// Novo prazo absoluto; `None` desarma.
    Feed(Option<Instant>),
    Hug,
}

/// Supervisor de prazo com latido único por prazo vencido.
pub struct Watchdog {
    tx: Sender<Command>,
    hugged: Arc<Mutex<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Cria o watchdog (desarmado) e sua thread de vigilância.
    pub fn spawn<F>(on_bark: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let hugged = Arc::new(Mutex::new(false));
        let guard = Arc::clone(&hugged);

        let thread = std::thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || watch(&rx, &guard, on_bark))?;

        Ok(Self {
            tx,
            hugged,
            thread: Some(thread),
        })
    }

    /// Rearma o prazo para `timeout_ms` a partir de agora.
    ///
    /// `timeout_ms <= 0` desarma (modo desabilitado, nunca late).
    pub fn feed(&self, timeout_ms: i64) {
        let deadline = u64::try_from(timeout_ms)
            .ok()
            .filter(|&ms| ms > 0)
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        // Após hug a thread já saiu: alimentação é ignorada
        let _ = self.tx.send(Command::Feed(deadline));
    }

    /// Silencia o watchdog para sempre.
    pub fn hug(&self) {
        *self.hugged.lock() = true;
        let _ = self.tx.send(Command::Hug);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.hug();
        if let Some(thread) = self.thread.take() {
            // Drop a partir do próprio callback não pode se auto-join
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn watch<F: Fn()>(rx: &Receiver<Command>, hugged: &Mutex<bool>, on_bark: F) {
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => match rx.recv_deadline(at) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    deadline = None;
                    let silenced = hugged.lock();
                    if *silenced {
                        break;
                    }
                    warn!("Watchdog: prazo vencido sem alimentação");
                    // Lock mantido durante o latido: hug() espera o callback terminar
                    on_bark();
                    drop(silenced);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Feed(next) => deadline = next,
            Command::Hug => break,
        }
    }

    debug!("Watchdog encerrado");
}
