//! Fila limitada e bloqueante de amostras.
//!
//! Produtor: a thread de polling. Consumidor: quem chama `pop`. O item
//! padrão é [`RawSample`]; o poll engine também enfileira erros de parse
//! para que cheguem ao consumidor na ordem do ciclo. Toda
//! mutação acontece sob um único `Mutex`, com um `Condvar` associado para
//! acordar o consumidor.

use crate::types::RawSample;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::warn;

/// Capacidade padrão (amostras).
pub const DEFAULT_CAPACITY: usize = 256;

/// Motivo de uma espera sem amostra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Nenhuma amostra dentro do prazo")]
    Timeout,

    #[error("Fila fechada")]
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fila FIFO com espera bloqueante.
pub struct SampleQueue<T = RawSample> {
    state: Mutex<State<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> SampleQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Enfileira um item e acorda um consumidor.
    ///
    /// Cheia: descarta o mais antigo. Fechada: ignora e retorna `false`.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if state.items.len() >= self.capacity {
            if state.items.pop_front().is_some() {
                warn!("Fila cheia ({}), descartando o item mais antigo", self.capacity);
            }
        }
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /// Retira o item mais antigo, esperando se a fila estiver vazia.
    ///
    /// Retorna `None` somente quando a fila foi fechada e está vazia.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.closed {
            self.ready.wait(&mut state);
        }
        state.items.pop_front()
    }

    /// Igual a [`pop`](Self::pop), mas desiste após `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return match state.items.pop_front() {
                    Some(item) => Ok(item),
                    None if state.closed => Err(QueueError::Closed),
                    None => Err(QueueError::Timeout),
                };
            }
        }
    }

    /// Fecha a fila e acorda todos os consumidores. Itens já enfileirados
    /// continuam disponíveis para `pop`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for SampleQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(SampleQueue::default());
        let q = Arc::clone(&queue);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            q.push(RawSample::new('T', 21.0));
        });

        let start = Instant::now();
        let sample = queue.pop();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(sample, Some(RawSample::new('T', 21.0)));

        handle.join().unwrap();
    }

    #[test]
    fn delivers_in_fifo_order() {
        let queue = SampleQueue::default();
        let pushed: Vec<RawSample> = (0..10).map(|i| RawSample::new('B', i as f64)).collect();
        for s in &pushed {
            assert!(queue.push(*s));
        }

        let received: Vec<RawSample> = (0..10).map(|_| queue.pop().unwrap()).collect();
        assert_eq!(pushed, received);
        assert!(queue.is_empty());
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(SampleQueue::<RawSample>::default());
        let q = Arc::clone(&queue);

        let handle = thread::spawn(move || q.pop());

        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn items_survive_close_but_pushes_do_not() {
        let queue = SampleQueue::default();
        queue.push(RawSample::new('R', 1.0));
        queue.close();

        assert!(!queue.push(RawSample::new('R', 2.0)));
        assert_eq!(queue.pop(), Some(RawSample::new('R', 1.0)));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), Err(QueueError::Closed));
    }

    #[test]
    fn pop_timeout_reports_timeout() {
        let queue = SampleQueue::<RawSample>::default();
        let start = Instant::now();
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(20)),
            Err(QueueError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn carries_other_item_types() {
        let queue: SampleQueue<Result<RawSample, String>> = SampleQueue::new(4);
        queue.push(Ok(RawSample::new('B', 1.0)));
        queue.push(Err("token inválido".into()));

        assert_eq!(queue.pop(), Some(Ok(RawSample::new('B', 1.0))));
        assert_eq!(queue.pop(), Some(Err("token inválido".into())));
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = SampleQueue::new(2);
        queue.push(RawSample::new('B', 1.0));
        queue.push(RawSample::new('B', 2.0));
        queue.push(RawSample::new('B', 3.0));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().value, 2.0);
        assert_eq!(queue.pop().unwrap().value, 3.0);
    }
}
