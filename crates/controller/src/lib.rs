//! # IoT Hub Controller
//!
//! Biblioteca do controller: transportes, poll engine, sessão
//! supervisionada e consumidor de console.
//!
//! ## Módulos
//! - [`transport`] – Rádio (RFCOMM), rede (TCP) e meio sintético
//! - [`poll_engine`] – Thread de requisição/resposta e fila de amostras
//! - [`session`] – Orquestração com watchdog e eventos para o host
//! - [`console`] – Consumidor que interpreta e imprime os eventos

pub mod console;
pub mod poll_engine;
pub mod session;
pub mod transport;

pub use session::{Session, SessionError, SessionEvent, SessionState};
