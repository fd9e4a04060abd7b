//! # IoT Hub Core
//!
//! Crate compartilhada com os tipos de amostra, o protocolo textual do
//! dispositivo, a fila bloqueante, o watchdog, o interpretador de valores
//! e a configuração TOML.
//!
//! ## Módulos
//! - [`types`] – Amostras brutas e registro estruturado
//! - [`protocol`] – Requisição fixa, envelope e tokenizador
//! - [`queue`] – Fila limitada com espera bloqueante
//! - [`watchdog`] – Supervisor de prazo (feed/hug/bark)
//! - [`interpreter`] – Regras por chave e eventos de domínio
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod queue;
pub mod watchdog;
pub mod interpreter;
pub mod config;

// Re-exports convenientes
pub use types::{RawSample, SampleKey, SampleRecord};
pub use protocol::{parse_response, ProtocolError, REQUEST_LINE};
pub use queue::{QueueError, SampleQueue};
pub use watchdog::Watchdog;
pub use interpreter::{InterpreterEvent, ValueInterpreter};
pub use config::{AppConfig, ControllerConfig, Medium, SimulatorConfig};
