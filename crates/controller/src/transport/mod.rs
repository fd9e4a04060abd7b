//! Abstração de transporte: entrega um stream de bytes para o poll engine,
//! independente do meio físico.
//!
//! ```text
//! Transport::initiate() ──► Box<dyn ByteStream> ──► PollEngine
//!          │                                          │
//!          └──── reconnect() ◄──── on_reconnect ──────┘
//! ```
//!
//! - [`radio`]: RFCOMM exposto como porta serial, adaptador via rfkill
//! - [`network`]: socket TCP, link Wi-Fi opcionalmente gerenciado via nmcli
//! - [`synthetic`]: stream em memória com resposta enlatada

pub mod network;
pub mod radio;
pub mod synthetic;

use iothub_core::config::{ControllerConfig, Medium};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Stream bidirecional entregue ao poll engine.
pub trait ByteStream: Read + Write + Send {}

impl<T: Read + Write + Send> ByteStream for T {}

/// Falhas ao estabelecer ou reabrir um transporte.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Host inválido: {0:?}")]
    InvalidHost(String),

    #[error("Nenhum dispositivo pareado")]
    NoPairedDevices,

    #[error("Nenhum dispositivo pareado termina com {0:?}")]
    DeviceNotFound(String),

    #[error("Adaptador indisponível: {0}")]
    AdapterUnavailable(String),

    #[error("Perfil de rede para {0:?} não encontrado")]
    ProfileNotFound(String),

    #[error("Timeout aguardando {0}")]
    Timeout(&'static str),

    #[error("Comando {command} falhou: {detail}")]
    Command { command: String, detail: String },

    #[error("Erro serial: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Erro de E/S: {0}")]
    Io(#[from] std::io::Error),
}

/// Contrato comum dos meios de transporte.
///
/// `initiate` deixa o transporte totalmente conectado ou totalmente
/// liberado. `destroy` é idempotente e nunca falha.
pub trait Transport: Send {
    /// Identidade do endpoint (ex: "IOT_HUB", "FAKEDEVICE").
    fn label(&self) -> &str;

    fn medium(&self) -> Medium;

    fn is_connected(&self) -> bool;

    /// Estabelece a conexão e devolve o stream para o poll engine.
    fn initiate(&mut self) -> Result<Box<dyn ByteStream>, TransportError>;

    /// Reconexão dirigida. `None` quando o meio mantém o stream atual.
    fn reconnect(&mut self) -> Result<Option<Box<dyn ByteStream>>, TransportError>;

    /// Libera todos os recursos do meio; erros são logados e ignorados.
    fn destroy(&mut self);
}

/// Cria o transporte do meio configurado.
pub fn build(config: &ControllerConfig) -> Box<dyn Transport> {
    match config.medium {
        Medium::Radio => Box::new(radio::RadioTransport::from_config(
            &config.radio,
            config.was_enabled,
        )),
        Medium::Network => Box::new(network::NetworkTransport::from_config(
            &config.network,
            config.was_enabled,
        )),
        Medium::Synthetic => Box::new(synthetic::SyntheticTransport::new(
            &config.synthetic.payload,
        )),
    }
}

/// Espera limitada por uma condição, consultando a cada `every`.
pub(crate) fn wait_until<F>(
    what: &'static str,
    timeout: Duration,
    every: Duration,
    mut ready: F,
) -> Result<(), TransportError>
where
    F: FnMut() -> Result<bool, TransportError>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if ready()? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::Timeout(what));
        }
        std::thread::sleep(every.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_selects_medium() {
        let mut config = ControllerConfig::default();
        for medium in [Medium::Radio, Medium::Network, Medium::Synthetic] {
            config.medium = medium;
            let transport = build(&config);
            assert_eq!(transport.medium(), medium);
            assert!(!transport.is_connected());
        }
    }

    #[test]
    fn wait_until_gives_up() {
        let start = Instant::now();
        let result = wait_until("nada", Duration::from_millis(40), Duration::from_millis(10), || {
            Ok(false)
        });
        assert!(matches!(result, Err(TransportError::Timeout("nada"))));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn wait_until_returns_when_ready() {
        let mut calls = 0;
        wait_until("contador", Duration::from_secs(1), Duration::from_millis(1), || {
            calls += 1;
            Ok(calls == 3)
        })
        .unwrap();
        assert_eq!(calls, 3);
    }
}
