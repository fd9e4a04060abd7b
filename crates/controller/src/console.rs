//! Consumidor de console: interpreta os eventos da sessão, imprime o
//! estado do dispositivo e decide quando reconectar.

use crate::session::{Session, SessionEvent};
use crossbeam_channel::Receiver;
use iothub_core::config::ControllerConfig;
use iothub_core::interpreter::ValueInterpreter;
use iothub_core::types::SampleKey;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// O que o laço deve fazer após um evento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Desmontar, esperar o atraso e conectar de novo
    Reattach,
    /// Encerrar (`true` = sucesso)
    Exit(bool),
}

/// Estado do consumidor.
pub struct Console {
    interpreter: ValueInterpreter,
    json: bool,
    one_shot: bool,
    auto_reattach: bool,
    max_attempts: u32,
    attempts: u32,
    /// Detach disparado por nós mesmos na reconexão
    pending_detach: bool,
}

impl Console {
    pub fn new(config: &ControllerConfig, json: bool) -> Self {
        Self {
            interpreter: ValueInterpreter::new(),
            json,
            one_shot: config.one_shot,
            auto_reattach: config.auto_reattach,
            max_attempts: config.max_reattach_attempts,
            attempts: 0,
            pending_detach: false,
        }
    }

    /// Processa um evento: linhas para exibir e a próxima ação.
    pub fn handle(&mut self, event: &SessionEvent) -> (Vec<String>, Action) {
        let mut lines = Vec::new();

        let action = match event {
            SessionEvent::Attached(label) => {
                // Falha no initiate volta a Idle sem emitir Detached
                self.pending_detach = false;
                lines.push(format!("Conectado a {label}"));
                Action::Continue
            }
            SessionEvent::Data(record) => {
                self.attempts = 0;
                if self.json {
                    match record.to_json() {
                        Ok(json) => lines.push(json),
                        Err(e) => warn!("Falha ao serializar registro: {e}"),
                    }
                }
                match self.interpreter.interpret_record(record) {
                    Ok(events) => {
                        lines.extend(
                            events
                                .iter()
                                .filter(|e| !e.is_trace())
                                .map(ToString::to_string),
                        );
                    }
                    Err(e) => lines.push(format!("Registro ignorado: {e}")),
                }
                if record.key == SampleKey::ReadTime.code().to_string() {
                    if let Some(secs) = self.interpreter.seconds_since_read() {
                        lines.push(format!("Leitura dos sensores há {secs:.0} segundos"));
                    }
                }
                Action::Continue
            }
            SessionEvent::Stalled => {
                lines.push("Sem amostras, aguardando o dispositivo...".into());
                Action::Continue
            }
            SessionEvent::Malformed(message) => {
                lines.push(format!("Resposta inválida: {message}"));
                Action::Continue
            }
            SessionEvent::Timeout => {
                lines.push("Dispositivo não responde (watchdog)".into());
                self.after_failure(&mut lines)
            }
            SessionEvent::Error(message) => {
                lines.push(format!("Erro: {message}"));
                self.after_failure(&mut lines)
            }
            SessionEvent::Detached => {
                if self.pending_detach {
                    self.pending_detach = false;
                    Action::Continue
                } else {
                    lines.push("Desconectado".into());
                    Action::Exit(true)
                }
            }
        };

        (lines, action)
    }

    fn after_failure(&mut self, lines: &mut Vec<String>) -> Action {
        let can_retry = self.max_attempts == 0 || self.attempts < self.max_attempts;
        if self.auto_reattach && can_retry {
            self.attempts += 1;
            self.pending_detach = true;
            lines.push(format!("Reconectando (tentativa {})", self.attempts));
            Action::Reattach
        } else {
            Action::Exit(false)
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }
}

/// Laço principal: conecta, consome eventos e reconecta quando configurado.
///
/// Retorna `true` se terminou sem erro.
pub fn run(session: &Session, events: &Receiver<SessionEvent>, console: &mut Console) -> bool {
    let delay = Duration::from_secs_f64(session.config().reattach_delay_secs.max(0.0));

    if let Err(e) = session.attach() {
        error!("Falha ao conectar: {e}");
        return false;
    }

    for event in events.iter() {
        debug!("Evento da sessão: {event:?}");
        let (lines, action) = console.handle(&event);
        for line in &lines {
            println!("{line}");
        }

        match action {
            Action::Continue => {}
            Action::Reattach => {
                session.detach();
                info!("Nova tentativa em {:.1}s...", delay.as_secs_f64());
                std::thread::sleep(delay);
                if let Err(e) = session.attach() {
                    error!("Falha ao reconectar: {e}");
                    return false;
                }
            }
            Action::Exit(ok) => {
                session.detach();
                return ok;
            }
        }
    }

    // Channel fechado: sessão descartada
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use iothub_core::types::SampleRecord;

    fn data(key: &str, value: f64) -> SessionEvent {
        SessionEvent::Data(SampleRecord {
            key: key.into(),
            value,
        })
    }

    fn make_console(auto_reattach: bool, max: u32) -> Console {
        let config = ControllerConfig {
            auto_reattach,
            max_reattach_attempts: max,
            ..ControllerConfig::default()
        };
        Console::new(&config, false)
    }

    #[test]
    fn scenario_prints_domain_events() {
        let mut console = make_console(false, 0);
        let mut printed = Vec::new();
        for event in [
            data("B", 100.0),
            data("R", 96.0),
            data("E", 1.0),
            data("T", 25.3),
            data("H", 37.7),
        ] {
            let (lines, action) = console.handle(&event);
            assert_eq!(action, Action::Continue);
            printed.extend(lines);
        }

        assert_eq!(
            printed,
            vec![
                "Tempo desde boot: 100 s",
                "Última leitura em: 96 s",
                "Leitura dos sensores há 4 segundos",
                "Chave não mapeada: E",
                "Temperatura 0.0 → 25.3 °C",
                "Umidade 0.0 → 37.7 %",
            ]
        );

        // Mesmos valores: nada a reportar
        let (lines, _) = console.handle(&data("T", 25.3));
        assert!(lines.is_empty());
    }

    #[test]
    fn json_mode_prints_record() {
        let mut console = Console::new(&ControllerConfig::default(), true);
        let (lines, _) = console.handle(&data("T", 21.5));
        assert_eq!(lines[0], r#"{"KEY":"T","VALUE":21.5}"#);
    }

    #[test]
    fn failure_without_reattach_exits() {
        let mut console = make_console(false, 3);
        assert_eq!(console.handle(&SessionEvent::Timeout).1, Action::Exit(false));
    }

    #[test]
    fn reattach_is_bounded_and_resets_on_data() {
        let mut console = make_console(true, 2);
        let error = SessionEvent::Error("Dispositivo não respondeu".into());

        assert_eq!(console.handle(&error).1, Action::Reattach);
        // Detached do próprio detach de reconexão não encerra
        assert_eq!(console.handle(&SessionEvent::Detached).1, Action::Continue);
        assert_eq!(console.handle(&SessionEvent::Timeout).1, Action::Reattach);
        assert_eq!(console.handle(&SessionEvent::Detached).1, Action::Continue);
        assert_eq!(console.handle(&error).1, Action::Exit(false));

        let mut console = make_console(true, 1);
        assert_eq!(console.handle(&error).1, Action::Reattach);
        console.handle(&data("B", 1.0));
        assert_eq!(console.handle(&error).1, Action::Reattach);
    }

    #[test]
    fn attached_clears_pending_detach() {
        let config = ControllerConfig {
            one_shot: true,
            auto_reattach: true,
            ..ControllerConfig::default()
        };
        let mut console = Console::new(&config, false);

        // Initiate falhou: nenhum Detached acompanha o detach de reconexão
        let failed = SessionEvent::Error("porta indisponível".into());
        assert_eq!(console.handle(&failed).1, Action::Reattach);
        console.handle(&SessionEvent::Attached("FAKEDEVICE".into()));
        assert_eq!(console.handle(&SessionEvent::Detached).1, Action::Exit(true));
    }

    #[test]
    fn detached_ends_one_shot_run() {
        let config = ControllerConfig {
            one_shot: true,
            ..ControllerConfig::default()
        };
        let mut console = Console::new(&config, false);
        assert!(console.is_one_shot());
        assert_eq!(console.handle(&SessionEvent::Detached).1, Action::Exit(true));
    }

    #[test]
    fn run_one_shot_over_synthetic_medium() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = ControllerConfig {
            one_shot: true,
            scan_period_ms: 20,
            poll_period_ms: 1000,
            ..ControllerConfig::default()
        };
        let session = Session::new(config.clone(), tx);
        let mut console = Console::new(&config, false);

        assert!(run(&session, &rx, &mut console));
        assert_eq!(console.interpreter.last_value('T'), Some(25.3));
    }
}
