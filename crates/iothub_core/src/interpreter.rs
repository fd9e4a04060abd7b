//! Interpretação de amostras – regras por chave e eventos de domínio.
//!
//! Toda amostra gera primeiro um [`InterpreterEvent::Trace`]. Cada chave
//! reconhecida tem uma regra:
//! - `T`, `H` → [`Rule::Range`]: só aceita valores em `[0, 100)` e só
//!   notifica quando o valor difere do guardado (inicialmente `0`). Fora da
//!   faixa o estado não é tocado.
//! - `B`, `R` → [`Rule::Monotonic`]: contadores que nunca deveriam
//!   diminuir. O estado sempre avança; uma queda gera
//!   [`InterpreterEvent::Inconsistent`].
//!
//! Chaves sem regra (inclusive `E`) geram [`InterpreterEvent::Unmapped`].

use crate::types::{RawSample, SampleKey, SampleRecord};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

pub const MIN_VAL: f64 = 0.0;
pub const MAX_VAL: f64 = 100.0;

/// Regra de validação associada a uma chave.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Faixa semiaberta `[min, max)` + detecção de mudança.
    Range { min: f64, max: f64 },
    /// Contador monotônico: erro (não fatal) quando diminui.
    Monotonic,
}

/// Estado por chave: último valor aceito.
#[derive(Debug, Clone, Copy, PartialEq)]
struct KeyState {
    key: char,
    last_value: f64,
    has_value: bool,
    rule: Rule,
}

impl KeyState {
    fn new(key: SampleKey, rule: Rule) -> Self {
        Self {
            key: key.code(),
            last_value: 0.0,
            has_value: false,
            rule,
        }
    }
}

/// Eventos produzidos pelo interpretador, na ordem em que ocorrem.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpreterEvent {
    /// Rastreamento de toda amostra, antes da validação.
    Trace { key: char, value: f64 },
    TemperatureChanged { old: f64, new: f64 },
    HumidityChanged { old: f64, new: f64 },
    BootTimeChanged(f64),
    ReadTimeChanged(f64),
    /// Contador monotônico diminuiu (o estado avança mesmo assim).
    Inconsistent { key: char, old: f64, new: f64 },
    /// Chave sem regra registrada.
    Unmapped(char),
}

impl InterpreterEvent {
    pub fn is_trace(&self) -> bool {
        matches!(self, InterpreterEvent::Trace { .. })
    }
}

impl fmt::Display for InterpreterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpreterEvent::Trace { key, value } => write!(f, "debug {key} = {value}"),
            InterpreterEvent::TemperatureChanged { old, new } => {
                write!(f, "Temperatura {old:.1} → {new:.1} °C")
            }
            InterpreterEvent::HumidityChanged { old, new } => {
                write!(f, "Umidade {old:.1} → {new:.1} %")
            }
            InterpreterEvent::BootTimeChanged(value) => write!(f, "Tempo desde boot: {value} s"),
            InterpreterEvent::ReadTimeChanged(value) => write!(f, "Última leitura em: {value} s"),
            InterpreterEvent::Inconsistent { key, old, new } => {
                write!(f, "Valor inconsistente para {key}: {new} < {old}")
            }
            InterpreterEvent::Unmapped(key) => write!(f, "Chave não mapeada: {key}"),
        }
    }
}

/// Erros ao interpretar um registro serializado.
#[derive(Debug, thiserror::Error)]
pub enum InterpreterError {
    #[error("Registro JSON inválido: {0}")]
    MalformedRecord(#[from] serde_json::Error),

    #[error("Chave inválida no registro: {0:?}")]
    InvalidKey(String),
}

/// Interpretador com estado por chave.
pub struct ValueInterpreter {
    states: HashMap<char, KeyState>,
}

impl ValueInterpreter {
    pub fn new() -> Self {
        let range = Rule::Range {
            min: MIN_VAL,
            max: MAX_VAL,
        };
        let states = [
            KeyState::new(SampleKey::Temperature, range),
            KeyState::new(SampleKey::Humidity, range),
            KeyState::new(SampleKey::BootTime, Rule::Monotonic),
            KeyState::new(SampleKey::ReadTime, Rule::Monotonic),
        ]
        .into_iter()
        .map(|s| (s.key, s))
        .collect();

        Self { states }
    }

    /// Último valor aceito para a chave, se houver.
    pub fn last_value(&self, key: char) -> Option<f64> {
        self.states
            .get(&key)
            .filter(|s| s.has_value)
            .map(|s| s.last_value)
    }

    /// Segundos entre a última leitura dos sensores e o tempo de boot atual.
    pub fn seconds_since_read(&self) -> Option<f64> {
        let boot = self.last_value(SampleKey::BootTime.code())?;
        let read = self.last_value(SampleKey::ReadTime.code())?;
        (boot >= read).then_some(boot - read)
    }

    /// Aplica a regra da chave e retorna os eventos gerados.
    pub fn interpret(&mut self, sample: &RawSample) -> Vec<InterpreterEvent> {
        let value = sample.value;
        debug!("debug {} {}", sample.key, value);
        let mut events = vec![InterpreterEvent::Trace {
            key: sample.key,
            value,
        }];

        let Some(state) = self.states.get_mut(&sample.key) else {
            events.push(InterpreterEvent::Unmapped(sample.key));
            return events;
        };

        match state.rule {
            Rule::Range { min, max } => {
                if value >= min && value < max {
                    let old = state.last_value;
                    state.last_value = value;
                    state.has_value = true;
                    if value != old {
                        events.extend(change_event(sample.key, old, value));
                    }
                }
            }
            Rule::Monotonic => {
                let old = state.last_value;
                if state.has_value && value < old {
                    events.push(InterpreterEvent::Inconsistent {
                        key: sample.key,
                        old,
                        new: value,
                    });
                } else {
                    events.extend(change_event(sample.key, old, value));
                }
                state.last_value = value;
                state.has_value = true;
            }
        }

        events
    }

    /// Interpreta o registro estruturado que a sessão entrega ao host.
    pub fn interpret_record(
        &mut self,
        record: &SampleRecord,
    ) -> Result<Vec<InterpreterEvent>, InterpreterError> {
        let sample = record
            .to_sample()
            .ok_or_else(|| InterpreterError::InvalidKey(record.key.clone()))?;
        Ok(self.interpret(&sample))
    }

    /// Interpreta um registro serializado (`{"KEY":"T","VALUE":25.3}`).
    pub fn interpret_json(&mut self, json: &str) -> Result<Vec<InterpreterEvent>, InterpreterError> {
        let record = SampleRecord::from_json(json)?;
        self.interpret_record(&record)
    }
}

impl Default for ValueInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn change_event(key: char, old: f64, new: f64) -> Option<InterpreterEvent> {
    match SampleKey::from_code(key)? {
        SampleKey::Temperature => Some(InterpreterEvent::TemperatureChanged { old, new }),
        SampleKey::Humidity => Some(InterpreterEvent::HumidityChanged { old, new }),
        SampleKey::BootTime => Some(InterpreterEvent::BootTimeChanged(new)),
        SampleKey::ReadTime => Some(InterpreterEvent::ReadTimeChanged(new)),
        SampleKey::Error => None,
    }
}
