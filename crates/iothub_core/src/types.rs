//! Definição de tipos para as amostras de telemetria do dispositivo.
//!
//! Cada ciclo de polling produz uma sequência de [`RawSample`] (chave de um
//! caractere + valor `f64`). O host recebe o [`SampleRecord`], a forma
//! estruturada e serializável da mesma amostra.

use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Chaves conhecidas
// ──────────────────────────────────────────────

/// Chaves reconhecidas pelo protocolo do dispositivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKey {
    /// Temperatura (°C) – `T=25.3C`
    Temperature,
    /// Umidade relativa (%) – `H=37.7%`
    Humidity,
    /// Tempo desde o boot do dispositivo (s) – `B=100`
    BootTime,
    /// Instante da última leitura dos sensores, em tempo de boot (s) – `R=96`
    ReadTime,
    /// Indicador de erro do dispositivo – `E=1`
    Error,
}

impl SampleKey {
    pub const ALL: [SampleKey; 5] = [
        SampleKey::Temperature,
        SampleKey::Humidity,
        SampleKey::BootTime,
        SampleKey::ReadTime,
        SampleKey::Error,
    ];

    /// Código de um caractere usado no fio.
    pub fn code(self) -> char {
        match self {
            SampleKey::Temperature => 'T',
            SampleKey::Humidity => 'H',
            SampleKey::BootTime => 'B',
            SampleKey::ReadTime => 'R',
            SampleKey::Error => 'E',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Sufixo de unidade enviado pelo dispositivo (vazio para contadores).
    pub fn unit(self) -> &'static str {
        match self {
            SampleKey::Temperature => "C",
            SampleKey::Humidity => "%",
            _ => "",
        }
    }

    /// Apenas temperatura e umidade carregam sufixo de unidade no fio.
    pub fn has_unit_suffix(code: char) -> bool {
        matches!(code, 'T' | 'H')
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleKey::Temperature => "temperatura",
            SampleKey::Humidity => "umidade",
            SampleKey::BootTime => "tempo desde boot",
            SampleKey::ReadTime => "última leitura",
            SampleKey::Error => "indicador de erro",
        };
        f.write_str(name)
    }
}

// ──────────────────────────────────────────────
// Amostra bruta
// ──────────────────────────────────────────────

/// Um par `(chave, valor)` extraído de um ciclo de polling.
///
/// A chave é mantida como caractere cru: o tokenizador aceita qualquer
/// chave e cabe ao interpretador decidir o que é mapeado.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub key: char,
    pub value: f64,
}

impl RawSample {
    pub fn new(key: char, value: f64) -> Self {
        Self { key, value }
    }
}

// ──────────────────────────────────────────────
// Registro estruturado (host)
// ──────────────────────────────────────────────

/// Registro mínimo entregue ao host para cada amostra recebida.
///
/// Serializa como `{"KEY":"T","VALUE":25.3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    #[serde(rename = "KEY")]
    pub key: String,
    #[serde(rename = "VALUE")]
    pub value: f64,
}

impl SampleRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Converte de volta para amostra bruta se a chave tiver um único caractere.
    pub fn to_sample(&self) -> Option<RawSample> {
        let mut chars = self.key.chars();
        match (chars.next(), chars.next()) {
            (Some(key), None) => Some(RawSample::new(key, self.value)),
            _ => None,
        }
    }
}

impl From<RawSample> for SampleRecord {
    fn from(sample: RawSample) -> Self {
        Self {
            key: sample.key.to_string(),
            value: sample.value,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_codes_are_unique() {
        for key in SampleKey::ALL {
            assert_eq!(SampleKey::from_code(key.code()), Some(key));
        }
        assert_eq!(SampleKey::from_code('X'), None);
    }

    #[test]
    fn only_temperature_and_humidity_have_units() {
        assert!(SampleKey::has_unit_suffix('T'));
        assert!(SampleKey::has_unit_suffix('H'));
        assert!(!SampleKey::has_unit_suffix('B'));
        assert!(!SampleKey::has_unit_suffix('R'));
        assert!(!SampleKey::has_unit_suffix('E'));
    }

    #[test]
    fn record_uses_upper_case_field_names() {
        let record = SampleRecord::from(RawSample::new('T', 25.3));
        let json = record.to_json().unwrap();
        assert_eq!(json, r#"{"KEY":"T","VALUE":25.3}"#);
    }

    #[test]
    fn record_back_to_sample() {
        let record = SampleRecord::from_json(r#"{"KEY":"B","VALUE":100.0}"#).unwrap();
        assert_eq!(record.to_sample(), Some(RawSample::new('B', 100.0)));

        let long_key = SampleRecord {
            key: "TT".into(),
            value: 1.0,
        };
        assert_eq!(long_key.to_sample(), None);
    }
}
