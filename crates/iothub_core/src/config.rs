//! Configuração unificada via TOML.
//!
//! Um único `config.toml` com as seções `[controller]` (sessão e meios de
//! transporte) e `[simulator]` (dispositivo simulado).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Período mínimo do laço da sessão (valores menores são ignorados).
pub const MIN_SCAN_PERIOD_MS: u64 = 10;

/// Nome anunciado pelo dispositivo real (rádio e ponto de acesso).
pub const DEVICE_NAME: &str = "IOT_HUB";

/// Resposta enlatada do meio sintético.
pub const FAKE_PAYLOAD: &str = "B=100 R=96 E=1 T=25.3C H=37.7%";

// ──────────────────────────────────────────────
// Meio de transporte
// ──────────────────────────────────────────────

/// Meio físico usado para falar com o dispositivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Radio,
    Network,
    Synthetic,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Medium::Radio => "radio",
            Medium::Network => "network",
            Medium::Synthetic => "synthetic",
        })
    }
}

impl FromStr for Medium {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "radio" | "bt" | "bluetooth" => Ok(Medium::Radio),
            "network" | "wifi" => Ok(Medium::Network),
            "synthetic" | "fake" => Ok(Medium::Synthetic),
            other => Err(format!("Meio desconhecido: {other} (radio, network, synthetic)")),
        }
    }
}

// ──────────────────────────────────────────────
// Rádio
// ──────────────────────────────────────────────

/// Dispositivo pareado no sistema (o pareamento em si é feito pelo SO).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondedDevice {
    /// Nome anunciado (ex: "Sala IOT_HUB")
    pub name: String,
    /// Porta serial RFCOMM ligada ao dispositivo (ex: "/dev/rfcomm0")
    pub port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Sufixo do nome do dispositivo procurado entre os pareados
    pub device_name: String,
    /// Raiz do sysfs do rfkill
    pub rfkill_root: PathBuf,
    /// Espera máxima pelo adaptador após habilitar (ms)
    pub enable_timeout_ms: u64,
    pub baud_rate: u32,
    /// Timeout de leitura do link (ms)
    pub read_timeout_ms: u64,
    /// Dispositivos pareados conhecidos
    pub bonded: Vec<BondedDevice>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.into(),
            rfkill_root: PathBuf::from("/sys/class/rfkill"),
            enable_timeout_ms: 5000,
            baud_rate: 9600,
            read_timeout_ms: 5000,
            bonded: vec![BondedDevice {
                name: DEVICE_NAME.into(),
                port: "/dev/rfcomm0".into(),
            }],
        }
    }
}

// ──────────────────────────────────────────────
// Rede
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Endereço IPv4 (ou nome que resolva para IPv4) do dispositivo
    pub host: String,
    pub port: u16,
    /// SSID do ponto de acesso (prefixo do perfil configurado)
    pub access_point: String,
    /// Gerenciar o Wi-Fi via nmcli (false = host já está na rede do dispositivo)
    pub manage_link: bool,
    /// Interface consultada para saber se o link está online
    pub interface: String,
    /// Espera máxima pelo link online (ms)
    pub online_timeout_ms: u64,
    /// Intervalo entre consultas do estado do link (ms)
    pub online_poll_ms: u64,
    pub connect_timeout_ms: u64,
    /// Timeout de leitura/escrita do socket (ms)
    pub read_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            access_point: DEVICE_NAME.into(),
            manage_link: false,
            interface: "wlan0".into(),
            online_timeout_ms: 10_000,
            online_poll_ms: 1000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
        }
    }
}

// ──────────────────────────────────────────────
// Sintético
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Payload devolvido a cada requisição
    pub payload: String,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            payload: FAKE_PAYLOAD.into(),
        }
    }
}

// ──────────────────────────────────────────────
// Sessão (controller)
// ──────────────────────────────────────────────

/// Configuração da sessão supervisionada.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Meio: "radio", "network" ou "synthetic"
    pub medium: Medium,
    /// Executa um único ciclo e desconecta
    pub one_shot: bool,
    /// Prazo do watchdog (ms); <= 0 desabilita
    pub watchdog_timeout_ms: i64,
    /// Estado prévio do meio (None = consultar o adaptador no initiate)
    pub was_enabled: Option<bool>,
    /// Pausa entre ciclos da sessão (ms)
    pub scan_period_ms: u64,
    /// Intervalo entre requisições ao dispositivo (ms)
    pub poll_period_ms: u64,
    /// Espera por uma amostra antes de reportar falha transitória (ms)
    pub stall_timeout_ms: u64,
    pub queue_capacity: usize,
    /// Reconectar automaticamente após erro/timeout
    pub auto_reattach: bool,
    pub reattach_delay_secs: f64,
    /// Tentativas de reconexão seguidas (0 = ilimitado)
    pub max_reattach_attempts: u32,
    pub radio: RadioConfig,
    pub network: NetworkConfig,
    pub synthetic: SyntheticConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            medium: Medium::Synthetic,
            one_shot: false,
            watchdog_timeout_ms: 10_000,
            was_enabled: None,
            scan_period_ms: 100,
            poll_period_ms: 2000,
            stall_timeout_ms: 4000,
            queue_capacity: crate::queue::DEFAULT_CAPACITY,
            auto_reattach: false,
            reattach_delay_secs: 2.0,
            max_reattach_attempts: 3,
            radio: RadioConfig::default(),
            network: NetworkConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Período efetivo do laço da sessão (valores pequenos demais são ignorados).
    pub fn scan_period(&self) -> Duration {
        if self.scan_period_ms > MIN_SCAN_PERIOD_MS {
            Duration::from_millis(self.scan_period_ms)
        } else {
            Duration::from_millis(MIN_SCAN_PERIOD_MS)
        }
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

// ──────────────────────────────────────────────
// Simulador
// ──────────────────────────────────────────────

/// Configuração do dispositivo simulado.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// IP local para bind (vazio = todas as interfaces)
    pub bind_ip: String,
    pub port: u16,
    /// Mantém a conexão aberta entre requisições (link tipo serial)
    pub keep_alive: bool,
    /// Intervalo mínimo entre leituras dos sensores (s)
    pub sensor_interval_secs: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bind_ip: String::new(),
            port: 8080,
            keep_alive: false,
            sensor_interval_secs: 1.0,
        }
    }
}

impl SimulatorConfig {
    /// Intervalo entre leituras; valores negativos ou não finitos viram 0.
    pub fn sensor_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sensor_interval_secs).unwrap_or_default()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.port == 0 {
            errors.push("Porta do simulador não pode ser 0".into());
        }
        if !(0.0..=3600.0).contains(&self.sensor_interval_secs) {
            errors.push(format!(
                "Intervalo dos sensores inválido: {} (0–3600)",
                self.sensor_interval_secs
            ));
        }
        errors
    }
}

// ──────────────────────────────────────────────
// Raiz
// ──────────────────────────────────────────────

/// Erros ao persistir a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro de E/S em {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Configuração raiz do aplicativo (unifica controller e simulador).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub simulator: SimulatorConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML, caindo no padrão se falhar.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml (ao lado do executável).
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let c = &self.controller;

        if c.poll_period_ms == 0 {
            errors.push("Intervalo de polling não pode ser 0".into());
        }
        if c.stall_timeout_ms <= c.poll_period_ms {
            errors.push(format!(
                "Prazo de amostra ({} ms) deve ser maior que o intervalo de polling ({} ms)",
                c.stall_timeout_ms, c.poll_period_ms
            ));
        }
        if c.queue_capacity == 0 {
            errors.push("Capacidade da fila não pode ser 0".into());
        }
        if c.watchdog_timeout_ms > 0 && (c.watchdog_timeout_ms as u64) <= c.poll_period_ms {
            errors.push(format!(
                "Watchdog ({} ms) deve ser maior que o intervalo de polling ({} ms)",
                c.watchdog_timeout_ms, c.poll_period_ms
            ));
        }
        if !(0.0..=3600.0).contains(&c.reattach_delay_secs) {
            errors.push(format!(
                "Atraso de reconexão inválido: {} (0–3600)",
                c.reattach_delay_secs
            ));
        }

        match c.medium {
            Medium::Radio => {
                if c.radio.bonded.is_empty() {
                    errors.push("Nenhum dispositivo pareado configurado".into());
                }
                if c.radio.baud_rate == 0 {
                    errors.push("Baud rate do rádio não pode ser 0".into());
                }
            }
            Medium::Network => {
                if c.network.host.trim().is_empty() {
                    errors.push("Host do dispositivo não pode ser vazio".into());
                }
                if c.network.port == 0 {
                    errors.push("Porta do dispositivo não pode ser 0".into());
                }
            }
            Medium::Synthetic => {
                if c.synthetic.payload.trim().is_empty() {
                    errors.push("Payload sintético não pode ser vazio".into());
                }
            }
        }

        errors.extend(self.simulator.validate());
        errors
    }
}
