//! Meio rádio: perfil serial (RFCOMM) exposto pelo SO como porta serial.
//!
//! O adaptador precisa estar habilitado administrativamente antes da
//! conexão. O estado é lido/escrito no sysfs do rfkill; se esta sessão
//! habilitou o adaptador, `destroy` o desabilita de novo.

use super::{ByteStream, Transport, TransportError, wait_until};
use iothub_core::config::{BondedDevice, Medium, RadioConfig};
use serialport::SerialPort;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Intervalo de consulta enquanto o adaptador liga.
const ENABLE_POLL: Duration = Duration::from_millis(100);

// ──────────────────────────────────────────────
// Adaptador
// ──────────────────────────────────────────────

/// Controle administrativo do adaptador de rádio.
pub trait RadioAdapter: Send {
    fn is_enabled(&self) -> Result<bool, TransportError>;
    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError>;
}

/// Adaptador Bluetooth controlado via `/sys/class/rfkill`.
pub struct RfkillAdapter {
    root: PathBuf,
}

impl RfkillAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Entradas rfkill do tipo bluetooth.
    fn devices(&self) -> Result<Vec<PathBuf>, TransportError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            TransportError::AdapterUnavailable(format!("{}: {e}", self.root.display()))
        })?;

        let mut devices: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| read_attr(path, "type").is_ok_and(|t| t == "bluetooth"))
            .collect();
        devices.sort();

        if devices.is_empty() {
            return Err(TransportError::AdapterUnavailable(format!(
                "nenhum rádio bluetooth em {}",
                self.root.display()
            )));
        }
        Ok(devices)
    }
}

fn read_attr(device: &Path, name: &str) -> std::io::Result<String> {
    fs::read_to_string(device.join(name)).map(|s| s.trim().to_string())
}

impl RadioAdapter for RfkillAdapter {
    fn is_enabled(&self) -> Result<bool, TransportError> {
        for device in self.devices()? {
            let soft = read_attr(&device, "soft")?;
            let hard = read_attr(&device, "hard")?;
            if soft == "0" && hard == "0" {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        let value = if enabled { "0" } else { "1" };
        for device in self.devices()? {
            fs::write(device.join("soft"), value)?;
            debug!("rfkill {} soft={value}", device.display());
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Transporte
// ──────────────────────────────────────────────

/// Transporte RFCOMM via porta serial.
pub struct RadioTransport {
    adapter: Box<dyn RadioAdapter>,
    device_name: String,
    bonded: Vec<BondedDevice>,
    baud_rate: u32,
    read_timeout: Duration,
    enable_timeout: Duration,
    /// Estado prévio informado pela configuração
    was_enabled_hint: Option<bool>,
    /// Esta sessão ligou o adaptador (e deve desligá-lo no destroy)
    enabled_here: bool,
    port: Option<Box<dyn SerialPort>>,
}

impl RadioTransport {
    pub fn new(adapter: Box<dyn RadioAdapter>, config: &RadioConfig, was_enabled: Option<bool>) -> Self {
        Self {
            adapter,
            device_name: config.device_name.clone(),
            bonded: config.bonded.clone(),
            baud_rate: config.baud_rate,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            enable_timeout: Duration::from_millis(config.enable_timeout_ms),
            was_enabled_hint: was_enabled,
            enabled_here: false,
            port: None,
        }
    }

    pub fn from_config(config: &RadioConfig, was_enabled: Option<bool>) -> Self {
        Self::new(
            Box::new(RfkillAdapter::new(&config.rfkill_root)),
            config,
            was_enabled,
        )
    }

    /// Último pareado cujo nome termina com o nome do dispositivo.
    fn find_device(&self) -> Result<&BondedDevice, TransportError> {
        if self.bonded.is_empty() {
            return Err(TransportError::NoPairedDevices);
        }
        self.bonded
            .iter()
            .rev()
            .find(|device| device.name.ends_with(&self.device_name))
            .ok_or_else(|| TransportError::DeviceNotFound(self.device_name.clone()))
    }

    fn enable_adapter(&mut self) -> Result<(), TransportError> {
        let was_enabled = match self.was_enabled_hint {
            Some(hint) => hint,
            None => self.adapter.is_enabled()?,
        };
        if was_enabled {
            return Ok(());
        }

        info!("Habilitando adaptador de rádio");
        self.adapter.set_enabled(true)?;
        self.enabled_here = true;

        let adapter = &self.adapter;
        wait_until("adaptador de rádio", self.enable_timeout, ENABLE_POLL, || {
            adapter.is_enabled()
        })
    }

    fn connect(&mut self) -> Result<Box<dyn ByteStream>, TransportError> {
        self.enable_adapter()?;

        let device = self.find_device()?;
        info!("Conectando a {} em {}", device.name, device.port);
        let port = serialport::new(&device.port, self.baud_rate)
            .timeout(self.read_timeout)
            .open()?;
        let stream = port.try_clone()?;

        self.port = Some(port);
        Ok(Box::new(stream))
    }

    fn release(&mut self) {
        if self.port.take().is_some() {
            debug!("Porta serial fechada");
        }
        if self.enabled_here {
            self.enabled_here = false;
            info!("Desabilitando adaptador de rádio");
            if let Err(e) = self.adapter.set_enabled(false) {
                warn!("Falha ao desabilitar adaptador: {e}");
            }
        }
    }
}

impl Transport for RadioTransport {
    fn label(&self) -> &str {
        &self.device_name
    }

    fn medium(&self) -> Medium {
        Medium::Radio
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn initiate(&mut self) -> Result<Box<dyn ByteStream>, TransportError> {
        match self.connect() {
            Ok(stream) => Ok(stream),
            Err(e) => {
                warn!("Falha ao conectar pelo rádio: {e}");
                self.release();
                Err(e)
            }
        }
    }

    fn reconnect(&mut self) -> Result<Option<Box<dyn ByteStream>>, TransportError> {
        Ok(None)
    }

    fn destroy(&mut self) {
        self.release();
    }
}
