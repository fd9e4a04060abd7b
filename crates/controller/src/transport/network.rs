//! Meio rede: socket TCP até o dispositivo, opcionalmente associando o
//! Wi-Fi ao ponto de acesso dele antes.
//!
//! O dispositivo atende uma requisição por conexão, então cada
//! `reconnect` fecha e reabre o socket.

use super::{ByteStream, Transport, TransportError, wait_until};
use iothub_core::config::{Medium, NetworkConfig};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────
// Link Wi-Fi
// ──────────────────────────────────────────────

/// Gerência do link sem fio até o ponto de acesso do dispositivo.
pub trait WlanLink: Send {
    /// `false` quando o host já está na rede do dispositivo.
    fn is_managed(&self) -> bool {
        true
    }
    fn is_enabled(&self) -> Result<bool, TransportError>;
    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError>;
    /// Nomes dos perfis Wi-Fi configurados no sistema.
    fn profiles(&self) -> Result<Vec<String>, TransportError>;
    fn activate(&self, profile: &str) -> Result<(), TransportError>;
    fn is_online(&self) -> bool;
}

/// Link gerenciado pelo NetworkManager via `nmcli`.
pub struct NmcliLink {
    interface: String,
    sysfs_net: PathBuf,
}

impl NmcliLink {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, TransportError> {
        let command = format!("nmcli {}", args.join(" "));
        debug!("Executando {command}");
        let output = Command::new("nmcli").args(args).output()?;
        if !output.status.success() {
            return Err(TransportError::Command {
                command,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl WlanLink for NmcliLink {
    fn is_enabled(&self) -> Result<bool, TransportError> {
        Ok(self.run(&["radio", "wifi"])?.trim() == "enabled")
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.run(&["radio", "wifi", if enabled { "on" } else { "off" }])
            .map(|_| ())
    }

    fn profiles(&self) -> Result<Vec<String>, TransportError> {
        let listing = self.run(&["-t", "-f", "NAME,TYPE", "connection", "show"])?;
        Ok(parse_wifi_profiles(&listing))
    }

    fn activate(&self, profile: &str) -> Result<(), TransportError> {
        self.run(&["connection", "up", "id", profile]).map(|_| ())
    }

    fn is_online(&self) -> bool {
        let operstate = self.sysfs_net.join(&self.interface).join("operstate");
        std::fs::read_to_string(operstate).is_ok_and(|state| state.trim() == "up")
    }
}

/// Extrai os perfis Wi-Fi da saída `nmcli -t -f NAME,TYPE connection show`.
fn parse_wifi_profiles(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.rsplit_once(':'))
        .filter(|(_, kind)| *kind == "802-11-wireless")
        .map(|(name, _)| name.replace("\\:", ":"))
        .collect()
}

/// Host já associado à rede do dispositivo: nada a gerenciar.
pub struct UnmanagedLink;

impl WlanLink for UnmanagedLink {
    fn is_managed(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> Result<bool, TransportError> {
        Ok(true)
    }

    fn set_enabled(&self, _enabled: bool) -> Result<(), TransportError> {
        Ok(())
    }

    fn profiles(&self) -> Result<Vec<String>, TransportError> {
        Ok(Vec::new())
    }

    fn activate(&self, _profile: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_online(&self) -> bool {
        true
    }
}

// ──────────────────────────────────────────────
// Transporte
// ──────────────────────────────────────────────

/// Resolve `host:port` para o primeiro endereço IPv4.
pub fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(TransportError::InvalidHost(host.to_string()));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::InvalidHost(host.to_string()))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| TransportError::InvalidHost(host.to_string()))
}

/// Transporte TCP até o dispositivo.
pub struct NetworkTransport {
    link: Box<dyn WlanLink>,
    label: String,
    host: String,
    port: u16,
    access_point: String,
    online_timeout: Duration,
    online_poll: Duration,
    connect_timeout: Duration,
    io_timeout: Duration,
    was_enabled_hint: Option<bool>,
    enabled_here: bool,
    addr: Option<SocketAddr>,
    socket: Option<TcpStream>,
}

impl NetworkTransport {
    pub fn new(link: Box<dyn WlanLink>, config: &NetworkConfig, was_enabled: Option<bool>) -> Self {
        Self {
            link,
            label: config.access_point.clone(),
            host: config.host.clone(),
            port: config.port,
            access_point: config.access_point.clone(),
            online_timeout: Duration::from_millis(config.online_timeout_ms),
            online_poll: Duration::from_millis(config.online_poll_ms.max(1)),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms.max(1)),
            io_timeout: Duration::from_millis(config.read_timeout_ms.max(1)),
            was_enabled_hint: was_enabled,
            enabled_here: false,
            addr: None,
            socket: None,
        }
    }

    pub fn from_config(config: &NetworkConfig, was_enabled: Option<bool>) -> Self {
        let link: Box<dyn WlanLink> = if config.manage_link {
            Box::new(NmcliLink::new(&config.interface))
        } else {
            Box::new(UnmanagedLink)
        };
        Self::new(link, config, was_enabled)
    }

    /// Liga o Wi-Fi, associa ao perfil do dispositivo e espera ficar online.
    fn bring_link_up(&mut self) -> Result<(), TransportError> {
        if !self.link.is_managed() {
            return Ok(());
        }

        let was_enabled = match self.was_enabled_hint {
            Some(hint) => hint,
            None => self.link.is_enabled()?,
        };
        if !was_enabled {
            info!("Habilitando Wi-Fi");
            self.link.set_enabled(true)?;
            self.enabled_here = true;
        }

        let profile = self
            .link
            .profiles()?
            .into_iter()
            .find(|name| name.starts_with(&self.access_point))
            .ok_or_else(|| TransportError::ProfileNotFound(self.access_point.clone()))?;
        info!("Associando ao perfil {profile}");
        self.link.activate(&profile)?;

        let link = &self.link;
        wait_until("link Wi-Fi online", self.online_timeout, self.online_poll, || {
            Ok(link.is_online())
        })
    }

    fn open_socket(&mut self, addr: SocketAddr) -> Result<Box<dyn ByteStream>, TransportError> {
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        let _ = stream.set_nodelay(true);

        self.socket = Some(stream.try_clone()?);
        Ok(Box::new(stream))
    }

    fn connect(&mut self) -> Result<Box<dyn ByteStream>, TransportError> {
        let addr = resolve_ipv4(&self.host, self.port)?;
        self.bring_link_up()?;

        info!("Conectando a {addr}");
        let stream = self.open_socket(addr)?;
        self.addr = Some(addr);
        Ok(stream)
    }

    fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            // Interrompe leituras em andamento no clone do poll engine
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Shutdown do socket: {e}");
            }
        }
    }

    fn release(&mut self) {
        self.close_socket();
        self.addr = None;
        if self.enabled_here {
            self.enabled_here = false;
            info!("Desabilitando Wi-Fi");
            if let Err(e) = self.link.set_enabled(false) {
                warn!("Falha ao desabilitar Wi-Fi: {e}");
            }
        }
    }
}

impl Transport for NetworkTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn medium(&self) -> Medium {
        Medium::Network
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn initiate(&mut self) -> Result<Box<dyn ByteStream>, TransportError> {
        match self.connect() {
            Ok(stream) => Ok(stream),
            Err(e) => {
                warn!("Falha ao conectar pela rede: {e}");
                self.release();
                Err(e)
            }
        }
    }

    fn reconnect(&mut self) -> Result<Option<Box<dyn ByteStream>>, TransportError> {
        let Some(addr) = self.addr else {
            return Ok(None);
        };
        self.close_socket();
        debug!("Reabrindo socket para {addr}");
        self.open_socket(addr).map(Some)
    }

    fn destroy(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;

    /// Link falso que registra as chamadas.
    #[derive(Clone, Default)]
    struct FakeLink {
        enabled: Arc<Mutex<bool>>,
        activated: Arc<Mutex<Vec<String>>>,
        profiles: Vec<String>,
        online: bool,
    }

    impl WlanLink for FakeLink {
        fn is_enabled(&self) -> Result<bool, TransportError> {
            Ok(*self.enabled.lock())
        }

        fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
            *self.enabled.lock() = enabled;
            Ok(())
        }

        fn profiles(&self) -> Result<Vec<String>, TransportError> {
            Ok(self.profiles.clone())
        }

        fn activate(&self, profile: &str) -> Result<(), TransportError> {
            self.activated.lock().push(profile.to_string());
            Ok(())
        }

        fn is_online(&self) -> bool {
            self.online
        }
    }

    fn config(port: u16) -> NetworkConfig {
        NetworkConfig {
            port,
            online_timeout_ms: 50,
            online_poll_ms: 10,
            connect_timeout_ms: 500,
            read_timeout_ms: 500,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn rejects_empty_and_non_ipv4_hosts() {
        assert!(matches!(resolve_ipv4("", 80), Err(TransportError::InvalidHost(_))));
        assert!(matches!(resolve_ipv4("   ", 80), Err(TransportError::InvalidHost(_))));
        assert!(matches!(resolve_ipv4("::1", 80), Err(TransportError::InvalidHost(_))));
        assert_eq!(
            resolve_ipv4("192.168.4.1", 80).unwrap(),
            "192.168.4.1:80".parse().unwrap()
        );
    }

    #[test]
    fn invalid_host_fails_before_touching_link() {
        let link = FakeLink::default();
        let mut cfg = config(80);
        cfg.host = String::new();
        let mut transport = NetworkTransport::new(Box::new(link.clone()), &cfg, None);

        assert!(matches!(transport.initiate(), Err(TransportError::InvalidHost(_))));
        assert!(!*link.enabled.lock());
        assert!(link.activated.lock().is_empty());
    }

    #[test]
    fn parses_nmcli_listing() {
        let listing = "IOT_HUB-sala:802-11-wireless\nWired connection 1:802-3-ethernet\nlab\\:5G:802-11-wireless\n";
        assert_eq!(parse_wifi_profiles(listing), vec!["IOT_HUB-sala", "lab:5G"]);
    }

    #[test]
    fn missing_profile_reverts_enable() {
        let link = FakeLink {
            profiles: vec!["CasaWifi".into()],
            online: true,
            ..FakeLink::default()
        };
        let mut transport = NetworkTransport::new(Box::new(link.clone()), &config(80), None);

        assert!(matches!(
            transport.initiate(),
            Err(TransportError::ProfileNotFound(_))
        ));
        assert!(!*link.enabled.lock());
        assert!(!transport.is_connected());
    }

    #[test]
    fn link_never_online_times_out() {
        let link = FakeLink {
            profiles: vec!["IOT_HUB-sala".into()],
            online: false,
            ..FakeLink::default()
        };
        let mut transport = NetworkTransport::new(Box::new(link.clone()), &config(80), None);

        assert!(matches!(transport.initiate(), Err(TransportError::Timeout(_))));
        assert_eq!(*link.activated.lock(), vec!["IOT_HUB-sala".to_string()]);
        assert!(!*link.enabled.lock());
    }

    #[test]
    fn connects_and_reconnect_reopens_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..2 {
                let (socket, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(socket.try_clone().unwrap());
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                seen.push(line);
                let mut socket = socket;
                socket.write_all(b"<html>T=20C</html>\r\n\r\n").unwrap();
            }
            seen
        });

        let link = FakeLink {
            profiles: vec!["IOT_HUB".into()],
            online: true,
            enabled: Arc::new(Mutex::new(true)),
            ..FakeLink::default()
        };
        let mut transport = NetworkTransport::new(Box::new(link.clone()), &config(port), None);

        let mut first = transport.initiate().unwrap();
        assert!(transport.is_connected());
        first.write_all(b"GET / HTTP/1.0\r\n").unwrap();
        let mut buf = [0u8; 9];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"<html>T=2");

        let mut second = transport.reconnect().unwrap().expect("novo stream");
        second.write_all(b"GET / HTTP/1.0\r\n").unwrap();
        second.read_exact(&mut buf).unwrap();

        let seen = server.join().unwrap();
        assert_eq!(seen.len(), 2);

        transport.destroy();
        transport.destroy();
        assert!(!transport.is_connected());
        // Wi-Fi já estava ligado antes: continua ligado
        assert!(*link.enabled.lock());
    }

    #[test]
    fn refused_connection_leaves_nothing_behind() {
        // Porta efêmera liberada logo em seguida: conexão recusada
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut transport = NetworkTransport::from_config(&config(port), None);

        assert!(transport.initiate().is_err());
        assert!(!transport.is_connected());
        assert!(transport.reconnect().unwrap().is_none());
    }
}
