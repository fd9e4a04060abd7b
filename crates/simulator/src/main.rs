//! # IoT Hub Simulator
//!
//! Dispositivo simulado que fala o protocolo do IoT Hub via TCP, com
//! valores vindos dos sensores do host.
//!
//! ## Uso
//! ```bash
//! iothub-sim                     # porta do config.toml
//! iothub-sim --port 9000         # sobrescreve a porta
//! iothub-sim --keep-alive        # mantém a conexão entre requisições
//! ```

mod sensors;

use clap::Parser;
use iothub_core::config::AppConfig;
use iothub_core::protocol::{format_payload, is_request, render_response};
use parking_lot::Mutex;
use sensors::DeviceSensors;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "iothub-sim", version, about = "Dispositivo IoT Hub simulado")]
struct Args {
    /// Caminho do config.toml (padrão: ao lado do executável)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Porta TCP
    #[arg(short, long)]
    port: Option<u16>,

    /// Mantém a conexão aberta entre requisições
    #[arg(long)]
    keep_alive: bool,
}

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    // ── Carregar config ──
    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    // Flags da linha de comando têm prioridade sobre o arquivo
    let mut sim_cfg = config.simulator;
    if let Some(port) = args.port {
        sim_cfg.port = port;
    }
    sim_cfg.keep_alive |= args.keep_alive;

    let errors = sim_cfg.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração inválida: {e}");
        }
        return ExitCode::FAILURE;
    }
    let port = sim_cfg.port;
    let keep_alive = sim_cfg.keep_alive;
    let bind_ip = if sim_cfg.bind_ip.is_empty() {
        "0.0.0.0".to_string()
    } else {
        sim_cfg.bind_ip.clone()
    };
    let bind_addr = format!("{bind_ip}:{port}");

    // ── Sensores ──
    let sensors = Arc::new(Mutex::new(DeviceSensors::new(sim_cfg.sensor_interval())));
    info!("Sensores inicializados");

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   IOT HUB SIMULATOR – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Endereço:   {bind_addr}");
    println!("  Conexão:    {}", if keep_alive { "persistente" } else { "uma requisição" });
    println!("  Sensores:   {:.1}s", sim_cfg.sensor_interval_secs);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    loop {
        match TcpListener::bind(&bind_addr) {
            Ok(listener) => {
                info!("Simulador escutando em {bind_addr}");
                accept_loop(&listener, &sensors, keep_alive);
            }
            Err(e) => {
                error!("Falha ao bind em {bind_addr}: {e}. Tentando novamente em 2s...");
                std::thread::sleep(Duration::from_secs(2));
            }
        }
    }
}

fn accept_loop(listener: &TcpListener, sensors: &Arc<Mutex<DeviceSensors>>, keep_alive: bool) {
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Erro ao aceitar conexão: {e}");
                continue;
            }
        };

        let sensors = Arc::clone(sensors);
        let spawned = std::thread::Builder::new()
            .name("sim-client".into())
            .spawn(move || {
                if let Err(e) = handle_client(stream, &sensors, keep_alive) {
                    debug!("Conexão encerrada com erro: {e}");
                }
            });
        if let Err(e) = spawned {
            error!("Falha ao criar thread de cliente: {e}");
        }
    }
}

fn handle_client(
    stream: TcpStream,
    sensors: &Mutex<DeviceSensors>,
    keep_alive: bool,
) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    debug!("Cliente conectado: {peer}");

    let reader = BufReader::new(stream.try_clone()?);
    let answered = serve(reader, stream, sensors, keep_alive)?;

    debug!("Cliente {peer} desconectado após {answered} respostas");
    Ok(())
}

/// Responde cada linha de requisição com o envelope e as amostras atuais.
///
/// Sem `keep_alive` para após a primeira resposta (estilo HTTP/1.0).
fn serve<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    sensors: &Mutex<DeviceSensors>,
    keep_alive: bool,
) -> io::Result<usize> {
    let mut answered = 0;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if !is_request(&line) {
            debug!("Linha ignorada: {:?}", line.trim_end());
            continue;
        }

        let payload = format_payload(&sensors.lock().sample());
        writer.write_all(render_response(&payload).as_bytes())?;
        writer.flush()?;
        answered += 1;
        info!("→ {payload}");

        if !keep_alive {
            break;
        }
    }

    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iothub_core::protocol::parse_response;
    use std::io::Cursor;

    fn sensors() -> Mutex<DeviceSensors> {
        Mutex::new(DeviceSensors::new(Duration::from_secs(60)))
    }

    fn response_lines(output: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(output)
            .split("\r\n")
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn answers_one_request_then_stops() {
        let sensors = sensors();
        let input = Cursor::new(b"GET / HTTP/1.0\r\nGET / HTTP/1.0\r\n".to_vec());
        let mut output = Vec::new();

        let answered = serve(input, &mut output, &sensors, false).unwrap();
        assert_eq!(answered, 1);

        let lines = response_lines(&output);
        let samples = parse_response(&lines).unwrap();
        let keys: Vec<char> = samples.iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!['B', 'R', 'E', 'T', 'H']);
    }

    #[test]
    fn keep_alive_answers_every_request() {
        let sensors = sensors();
        let input = Cursor::new(b"GET / HTTP/1.0\r\nhello\r\nGET / HTTP/1.0\r\n".to_vec());
        let mut output = Vec::new();

        let answered = serve(input, &mut output, &sensors, true).unwrap();
        assert_eq!(answered, 2);
        assert_eq!(String::from_utf8_lossy(&output).matches("<html>").count(), 2);
    }

    #[test]
    fn ignores_non_requests() {
        let sensors = sensors();
        let input = Cursor::new(b"POST / HTTP/1.0\r\n".to_vec());
        let mut output = Vec::new();

        assert_eq!(serve(input, &mut output, &sensors, false).unwrap(), 0);
        assert!(output.is_empty());
    }
}
