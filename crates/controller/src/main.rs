//! # IoT Hub Controller
//!
//! Sessão supervisionada com o dispositivo de telemetria por rádio
//! (RFCOMM), rede (TCP) ou meio sintético. Interpreta as amostras e
//! imprime o estado no console.
//!
//! ## Uso
//! ```bash
//! iothub                          # meio do config.toml
//! iothub --medium network         # sobrescreve o meio
//! iothub --one-shot --json        # uma leitura, registros em JSON
//! ```

use clap::Parser;
use iothub_controller::console::{self, Console};
use iothub_controller::Session;
use iothub_core::config::{AppConfig, Medium};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "iothub", version, about = "Coleta telemetria de um dispositivo IoT Hub")]
struct Args {
    /// Caminho do config.toml (padrão: ao lado do executável)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Meio de transporte: radio, network ou synthetic
    #[arg(short, long)]
    medium: Option<Medium>,

    /// Uma única leitura e encerra
    #[arg(long)]
    one_shot: bool,

    /// Imprime cada registro recebido em JSON
    #[arg(long)]
    json: bool,

    /// Reconecta automaticamente após falhas
    #[arg(long)]
    reattach: bool,
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

    // ── Config ──
    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    // Flags da linha de comando têm prioridade sobre o arquivo
    if let Some(medium) = args.medium {
        config.controller.medium = medium;
    }
    config.controller.one_shot |= args.one_shot;
    config.controller.auto_reattach |= args.reattach;

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração inválida: {e}");
        }
        return ExitCode::FAILURE;
    }

    let controller = config.controller;
    let mut console = Console::new(&controller, args.json);

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   IOT HUB CONTROLLER");
    println!("══════════════════════════════════════════════");
    println!("  Meio:      {}", controller.medium);
    println!("  Polling:   {} ms", controller.poll_period_ms);
    println!("  Watchdog:  {} ms", controller.watchdog_timeout_ms);
    println!("  Modo:      {}", if console.is_one_shot() { "one-shot" } else { "contínuo" });
    println!("══════════════════════════════════════════════");
    println!();

    // ── Sessão ──
    let (tx, rx) = crossbeam_channel::unbounded();
    let session = Session::new(controller, tx);

    let ok = console::run(&session, &rx, &mut console);
    drop(session);

    if ok {
        info!("Encerrado");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
