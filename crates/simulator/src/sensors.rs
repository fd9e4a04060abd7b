//! Sensores do dispositivo simulado, alimentados pelo host via sysinfo.
//!
//! - `B`: uptime do host (s)
//! - `R`: uptime no momento da última leitura dos sensores (s)
//! - `T`: sensor de CPU mais quente (ou deriva simulada se não houver)
//! - `H`: umidade simulada
//! - `E`: 1 quando não há sensor de temperatura real

use iothub_core::types::{RawSample, SampleKey};
use std::time::{Duration, Instant};
use sysinfo::{Components, System};
use tracing::debug;

/// Fonte de amostras do dispositivo simulado.
pub struct DeviceSensors {
    components: Components,
    interval: Duration,
    last_read: Option<Instant>,
    read_uptime: u64,
    temperature: f64,
    humidity: f64,
    has_sensor: bool,
    phase: f64,
}

impl DeviceSensors {
    pub fn new(interval: Duration) -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
            interval,
            last_read: None,
            read_uptime: 0,
            temperature: 0.0,
            humidity: 0.0,
            has_sensor: false,
            phase: 0.0,
        }
    }

    /// Amostra completa na ordem do fio (B R E T H).
    ///
    /// Os sensores só são relidos quando o intervalo venceu; entre leituras
    /// apenas `B` avança.
    pub fn sample(&mut self) -> Vec<RawSample> {
        if self.last_read.is_none_or(|at| at.elapsed() >= self.interval) {
            self.refresh();
        }

        vec![
            RawSample::new(SampleKey::BootTime.code(), System::uptime() as f64),
            RawSample::new(SampleKey::ReadTime.code(), self.read_uptime as f64),
            RawSample::new(SampleKey::Error.code(), if self.has_sensor { 0.0 } else { 1.0 }),
            RawSample::new(SampleKey::Temperature.code(), self.temperature),
            RawSample::new(SampleKey::Humidity.code(), self.humidity),
        ]
    }

    fn refresh(&mut self) {
        self.components.refresh(true);
        self.last_read = Some(Instant::now());
        self.read_uptime = System::uptime();
        self.phase += 0.1;

        match hottest_cpu(&self.components) {
            Some(temp) => {
                self.temperature = round1(temp);
                self.has_sensor = true;
            }
            None => {
                self.temperature = simulated_temperature(self.phase);
                self.has_sensor = false;
            }
        }
        self.humidity = simulated_humidity(self.phase);

        debug!(
            "Sensores lidos: T={} H={} (sensor real: {})",
            self.temperature, self.humidity, self.has_sensor
        );
    }
}

/// Rótulos de sensor que indicam temperatura de CPU.
fn is_cpu_label(label: &str) -> bool {
    let label = label.to_lowercase();
    ["cpu", "tctl", "tdie", "package", "core"]
        .iter()
        .any(|hint| label.contains(hint))
}

/// Temperatura mais alta entre os sensores de CPU.
fn hottest_cpu(components: &Components) -> Option<f64> {
    components
        .iter()
        .filter(|comp| is_cpu_label(comp.label()))
        .filter_map(|comp| comp.temperature())
        .filter(|t| *t > 0.0 && *t < 150.0)
        .map(f64::from)
        .reduce(f64::max)
}

fn simulated_temperature(phase: f64) -> f64 {
    round1(22.0 + 3.0 * phase.sin())
}

fn simulated_humidity(phase: f64) -> f64 {
    round1(45.0 + 10.0 * (phase * 0.7).sin())
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_labels() {
        assert!(is_cpu_label("coretemp Package id 0"));
        assert!(is_cpu_label("k10temp Tctl"));
        assert!(is_cpu_label("CPU"));
        assert!(!is_cpu_label("nvme Composite"));
        assert!(!is_cpu_label("acpitz temp1"));
    }

    #[test]
    fn simulated_values_stay_in_range() {
        for step in 0..200 {
            let phase = step as f64 * 0.1;
            let t = simulated_temperature(phase);
            let h = simulated_humidity(phase);
            assert!((19.0..=25.0).contains(&t), "T={t}");
            assert!((35.0..=55.0).contains(&h), "H={h}");
        }
    }

    #[test]
    fn sample_has_wire_order_and_consistent_timers() {
        let mut sensors = DeviceSensors::new(Duration::from_secs(60));
        let samples = sensors.sample();

        let keys: Vec<char> = samples.iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!['B', 'R', 'E', 'T', 'H']);
        assert!(samples[0].value >= samples[1].value);

        // Dentro do intervalo a leitura não é refeita
        let again = sensors.sample();
        assert_eq!(again[1], samples[1]);
        assert_eq!(again[4], samples[4]);
    }
}
