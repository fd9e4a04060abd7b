//! Protocolo textual do dispositivo.
//!
//! O host envia uma linha fixa de requisição e o dispositivo responde com
//! uma ou mais linhas embrulhadas num envelope mínimo tipo HTML:
//!
//! ```text
//! GET / HTTP/1.0\r\n                                   → requisição
//! <html>B=100 R=96 E=1 T=25.3C H=37.7%</html>\r\n      ← payload
//! \r\n                                                 ← fim da resposta
//! ```
//!
//! - Payload = texto entre o primeiro `>` e o `<` seguinte da linha
//! - Tokens `<chave><separador><número>[unidade]` separados por espaço
//! - `T` e `H` trazem um caractere de unidade no final, que é descartado
//! - A primeira linha vazia encerra o processamento da resposta inteira

use crate::types::{RawSample, SampleKey};

/// Linha de requisição enviada a cada ciclo.
pub const REQUEST_LINE: &str = "GET / HTTP/1.0\r\n";

/// Erros de parsing de uma resposta.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Token inválido: {0:?}")]
    MalformedToken(String),

    #[error("Valor numérico inválido {text:?} no token {token:?}")]
    MalformedNumber { token: String, text: String },
}

/// Extrai o payload de uma linha do envelope.
///
/// Sem `>` o payload começa no início da linha; sem `<` ele vai até o fim.
pub fn payload_of(line: &str) -> &str {
    let start = line.find('>').map_or(0, |i| i + 1);
    let rest = &line[start..];
    match rest.find('<') {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Converte um token `K=123[u]` em [`RawSample`].
pub fn parse_token(token: &str) -> Result<RawSample, ProtocolError> {
    let mut chars = token.chars();
    let (Some(key), Some(separator)) = (chars.next(), chars.next()) else {
        return Err(ProtocolError::MalformedToken(token.to_string()));
    };

    let mut numeric = &token[key.len_utf8() + separator.len_utf8()..];
    if SampleKey::has_unit_suffix(key) {
        let Some((unit_at, _)) = numeric.char_indices().next_back() else {
            return Err(ProtocolError::MalformedToken(token.to_string()));
        };
        numeric = &numeric[..unit_at];
    }

    let value = numeric
        .parse::<f64>()
        .map_err(|_| ProtocolError::MalformedNumber {
            token: token.to_string(),
            text: numeric.to_string(),
        })?;

    Ok(RawSample::new(key, value))
}

/// Iterador de amostras sobre as linhas de uma resposta.
///
/// Entrega as amostras na ordem dos tokens. Para na primeira linha vazia
/// (ou de payload vazio) e logo após o primeiro erro: o restante do ciclo
/// não é processado.
pub struct Samples<'a, S: AsRef<str>> {
    lines: std::slice::Iter<'a, S>,
    tokens: std::str::SplitWhitespace<'a>,
    done: bool,
}

/// Percorre `lines` produzindo amostras (ver [`Samples`]).
pub fn samples<S: AsRef<str>>(lines: &[S]) -> Samples<'_, S> {
    Samples {
        lines: lines.iter(),
        tokens: "".split_whitespace(),
        done: false,
    }
}

impl<'a, S: AsRef<str>> Iterator for Samples<'a, S> {
    type Item = Result<RawSample, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(token) = self.tokens.next() {
                let parsed = parse_token(token);
                if parsed.is_err() {
                    self.done = true;
                }
                return Some(parsed);
            }

            let Some(line) = self.lines.next() else {
                self.done = true;
                return None;
            };

            let line: &'a str = line.as_ref();
            let payload = payload_of(line);
            if line.is_empty() || payload.trim().is_empty() {
                // Corte da resposta inteira, não só desta linha
                self.done = true;
                return None;
            }
            self.tokens = payload.split_whitespace();
        }
    }
}

/// Versão coletada de [`samples`]: falha no primeiro token inválido.
pub fn parse_response<S: AsRef<str>>(lines: &[S]) -> Result<Vec<RawSample>, ProtocolError> {
    samples(lines).collect()
}

// ──────────────────────────────────────────────
// Lado do dispositivo (simulador / link sintético)
// ──────────────────────────────────────────────

/// Formata uma amostra como token do fio, com unidade para `T`/`H`.
pub fn format_token(sample: &RawSample) -> String {
    let unit = if SampleKey::has_unit_suffix(sample.key) {
        SampleKey::from_code(sample.key).map_or("", SampleKey::unit)
    } else {
        ""
    };
    format!("{}={}{}", sample.key, sample.value, unit)
}

/// Junta as amostras num payload separado por espaços.
pub fn format_payload(samples: &[RawSample]) -> String {
    samples.iter().map(format_token).collect::<Vec<_>>().join(" ")
}

/// Embrulha o payload no envelope e adiciona a linha vazia final.
pub fn render_response(payload: &str) -> String {
    format!("<html>{payload}</html>\r\n\r\n")
}

/// `true` se a linha recebida pelo dispositivo é uma requisição válida.
pub fn is_request(line: &str) -> bool {
    line.trim_end() == REQUEST_LINE.trim_end()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE_RESPONSE: &str = "B=100 R=96 E=1 T=25.3C H=37.7%";

    #[test]
    fn parses_reference_response_in_token_order() {
        let samples = parse_response(&[FAKE_RESPONSE]).unwrap();
        assert_eq!(
            samples,
            vec![
                RawSample::new('B', 100.0),
                RawSample::new('R', 96.0),
                RawSample::new('E', 1.0),
                RawSample::new('T', 25.3),
                RawSample::new('H', 37.7),
            ]
        );
    }

    #[test]
    fn envelope_payload_is_between_delimiters() {
        assert_eq!(payload_of("<html>T=1C</html>"), "T=1C");
        assert_eq!(payload_of("<p>B=5"), "B=5");
        assert_eq!(payload_of("B=5</p>"), "B=5");
        assert_eq!(payload_of("B=5"), "B=5");
        assert_eq!(payload_of("<html></html>"), "");
    }

    #[test]
    fn empty_line_truncates_whole_response() {
        let lines = ["<html>B=1 R=2</html>", "", "<html>T=3C</html>"];
        let samples = parse_response(&lines).unwrap();
        assert_eq!(samples, vec![RawSample::new('B', 1.0), RawSample::new('R', 2.0)]);
    }

    #[test]
    fn empty_payload_truncates_whole_response() {
        let lines = ["<html></html>", "<html>T=3C</html>"];
        assert!(parse_response(&lines).unwrap().is_empty());
    }

    #[test]
    fn multiple_lines_are_concatenated_in_order() {
        let lines = ["<html>B=1</html>", "<html>T=20.5C H=40%</html>"];
        let samples = parse_response(&lines).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2], RawSample::new('H', 40.0));
    }

    #[test]
    fn unit_suffix_only_stripped_for_temperature_and_humidity() {
        assert_eq!(parse_token("T=25.3C").unwrap().value, 25.3);
        assert_eq!(parse_token("H=37.7%").unwrap().value, 37.7);
        // Para outras chaves o sufixo faz parte do número → inválido
        assert!(matches!(
            parse_token("B=100s"),
            Err(ProtocolError::MalformedNumber { .. })
        ));
    }

    #[test]
    fn separator_can_be_any_character() {
        assert_eq!(parse_token("R:96").unwrap(), RawSample::new('R', 96.0));
    }

    #[test]
    fn malformed_number_stops_the_cycle() {
        let lines = ["<html>B=1 R=x2 T=20C</html>"];
        let collected: Vec<_> = samples(&lines).collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0], Ok(RawSample::new('B', 1.0)));
        assert_eq!(
            collected[1],
            Err(ProtocolError::MalformedNumber {
                token: "R=x2".into(),
                text: "x2".into(),
            })
        );
        assert!(parse_response(&lines).is_err());
    }

    #[test]
    fn short_tokens_are_rejected() {
        assert!(matches!(parse_token("B"), Err(ProtocolError::MalformedToken(_))));
        assert!(matches!(parse_token("T="), Err(ProtocolError::MalformedToken(_))));
        assert!(matches!(
            parse_token("B="),
            Err(ProtocolError::MalformedNumber { .. })
        ));
    }

    #[test]
    fn rendered_response_parses_back() {
        let samples = vec![
            RawSample::new('B', 3600.0),
            RawSample::new('R', 3590.0),
            RawSample::new('E', 0.0),
            RawSample::new('T', 21.5),
            RawSample::new('H', 45.0),
        ];
        let payload = format_payload(&samples);
        assert_eq!(payload, "B=3600 R=3590 E=0 T=21.5C H=45%");

        let response = render_response(&payload);
        let lines: Vec<&str> = response.lines().collect();
        assert_eq!(parse_response(&lines).unwrap(), samples);
    }

    #[test]
    fn request_line_is_recognised() {
        assert!(is_request("GET / HTTP/1.0\r\n"));
        assert!(is_request("GET / HTTP/1.0"));
        assert!(!is_request("POST / HTTP/1.0"));
    }
}
