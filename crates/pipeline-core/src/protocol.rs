//! Wire envelope for the message service.
//!
//! A persistent connection transports tagged JSON envelopes in both
//! directions. The client sends one `run` whose payload is the pipeline
//! YAML; the server streams `stdout`/`stderr` back and finishes with
//! `done` (empty payload, or a logical error) or `error`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Run,
    Log,
    Stdout,
    Stderr,
    Done,
    Error,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvelopeKind::Run => "run",
            EnvelopeKind::Log => "log",
            EnvelopeKind::Stdout => "stdout",
            EnvelopeKind::Stderr => "stderr",
            EnvelopeKind::Done => "done",
            EnvelopeKind::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub payload: String,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn run(yaml: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Run, yaml)
    }

    pub fn stdout(chunk: &[u8]) -> Self {
        Self::new(EnvelopeKind::Stdout, String::from_utf8_lossy(chunk))
    }

    pub fn stderr(chunk: &[u8]) -> Self {
        Self::new(EnvelopeKind::Stderr, String::from_utf8_lossy(chunk))
    }

    pub fn done(payload: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Done, payload)
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::new(EnvelopeKind::Error, message.to_string())
    }

    pub fn encode(&self) -> String {
        // Both fields are plain strings; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(raw)
            .map_err(|err| crate::Error::Decode(format!("invalid envelope: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let envelope = Envelope::run("name: demo");
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded.kind, EnvelopeKind::Run);
        assert_eq!(decoded.payload, "name: demo");
    }

    #[test]
    fn kind_is_lowercase_on_the_wire() {
        let raw = Envelope::done("").encode();
        assert!(raw.contains(r#""type":"done""#));
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let err = Envelope::decode(r#"{"type":"shrug","payload":""}"#).unwrap_err();
        assert!(matches!(err, crate::Error::Decode(_)));
    }
}
