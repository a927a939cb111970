// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs;

use sv_visual::{SampleChunk, SpectrumFrame};

use crate::jsonl::{spectrum_json, waterfall_json};

/// ZMQ publisher for streaming frames to a dashboard.
/// Sensor PUB socket connects out; dashboard SUB socket binds.
pub struct ZmqPublisher {
    socket: zmq::Socket,
    sensor_id: Option<String>,
    _ctx: zmq::Context,
}

impl ZmqPublisher {
    /// Create a new ZMQ PUB socket and connect to the given endpoint.
    /// `curve_keyfile`: path to keyfile with public_key= and secret_key= lines.
    pub fn new(
        endpoint: &str,
        sensor_id: Option<&str>,
        curve_keyfile: Option<&str>,
    ) -> Result<Self, String> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::PUB).map_err(zmq_err("PUB socket"))?;

        // Spectrum frames are large; drop rather than queue for slow subscribers
        socket.set_sndhwm(100).map_err(zmq_err("set_sndhwm"))?;

        if let Some(keyfile) = curve_keyfile {
            let (public_key, secret_key) = parse_curve_keyfile(keyfile)?;
            socket.set_curve_server(true).map_err(zmq_err("curve_server"))?;
            socket
                .set_curve_secretkey(secret_key.as_bytes())
                .map_err(zmq_err("curve_secretkey"))?;
            socket
                .set_curve_publickey(public_key.as_bytes())
                .map_err(zmq_err("curve_publickey"))?;
            log::info!(
                "publisher: CURVE enabled (server key {}...)",
                &public_key[..8.min(public_key.len())]
            );
        }

        socket
            .connect(endpoint)
            .map_err(|e| format!("zmq connect to {}: {}", endpoint, e))?;
        log::info!("publisher: connected to {}", endpoint);

        Ok(Self {
            socket,
            sensor_id: sensor_id.map(|s| s.to_string()),
            _ctx: ctx,
        })
    }

    /// Publish a spectrum frame as JSON on the "spectrum:" topic.
    pub fn send_spectrum(&self, frame: &SpectrumFrame) {
        self.send_json("spectrum:", &spectrum_json(frame));
    }

    /// Publish a waterfall window summary as JSON on the "waterfall:" topic.
    pub fn send_waterfall(&self, chunk: &SampleChunk) {
        self.send_json("waterfall:", &waterfall_json(chunk));
    }

    /// Multipart: topic, [sensor_id], JSON body. Never blocks.
    fn send_json(&self, topic: &str, value: &serde_json::Value) {
        let _ = self.socket.send(topic, zmq::DONTWAIT | zmq::SNDMORE);
        if let Some(ref id) = self.sensor_id {
            let _ = self.socket.send(id.as_bytes(), zmq::DONTWAIT | zmq::SNDMORE);
        }
        let json_bytes = value.to_string();
        let _ = self.socket.send(json_bytes.as_bytes(), zmq::DONTWAIT);
    }
}

/// Map a zmq error to the string error used by the socket constructors.
pub(crate) fn zmq_err(what: &'static str) -> impl Fn(zmq::Error) -> String {
    move |e| format!("zmq {}: {}", what, e)
}

/// Parse a CurveZMQ keyfile (public_key=... and secret_key=... lines).
pub fn parse_curve_keyfile(path: &str) -> Result<(String, String), String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read curve keyfile {}: {}", path, e))?;
    parse_curve_keys(&content).ok_or_else(|| format!("failed to parse curve keys from {}", path))
}

fn parse_curve_keys(content: &str) -> Option<(String, String)> {
    let mut public_key = None;
    let mut secret_key = None;

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        // Z85-encoded keys are 40 characters
        if let Some(key) = line.strip_prefix("public_key=") {
            if key.len() >= 40 {
                public_key = Some(key[..40].to_string());
            }
        } else if let Some(key) = line.strip_prefix("secret_key=") {
            if key.len() >= 40 {
                secret_key = Some(key[..40].to_string());
            }
        }
    }

    Some((public_key?, secret_key?))
}

/// Derive control endpoint from data endpoint (port + 1).
pub fn derive_control_endpoint(data_endpoint: &str) -> String {
    if let Some(colon_pos) = data_endpoint.rfind(':') {
        let prefix = &data_endpoint[..=colon_pos];
        if let Ok(port) = data_endpoint[colon_pos + 1..].parse::<u16>() {
            if let Some(next) = port.checked_add(1) {
                return format!("{}{}", prefix, next);
            }
        }
    }
    data_endpoint.to_string()
}
