// Copyright 2025-2026 CEMAXECUTER LLC

//! JSON control protocol.
//!
//! Requests are single JSON objects `{"cmd": "...", "req_id": "...", ...}`.
//! Every request gets one JSON response echoing `req_id`. Commands map onto
//! atomic stores into [`VisualConfig`]; running stages pick them up on their
//! next invocation.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{json, Value};
use sv_visual::{ConfigSnapshot, VisualConfig};

pub const MIN_FFT_SIZE: usize = 16;
pub const MAX_FFT_SIZE: usize = 65536;
pub const MAX_LINES_PER_SECOND: i64 = 1000;

/// Commands accepted from the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetCenterFreq { freq: i64 },
    SetBandwidth { bandwidth: u64 },
    SetFftSize { size: usize },
    SetLinesPerSecond { lps: i32 },
    SetView { view: bool },
    SetAverageRate { rate: f32 },
    GetStatus,
    /// End the capture; the pipeline drains and exits.
    Stop,
}

/// A parsed request: the command (or why it was rejected) plus its id.
#[derive(Debug)]
pub struct ControlRequest {
    pub req_id: Option<String>,
    pub command: Result<ControlCommand, String>,
}

/// Counters reported by `get_status` and the heartbeat.
/// Updated by the pipeline's stats thread, read by control threads.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub source: String,
    pub sample_rate: u32,
    pub chunks_in: u64,
    pub waterfall_lines: u64,
    pub spectrum_frames: u64,
    pub stalls: u64,
    /// Set by a `stop` request, polled by the pipeline
    pub stop_requested: bool,
    started: Instant,
}

impl PipelineStatus {
    pub fn new(source: &str, sample_rate: u32) -> Self {
        Self {
            source: source.to_string(),
            sample_rate,
            chunks_in: 0,
            waterfall_lines: 0,
            spectrum_frames: 0,
            stalls: 0,
            stop_requested: false,
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

fn field<'a>(root: &'a Value, name: &str) -> Result<&'a Value, String> {
    root.get(name).ok_or_else(|| format!("missing {}", name))
}

fn integer(root: &Value, name: &str) -> Result<i64, String> {
    let v = field(root, name)?;
    if let Some(i) = v.as_i64() {
        return Ok(i);
    }
    match v.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(format!("{} must be an integer", name)),
    }
}

fn parse_root(root: &Value) -> Result<ControlCommand, String> {
    let cmd = root
        .get("cmd")
        .and_then(|c| c.as_str())
        .ok_or_else(|| "missing cmd".to_string())?;

    match cmd {
        "set_center_freq" => Ok(ControlCommand::SetCenterFreq {
            freq: integer(root, "freq")?,
        }),
        "set_bandwidth" => {
            let bandwidth = integer(root, "bandwidth")?;
            if bandwidth < 0 {
                return Err("bandwidth must not be negative".into());
            }
            Ok(ControlCommand::SetBandwidth {
                bandwidth: bandwidth as u64,
            })
        }
        "set_fft_size" => {
            let size = integer(root, "size")?;
            if size < MIN_FFT_SIZE as i64 || size > MAX_FFT_SIZE as i64 || !(size as u64).is_power_of_two() {
                return Err(format!(
                    "size must be a power of two ({} to {})",
                    MIN_FFT_SIZE, MAX_FFT_SIZE
                ));
            }
            Ok(ControlCommand::SetFftSize {
                size: size as usize,
            })
        }
        "set_lines_per_second" => {
            let lps = integer(root, "lps")?;
            if !(0..=MAX_LINES_PER_SECOND).contains(&lps) {
                return Err(format!("lps out of range (0 to {})", MAX_LINES_PER_SECOND));
            }
            Ok(ControlCommand::SetLinesPerSecond { lps: lps as i32 })
        }
        "set_view" => {
            let view = field(root, "view")?
                .as_bool()
                .ok_or_else(|| "view must be true or false".to_string())?;
            Ok(ControlCommand::SetView { view })
        }
        "set_average_rate" => {
            let rate = field(root, "rate")?
                .as_f64()
                .ok_or_else(|| "rate must be a number".to_string())?;
            if !(rate > 0.0 && rate <= 1.0) {
                return Err("rate out of range (0 to 1]".into());
            }
            Ok(ControlCommand::SetAverageRate { rate: rate as f32 })
        }
        "get_status" => Ok(ControlCommand::GetStatus),
        "stop" => Ok(ControlCommand::Stop),
        other => Err(format!("unknown command: {}", other)),
    }
}

/// Parse one request, keeping the `req_id` even when the command is invalid.
pub fn parse_request(data: &[u8]) -> ControlRequest {
    let root: Value = match serde_json::from_slice(data) {
        Ok(v) => v,
        Err(e) => {
            return ControlRequest {
                req_id: None,
                command: Err(format!("invalid JSON: {}", e)),
            }
        }
    };
    let req_id = root
        .get("req_id")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string());
    let command = if root.is_object() {
        parse_root(&root)
    } else {
        Err("request must be a JSON object".into())
    };
    ControlRequest { req_id, command }
}

pub fn parse_command(data: &[u8]) -> Result<ControlCommand, String> {
    parse_request(data).command
}

/// Store the command's setting. Returns a human-readable confirmation.
pub fn apply_command(config: &VisualConfig, cmd: &ControlCommand) -> String {
    match *cmd {
        ControlCommand::SetCenterFreq { freq } => {
            config.set_center_frequency(freq);
            format!("center frequency set to {} Hz", freq)
        }
        ControlCommand::SetBandwidth { bandwidth } => {
            config.set_bandwidth(bandwidth);
            if bandwidth == 0 {
                "bandwidth set to full input rate".to_string()
            } else {
                format!("bandwidth set to {} Hz", bandwidth)
            }
        }
        ControlCommand::SetFftSize { size } => {
            config.set_fft_size(size);
            format!("FFT size set to {}", size)
        }
        ControlCommand::SetLinesPerSecond { lps } => {
            config.set_lines_per_second(lps);
            format!("lines per second set to {}", lps)
        }
        ControlCommand::SetView { view } => {
            config.set_view(view);
            let state = if view { "enabled" } else { "disabled" };
            format!("view {}", state)
        }
        ControlCommand::SetAverageRate { rate } => {
            config.set_average_rate(rate);
            format!("average rate set to {}", rate)
        }
        ControlCommand::GetStatus => "status".to_string(),
        ControlCommand::Stop => "stopping".to_string(),
    }
}

/// Status object: current settings plus pipeline counters.
pub fn status_json(kind: &str, config: &ConfigSnapshot, status: &PipelineStatus) -> Value {
    json!({
        "type": kind,
        "source": status.source,
        "sample_rate": status.sample_rate,
        "center_freq": config.center_frequency,
        "bandwidth": config.bandwidth,
        "fft_size": config.fft_size,
        "lps": config.lines_per_second,
        "view": config.is_view,
        "average_rate": config.average_rate,
        "chunks_in": status.chunks_in,
        "waterfall_lines": status.waterfall_lines,
        "spectrum_frames": status.spectrum_frames,
        "stalls": status.stalls,
        "uptime": status.uptime_secs(),
    })
}

pub fn response_json(req_id: Option<&str>, ok: bool, message: &str) -> Value {
    let mut resp = json!({
        "type": "response",
        "status": if ok { "ok" } else { "error" },
        "message": message,
    });
    if let Some(id) = req_id {
        resp["req_id"] = json!(id);
    }
    resp
}

/// Parse, apply and answer one request.
pub fn handle_message(config: &VisualConfig, status: &Mutex<PipelineStatus>, data: &[u8]) -> Value {
    let request = parse_request(data);
    let req_id = request.req_id.as_deref();

    match request.command {
        Ok(ControlCommand::GetStatus) => {
            let status = status.lock().unwrap_or_else(|e| e.into_inner());
            let mut resp = status_json("status", &config.snapshot(), &status);
            if let Some(id) = req_id {
                resp["req_id"] = json!(id);
            }
            resp
        }
        Ok(ControlCommand::Stop) => {
            status.lock().unwrap_or_else(|e| e.into_inner()).stop_requested = true;
            log::info!("control: stop requested");
            response_json(req_id, true, &apply_command(config, &ControlCommand::Stop))
        }
        Ok(cmd) => {
            let message = apply_command(config, &cmd);
            log::info!("control: {}", message);
            response_json(req_id, true, &message)
        }
        Err(e) => {
            log::warn!("control: rejected request: {}", e);
            response_json(req_id, false, &e)
        }
    }
}

/// Answer newline-delimited requests from `reader` until EOF.
///
/// Blank lines are skipped. Returns the number of requests handled.
pub fn serve_lines<R: BufRead, W: Write>(
    config: &VisualConfig,
    status: &Mutex<PipelineStatus>,
    reader: R,
    mut writer: W,
) -> io::Result<u64> {
    let mut handled = 0;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let resp = handle_message(config, status, line.as_bytes());
        writeln!(writer, "{}", resp)?;
        writer.flush()?;
        handled += 1;
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<ControlCommand, String> {
        parse_command(s.as_bytes())
    }

    #[test]
    fn test_parse_valid_commands() {
        assert_eq!(
            parse(r#"{"cmd":"set_center_freq","freq":-1500}"#),
            Ok(ControlCommand::SetCenterFreq { freq: -1500 })
        );
        assert_eq!(
            parse(r#"{"cmd":"set_center_freq","freq":433920000.0}"#),
            Ok(ControlCommand::SetCenterFreq { freq: 433_920_000 })
        );
        assert_eq!(
            parse(r#"{"cmd":"set_bandwidth","bandwidth":200000}"#),
            Ok(ControlCommand::SetBandwidth { bandwidth: 200_000 })
        );
        assert_eq!(
            parse(r#"{"cmd":"set_fft_size","size":4096}"#),
            Ok(ControlCommand::SetFftSize { size: 4096 })
        );
        assert_eq!(
            parse(r#"{"cmd":"set_lines_per_second","lps":0}"#),
            Ok(ControlCommand::SetLinesPerSecond { lps: 0 })
        );
        assert_eq!(
            parse(r#"{"cmd":"set_view","view":false}"#),
            Ok(ControlCommand::SetView { view: false })
        );
        assert_eq!(
            parse(r#"{"cmd":"set_average_rate","rate":1}"#),
            Ok(ControlCommand::SetAverageRate { rate: 1.0 })
        );
        assert_eq!(parse(r#"{"cmd":"get_status"}"#), Ok(ControlCommand::GetStatus));
        assert_eq!(parse(r#"{"cmd":"stop"}"#), Ok(ControlCommand::Stop));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        for bad in [
            r#"{"cmd":"set_fft_size","size":1000}"#,
            r#"{"cmd":"set_fft_size","size":8}"#,
            r#"{"cmd":"set_fft_size","size":131072}"#,
            r#"{"cmd":"set_lines_per_second","lps":1001}"#,
            r#"{"cmd":"set_lines_per_second","lps":-1}"#,
            r#"{"cmd":"set_average_rate","rate":0}"#,
            r#"{"cmd":"set_average_rate","rate":1.5}"#,
            r#"{"cmd":"set_bandwidth","bandwidth":-1}"#,
            r#"{"cmd":"set_center_freq","freq":1.5}"#,
            r#"{"cmd":"set_center_freq"}"#,
            r#"{"cmd":"set_view","view":"yes"}"#,
            r#"{"cmd":"reboot"}"#,
            r#"{"freq":1}"#,
            r#"[1,2]"#,
            "not json",
        ] {
            assert!(parse(bad).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_req_id_kept_on_error() {
        let req = parse_request(br#"{"cmd":"set_fft_size","size":3,"req_id":"r7"}"#);
        assert_eq!(req.req_id.as_deref(), Some("r7"));
        assert!(req.command.is_err());
    }

    #[test]
    fn test_apply_updates_config() {
        let cfg = VisualConfig::new();
        apply_command(&cfg, &ControlCommand::SetCenterFreq { freq: 99_500_000 });
        apply_command(&cfg, &ControlCommand::SetBandwidth { bandwidth: 48_000 });
        apply_command(&cfg, &ControlCommand::SetFftSize { size: 512 });
        apply_command(&cfg, &ControlCommand::SetLinesPerSecond { lps: 5 });
        apply_command(&cfg, &ControlCommand::SetView { view: false });
        apply_command(&cfg, &ControlCommand::SetAverageRate { rate: 0.25 });

        let s = cfg.snapshot();
        assert_eq!(s.center_frequency, 99_500_000);
        assert_eq!(s.bandwidth, 48_000);
        assert_eq!(s.fft_size, 512);
        assert_eq!(s.lines_per_second, 5);
        assert!(!s.is_view);
        assert_eq!(s.average_rate, 0.25);
    }

    #[test]
    fn test_handle_message_responses() {
        let cfg = VisualConfig::new();
        let status = Mutex::new(PipelineStatus::new("tone", 2_000_000));

        let resp = handle_message(&cfg, &status, br#"{"cmd":"set_lines_per_second","lps":12,"req_id":"a"}"#);
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["req_id"], "a");
        assert_eq!(cfg.lines_per_second(), 12);

        let resp = handle_message(&cfg, &status, br#"{"cmd":"nope"}"#);
        assert_eq!(resp["status"], "error");
        assert!(resp.get("req_id").is_none());

        status.lock().unwrap().spectrum_frames = 42;
        let resp = handle_message(&cfg, &status, br#"{"cmd":"get_status","req_id":"s"}"#);
        assert_eq!(resp["type"], "status");
        assert_eq!(resp["lps"], 12);
        assert_eq!(resp["spectrum_frames"], 42);
        assert_eq!(resp["sample_rate"], 2_000_000);
        assert_eq!(resp["req_id"], "s");
        assert!(!status.lock().unwrap().stop_requested);

        let resp = handle_message(&cfg, &status, br#"{"cmd":"stop","req_id":"q"}"#);
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["message"], "stopping");
        assert!(status.lock().unwrap().stop_requested);
    }

    #[test]
    fn test_serve_lines() {
        let cfg = VisualConfig::new();
        let status = Mutex::new(PipelineStatus::new("file", 48_000));
        let input = "{\"cmd\":\"set_view\",\"view\":false}\n\n{\"cmd\":\"get_status\"}\n";
        let mut out = Vec::new();

        let n = serve_lines(&cfg, &status, input.as_bytes(), &mut out).unwrap();
        assert_eq!(n, 2);
        assert!(!cfg.is_view());

        let text = String::from_utf8(out).unwrap();
        let replies: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies[0]["status"], "ok");
        assert_eq!(replies[1]["view"], false);
    }
}
