// Copyright 2025-2026 CEMAXECUTER LLC

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sv_visual::VisualConfig;

use crate::command::{handle_message, status_json, PipelineStatus};
use crate::zmq_pub::{parse_curve_keyfile, zmq_err};

const HEARTBEAT_SECS: u64 = 5;

/// Control client: DEALER socket connecting to a dashboard ROUTER.
///
/// Applies commands straight to the shared config and answers each one.
/// Sends a heartbeat with the current status every few seconds.
pub struct ControlClient {
    socket: zmq::Socket,
    _ctx: zmq::Context,
    config: Arc<VisualConfig>,
    status: Arc<Mutex<PipelineStatus>>,
    running: Arc<AtomicBool>,
}

impl ControlClient {
    /// Create a new DEALER socket and connect to the control endpoint.
    pub fn new(
        control_endpoint: &str,
        sensor_id: &str,
        curve_keyfile: Option<&str>,
        config: Arc<VisualConfig>,
        status: Arc<Mutex<PipelineStatus>>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, String> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::DEALER).map_err(zmq_err("DEALER socket"))?;

        // ROUTER routes replies by identity
        socket
            .set_identity(sensor_id.as_bytes())
            .map_err(zmq_err("set_identity"))?;
        socket.set_sndhwm(100).map_err(zmq_err("set_sndhwm"))?;
        socket.set_rcvhwm(100).map_err(zmq_err("set_rcvhwm"))?;

        // DEALER is the CURVE client with an ephemeral keypair
        if let Some(keyfile) = curve_keyfile {
            let (server_key, _) = parse_curve_keyfile(keyfile)?;
            let keypair = zmq::CurveKeyPair::new().map_err(zmq_err("curve_keypair"))?;
            socket
                .set_curve_serverkey(server_key.as_bytes())
                .map_err(zmq_err("curve_serverkey"))?;
            socket
                .set_curve_publickey(&keypair.public_key)
                .map_err(zmq_err("curve_publickey"))?;
            socket
                .set_curve_secretkey(&keypair.secret_key)
                .map_err(zmq_err("curve_secretkey"))?;
        }

        socket
            .connect(control_endpoint)
            .map_err(|e| format!("zmq connect to {}: {}", control_endpoint, e))?;
        log::info!("control: connected to {}", control_endpoint);

        Ok(Self {
            socket,
            _ctx: ctx,
            config,
            status,
            running,
        })
    }

    /// Blocking control loop; returns once `running` is cleared.
    pub fn run(&self) {
        self.send_heartbeat();
        let mut last_heartbeat = Instant::now();

        while self.running.load(Ordering::Relaxed) {
            let ready = matches!(self.socket.poll(zmq::POLLIN, 1000), Ok(n) if n > 0);
            if ready {
                match self.socket.recv_bytes(0) {
                    Ok(msg) => {
                        let resp = handle_message(&self.config, &self.status, &msg);
                        let _ = self.socket.send(resp.to_string().as_bytes(), zmq::DONTWAIT);
                    }
                    Err(e) => log::warn!("control: recv failed: {}", e),
                }
            }

            if last_heartbeat.elapsed().as_secs() >= HEARTBEAT_SECS {
                self.send_heartbeat();
                last_heartbeat = Instant::now();
            }
        }
    }

    fn send_heartbeat(&self) {
        let hb = {
            let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status_json("heartbeat", &self.config.snapshot(), &status)
        };
        let _ = self.socket.send(hb.to_string().as_bytes(), zmq::DONTWAIT);
    }
}
