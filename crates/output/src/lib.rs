// Copyright 2025-2026 CEMAXECUTER LLC

pub mod command;
pub mod jsonl;

#[cfg(feature = "zmq")]
pub mod zmq_pub;

#[cfg(feature = "zmq")]
pub mod control;
