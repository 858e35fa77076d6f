//! Front-end channels.
//!
//! Every channel is a thin driver that reads peer input, funnels it into
//! [`crate::cclaw::agent_loop::run`] under a channel-prefixed session key,
//! and writes the reply back out:
//!
//! - [`cli`] — interactive terminal (streaming) and one-shot mode
//! - [`telegram`] — long-polling bot (`tg_<chat>` sessions)
//! - [`gateway`] — WebSocket server (`ws_<conn>` sessions)

pub mod cli;
pub mod gateway;
pub mod telegram;
