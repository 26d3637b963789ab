//! Library surface for the TFTP server: the wire protocol and per-transfer
//! engines in [`tftp`], the listener in [`dispatcher`], and [`config`] for
//! wiring up a [`dispatcher::Dispatcher`] without going through the CLI.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod tftp;
