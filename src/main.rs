use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use tftpd::cli;
use tftpd::config::ServerConfig;
use tftpd::dispatcher::Dispatcher;

static WORKING_DIR: OnceLock<PathBuf> = OnceLock::new();

fn working_dir<'a>() -> &'a PathBuf {
	WORKING_DIR.get().unwrap()
}

#[tokio::main]
async fn main() {
	let options = cli::Options::parse();

	cli::init_logger(options.debug);

	match &options.root_dir {
		Some(root_dir) => {
			let expanded = PathBuf::from(shellexpand::tilde(&root_dir.to_string_lossy()).into_owned());
			match expanded.try_exists() {
				Ok(true) => WORKING_DIR.set(expanded).unwrap_or(()),
				_ => return error!("Cannot find/access specified root path!"),
			}
		}
		None => match std::env::current_dir() {
			Ok(d) => WORKING_DIR.set(d).unwrap_or(()),
			Err(e) => return error!("Cannot access current working dir: {e}!"),
		},
	}

	debug!("serving from '{}'", working_dir().display());

	let cancel_token = CancellationToken::new();
	let sigint_token = cancel_token.clone();

	ctrlc::set_handler(move || {
		info!("Received SIGINT");
		sigint_token.cancel();
	})
	.unwrap();

	let listen_addr: SocketAddr = (options.bind, options.port).into();
	let config = ServerConfig::new(options.bind, working_dir().clone())
		.with_listening_port(options.port)
		.with_timeout(Duration::from_secs(options.timeout))
		.with_retries(options.retries)
		.with_ephemeral_port_range((options.ephemeral_port_low, options.ephemeral_port_high))
		.with_max_transfers(options.max_transfers);

	let dispatcher = match Dispatcher::bind(config).await {
		Ok(d) => d,
		Err(e) => return error!("failed to bind {listen_addr}: {e}"),
	};

	dispatcher.run(cancel_token).await;
}
