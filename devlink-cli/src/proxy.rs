//! UDP relay until Ctrl-C.

use colored::Colorize;
use devlink_client::{DatagramTransport, TransportConfig};
use devlink_pipeline::{CancelToken, Relay, Worker, DEFAULT_POLL_TIMEOUT};
use std::net::SocketAddr;
use std::sync::Arc;

pub fn run(
    front: SocketAddr,
    back: SocketAddr,
    target: SocketAddr,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let front = Arc::new(DatagramTransport::bind(TransportConfig::new(front))?);
    let back = Arc::new(DatagramTransport::bind(
        TransportConfig::new(back).with_target(target),
    )?);

    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    eprintln!(
        "{} {} -> {} -> {}",
        "Relaying".green(),
        front.local_addr()?,
        back.local_addr()?,
        target.to_string().cyan()
    );
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    let (forward, backward) = Relay::pair(front, back, DEFAULT_POLL_TIMEOUT);
    let forward_stats = forward.stats();
    let backward_stats = backward.stats();
    let workers = [
        Worker::start_with_token(forward.with_verbose(verbose), token.clone())?,
        Worker::start_with_token(backward.with_verbose(verbose), token.clone())?,
    ];

    // Either direction failing takes the other down with it.
    while !workers.iter().any(Worker::is_finished) && token.sleep(DEFAULT_POLL_TIMEOUT) {}
    token.cancel();

    let mut failed = None;
    for worker in workers {
        if let Err(e) = worker.join() {
            failed.get_or_insert(e);
        }
    }

    eprintln!(
        "{} forwarded {} datagrams ({} bytes), returned {} ({} bytes, {} dropped)",
        "Stopped:".dimmed(),
        forward_stats.datagrams(),
        forward_stats.bytes(),
        backward_stats.datagrams(),
        backward_stats.bytes(),
        backward_stats.dropped()
    );

    match failed {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
