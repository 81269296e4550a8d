use telelink_link::{Link, LinkError, StreamLink};
use tracing::info;

use crate::cmd::{interrupt_token, ListenArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let cancel = interrupt_token();
    let link = StreamLink::server(args.address);

    let endpoints = tokio::select! {
        _ = cancel.cancelled() => return Ok(SUCCESS),
        accepted = link.connect() => accepted.map_err(|err| link_error("accept failed", err))?,
    };
    info!(%endpoints, "peer connected");
    let peer = endpoints.remote.clone();

    let mut printed = 0usize;
    let result = loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break Ok(SUCCESS),
            received = link.receive() => received,
        };
        match received {
            Ok(frame) => {
                print_frame(&frame, &peer, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(SUCCESS);
                }
            }
            Err(LinkError::ConnectionClosed) => break Ok(SUCCESS),
            Err(err) => break Err(link_error("receive failed", err)),
        }
    };

    link.close().await;
    result
}
