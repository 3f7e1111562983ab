use nitros_pubsub::{Subscriber, SubscriberOptions};
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::{registry, shutdown_token, Context, EchoArgs};
use crate::exit::{pubsub_error, CliResult, SUCCESS};
use crate::output::print_message;

pub async fn run(args: EchoArgs, ctx: Context) -> CliResult<i32> {
    let registry = registry()?;
    let shutdown = shutdown_token()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = SubscriberOptions::default().with_log(ctx.events);
    let subscriber = Subscriber::new(
        &registry,
        &args.topic,
        move |msg| {
            let _ = tx.send(msg);
        },
        options,
    )
    .map_err(|err| pubsub_error("subscribe failed", err))?;
    info!(topic = %args.topic, "listening (Ctrl+C to stop)");

    let mut printed = 0usize;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                print_message(&msg, ctx.format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    subscriber.close().await;
    Ok(SUCCESS)
}
