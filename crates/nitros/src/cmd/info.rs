use nitros_frame::Topic;
use tracing::info;

use crate::cmd::list::warn_if_local_only;
use crate::cmd::{registry, Context, InfoArgs};
use crate::exit::{CliError, CliResult, NOT_FOUND, SUCCESS, USAGE};
use crate::output::print_topic_info;

pub async fn run(args: InfoArgs, ctx: Context) -> CliResult<i32> {
    let topic = Topic::new(&args.topic)
        .map_err(|err| CliError::new(USAGE, format!("invalid topic: {err}")))?;
    let registry = registry()?;
    warn_if_local_only(&registry);

    info!(%topic, timeout = ?args.timeout, "scanning for topic");
    registry.scan(args.timeout).await;

    match registry.topic_info(topic.as_str()) {
        Some(topic_info) => {
            print_topic_info(&topic_info, ctx.format);
            Ok(SUCCESS)
        }
        None => Err(CliError::new(
            NOT_FOUND,
            format!("topic '{topic}' not found"),
        )),
    }
}
