use nitros_discovery::{DiscoveryMode, DiscoveryRegistry, TopicInfo};
use tracing::{info, warn};

use crate::cmd::{registry, Context, ListArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::print_topics;

pub async fn run(args: ListArgs, ctx: Context) -> CliResult<i32> {
    let registry = registry()?;
    warn_if_local_only(&registry);

    info!(timeout = ?args.timeout, "scanning for topics");
    let topics = scan(&registry, args.timeout).await;
    print_topics(&topics, ctx.format);
    Ok(SUCCESS)
}

/// Query the network, wait `timeout` for answers and snapshot every topic.
pub(crate) async fn scan(registry: &DiscoveryRegistry, timeout: std::time::Duration) -> Vec<TopicInfo> {
    registry
        .scan(timeout)
        .await
        .iter()
        .filter_map(|topic| registry.topic_info(topic))
        .collect()
}

pub(crate) fn warn_if_local_only(registry: &DiscoveryRegistry) {
    if let DiscoveryMode::LocalOnly { reason } = registry.status().mode {
        warn!(%reason, "multicast discovery unavailable; remote topics are not visible");
    }
}
