use std::sync::Arc;

use dfs_node::commands::{create_base_commands, get_config_path};
use dfs_node::{info, logger, Config, Node};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = create_base_commands().get_matches();

    if matches.get_flag("debug") {
        logger::set_debug(true);
    }
    if let Some(log_file) = matches.get_one::<String>("log-file") {
        logger::set_log_file(Some(log_file));
    }

    let mut config = Config::from_file(get_config_path(&matches))?;
    if let Some(name) = matches.get_one::<String>("node") {
        config.this_node = name.clone();
    }
    if let Some(dir) = matches.get_one::<String>("shared-dir") {
        config.shared_dir = dir.into();
    }
    config.validate()?;

    info!(
        "peer directory: {} ({} nodes)",
        config.node_names().join(", "),
        config.nodes.len()
    );

    let node = Arc::new(Node::new(config)?);
    Arc::clone(&node).start();

    tokio::signal::ctrl_c().await?;
    node.stop();
    Ok(())
}
