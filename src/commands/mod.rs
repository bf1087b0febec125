use clap::{Arg, Command};

pub fn create_base_commands() -> Command {
    Command::new("DFS Node")
        .arg(
            Arg::new("config")
                .long("config")
                .action(clap::ArgAction::Set)
                .value_name("FILE")
                .help("Path to the cluster configuration file"),
        )
        .arg(
            Arg::new("node")
                .long("node")
                .action(clap::ArgAction::Set)
                .value_name("NAME")
                .help("Run as this peer, overriding this_node from the config"),
        )
        .arg(
            Arg::new("shared-dir")
                .long("shared-dir")
                .action(clap::ArgAction::Set)
                .value_name("DIR")
                .help("Override the shared directory"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .action(clap::ArgAction::Set)
                .value_name("FILE")
                .help("Mirror logs into a file"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(clap::ArgAction::SetTrue)
                .help("Show debug log lines"),
        )
}

pub fn get_config_path(matches: &clap::ArgMatches) -> String {
    matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("config.toml")
        .to_string()
}
