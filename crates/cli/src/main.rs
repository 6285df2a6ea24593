//! Runs one Chord/DHash node, driven by a script file or stdin.

use clap::Parser;
use chordctl::{command_source, Cli, Node};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .init();

    let commands = command_source::spawn(cli.script.as_deref())?;
    let mut node = Node::bind(cli.node_config()).await?;
    node.run(commands).await
}
