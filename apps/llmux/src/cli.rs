use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "llmux", about = "Multi-protocol AI proxy gateway")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "LLMUX_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Override the configured bind address (host:port).
    #[arg(long, env = "LLMUX_LISTEN")]
    pub listen: Option<String>,
}
