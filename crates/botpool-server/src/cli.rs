use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "botpool-server", about = "Mute/deafen dispatch service")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/botpool.toml")]
    pub config: String,

    /// Listening port (overrides the configured bind address)
    #[arg(short, long)]
    pub port: Option<u16>,
}
