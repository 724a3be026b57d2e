use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "core-server-rs",
    version,
    about = "Event-detection core server"
)]
pub struct Args {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long, default_value_t = false)]
    pub print_openapi: bool,
}
