use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "peerchat")]
#[command(about = "A peer-to-peer chat node with a shared presence directory")]
pub struct AppArgs {
    #[arg(long, help = "Port to listen on (random free port if not specified)")]
    pub port: Option<u16>,

    #[arg(
        long,
        default_value = "http://127.0.0.1:8080",
        help = "Base URL of the presence directory"
    )]
    pub directory: String,

    #[arg(long, help = "Display name published when going online")]
    pub name: Option<String>,

    #[arg(long, help = "Multiaddress to dial at startup (repeatable)")]
    pub dial: Vec<String>,
}

impl AppArgs {
    pub fn from_cli() -> Self {
        <Self as Parser>::parse()
    }
}
