use clap::Parser;

/// Command-line arguments of the `spry` host
#[derive(Debug, Default, Parser)]
#[command(
    name = "spry",
    about = "Spry: run one request through the pipeline and print its JSON envelope",
    version
)]
pub struct Cli {
    /// Config file (.json or .toml), JSON document, or base64 invocation bundle
    #[arg(env = "SPRY_CONFIG")]
    pub config: Option<String>,

    /// Path to route instead of the request URI
    #[arg(long)]
    pub path: Option<String>,

    /// Request method for command-line runs
    #[arg(long)]
    pub method: Option<String>,

    /// Explicit parameters as JSON; request input is ignored
    #[arg(long)]
    pub params: Option<String>,

    /// Controller to call instead of routing (`Class::method`)
    #[arg(long)]
    pub controller: Option<String>,

    /// Meta passed to the controller, as a JSON object
    #[arg(long)]
    pub meta: Option<String>,

    /// Run as a cron task
    #[arg(long)]
    pub cron: bool,

    /// Run as a background process
    #[arg(long)]
    pub process: bool,
}
