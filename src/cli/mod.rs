pub mod commands;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "openapi-extractor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Extract OpenAPI v2 and v3 documents from an aggregated Kubernetes API server",
    long_about = None
)]
pub struct Cli {
    /// Go package to build the api server from
    #[arg(long)]
    pub apiserver_package: Option<String>,

    /// Flags passed to `go build` for the api server package
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub apiserver_build_opts: Vec<String>,

    /// Command to run the api server (comma separated)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub apiserver_command: Vec<String>,

    /// Comma separated list of api service definitions
    #[arg(long, value_delimiter = ',', required = true)]
    pub apiservices: Vec<PathBuf>,

    /// Directory to store the extracted OpenAPI specs
    #[arg(long, default_value = ".")]
    pub output: PathBuf,

    /// Timeout to wait for the /openapi/v3 endpoint of all api services
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub openapi_timeout: Duration,

    /// Timeout to wait for all api services to report Available
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub apiservice_timeout: Duration,

    /// Timeout for each started process to become ready
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    pub startup_timeout: Duration,

    /// Directory containing the etcd and kube-apiserver binaries
    #[arg(
        long,
        env = "KUBEBUILDER_ASSETS",
        default_value = "/usr/local/kubebuilder/bin"
    )]
    pub control_plane_assets: PathBuf,

    /// Print control plane output to stdout/stderr
    #[arg(long)]
    pub attach_control_plane_output: bool,

    /// Print api server output to stdout/stderr
    #[arg(long)]
    pub attach_apiserver_output: bool,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}
