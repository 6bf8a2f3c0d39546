use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use articat::{
    articat::SMOKE_TEST_ARTIFACT_URL,
    commands::{self, ARTIFACTORY_HOSTS, ConnectOptions, E2eOptions},
    config::{DEFAULT_SERVER, server_aliases},
};
use clap::{Parser, ValueEnum};

/// articat - command-line client for the Articat service on Helix
///
/// Requests are authenticated with a bearer token obtained from your ESP API
/// token (--esp-api-token or the ESP_API_TOKEN environment variable).
///
/// Examples:
///   articat smoke-test
///   articat -s dev convert-url https://repo.example.com/junit-4.13.jar
///   articat fetch-prov uid.mavenpkg://junit/junit@4.13
#[derive(Parser, Debug)]
#[command(author, version = env!("ARTICAT_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server alias or the URL of your own instance
    #[arg(
        long,
        short = 's',
        default_value = DEFAULT_SERVER,
        global = true,
        long_help = format!(
            "The alias of the server. Options: {}. You can also specify your own server instance url here.",
            server_aliases()
        )
    )]
    server: String,

    /// The service is reached through the Helix Envoy (custom servers only)
    #[arg(long, global = true)]
    within_envoy: bool,

    /// Use the CSP production token endpoint (custom servers only)
    #[arg(long, global = true)]
    csp_prod: bool,

    /// ESP API token used to obtain access tokens
    #[arg(long, env = "ESP_API_TOKEN", hide_env_values = true, global = true)]
    esp_api_token: Option<String>,

    /// Token endpoint override
    #[arg(long, value_name = "URL", global = true)]
    auth_url: Option<String>,

    /// Client id of a CSP OAuth app (switches to the client-credentials flow)
    #[arg(long, env = "CSP_CLIENT_ID", global = true)]
    csp_client_id: Option<String>,

    /// Client secret of the CSP OAuth app
    #[arg(long, env = "CSP_CLIENT_SECRET", hide_env_values = true, global = true)]
    csp_client_secret: Option<String>,

    /// CSRF token sent as X-CSRF-TOKEN with every request
    #[arg(long, value_name = "TOKEN", global = true)]
    csrf_token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    /// Log level
    #[arg(long, short = 'l', value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Convert a well-known artifact URL and fetch its provenance data
    SmokeTest(SmokeTestArgs),

    /// Convert an artifact URL to its SRP unique id
    ConvertUrl(ConvertUrlArgs),

    /// Fetch provenance data for an SRP unique id
    FetchProv(FetchProvArgs),

    /// Convert and fetch provenance for every artifact URL of an observer result
    E2eTest(E2eTestArgs),

    /// Digest a fixed test string to check that tasks run
    StringDigest,

    /// Authenticated GET of a path under the service root, printed as JSON
    Get(GetArgs),

    /// Obtain an access token and print it masked
    Token,
}

#[derive(clap::Args, Debug)]
struct SmokeTestArgs {
    /// Artifact URL to convert
    #[arg(long, value_name = "URL", default_value = SMOKE_TEST_ARTIFACT_URL)]
    artifact_url: String,
}

#[derive(clap::Args, Debug)]
struct ConvertUrlArgs {
    /// Artifact URL
    #[arg(value_name = "URL")]
    url: String,
}

#[derive(clap::Args, Debug)]
struct FetchProvArgs {
    /// SRP unique id
    #[arg(value_name = "SRP_UID")]
    srp_uid: String,
}

#[derive(clap::Args, Debug)]
struct E2eTestArgs {
    /// The JSON file of the observer result
    #[arg(long, value_name = "FILE")]
    observer_json_file: PathBuf,

    /// The JSON file of the test report [default: ~/report.json]
    #[arg(long, value_name = "FILE")]
    report_json_file: Option<PathBuf>,

    /// Skip URLs that succeeded in the previous report (default)
    #[arg(long, overrides_with = "no_use_pre_report")]
    use_pre_report: bool,

    /// Ignore the previous report and test every URL again
    #[arg(long, overrides_with = "use_pre_report")]
    no_use_pre_report: bool,

    /// Host whose URLs are tested (repeatable)
    #[arg(long = "artifactory-host", value_name = "HOST", default_values = ARTIFACTORY_HOSTS)]
    artifactory_hosts: Vec<String>,
}

impl E2eTestArgs {
    fn options(&self) -> E2eOptions {
        E2eOptions {
            observer_json_file: self.observer_json_file.clone(),
            report_json_file: self
                .report_json_file
                .clone()
                .unwrap_or_else(commands::default_report_path),
            use_pre_report: !self.no_use_pre_report,
            artifactory_hosts: self.artifactory_hosts.clone(),
        }
    }
}

#[derive(clap::Args, Debug)]
struct GetArgs {
    /// Path relative to the service root, e.g. "artifact-ids/tasks"
    #[arg(value_name = "PATH")]
    path: String,

    /// Query parameter as KEY=VALUE (repeatable)
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE")]
    query: Vec<String>,
}

impl Cli {
    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            server: self.server.clone(),
            is_within_envoy: self.within_envoy,
            csp_prod: self.csp_prod,
            esp_api_token: self.esp_api_token.clone(),
            auth_url: self.auth_url.clone(),
            csp_client_id: self.csp_client_id.clone(),
            csp_client_secret: self.csp_client_secret.clone(),
            csrf_token: self.csrf_token.clone(),
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

fn parse_query(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => bail!("Invalid query parameter '{}'. Expected KEY=VALUE.", pair),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_filter()),
    )
    .init();

    let options = cli.connect_options();

    match &cli.command {
        Commands::SmokeTest(args) => {
            let articat = commands::build_articat(&options)?;
            commands::smoke_test(&articat, &args.artifact_url).await?
        }
        Commands::ConvertUrl(args) => {
            let articat = commands::build_articat(&options)?;
            commands::convert_url(&articat, &args.url).await?
        }
        Commands::FetchProv(args) => {
            let articat = commands::build_articat(&options)?;
            commands::fetch_prov(&articat, &args.srp_uid).await?
        }
        Commands::E2eTest(args) => {
            let articat = commands::build_articat(&options)?;
            commands::e2e_test(&articat, &args.options()).await?;
        }
        Commands::StringDigest => {
            let articat = commands::build_articat(&options)?;
            commands::string_digest(&articat).await?
        }
        Commands::Get(args) => {
            let query = parse_query(&args.query)?;
            let http = commands::build_http_client(&options)?;
            commands::get(&http, &args.path, &query).await?
        }
        Commands::Token => {
            let http = commands::build_http_client(&options)?;
            commands::token(&http).await?
        }
    }
    Ok(())
}
