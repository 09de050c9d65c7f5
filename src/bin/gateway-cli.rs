use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::RequestBuilder;
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the organ gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "ORGAN_GATEWAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List circuit breaker states
    Circuits,
    /// Show fallback plans and per-level counts
    Fallbacks,
    /// Show result cache counters
    Cache,
    /// Drop cached results for a resource
    Invalidate {
        resource: String,
        #[arg(short, long)]
        operation: Option<String>,
    },
    /// Show quota usage for a subject
    Usage { subject: String },
    /// Call an organ through the gateway
    Call {
        resource: String,
        operation: String,
        /// JSON object of call parameters
        #[arg(short, long, default_value = "{}")]
        params: String,
        #[arg(short, long, default_value = "cli")]
        subject: String,
        /// Disable the fallback chain
        #[arg(long)]
        no_fallbacks: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let admin = |method: reqwest::Method, path: &str| -> RequestBuilder {
        client
            .request(method, format!("{}{}", cli.url, path))
            .headers(headers.clone())
    };

    let request = match cli.command {
        Commands::Status => admin(reqwest::Method::GET, "/admin/status"),
        Commands::Circuits => admin(reqwest::Method::GET, "/admin/circuits"),
        Commands::Fallbacks => admin(reqwest::Method::GET, "/admin/fallbacks"),
        Commands::Cache => admin(reqwest::Method::GET, "/admin/cache"),
        Commands::Invalidate {
            resource,
            operation,
        } => {
            let request = admin(reqwest::Method::DELETE, &format!("/admin/cache/{}", resource));
            match operation {
                Some(op) => request.query(&[("operation", op)]),
                None => request,
            }
        }
        Commands::Usage { subject } => admin(reqwest::Method::GET, &format!("/admin/usage/{}", subject)),
        Commands::Call {
            resource,
            operation,
            params,
            subject,
            no_fallbacks,
        } => {
            let params: Map<String, Value> = serde_json::from_str(&params)?;
            client.post(format!("{}/v1/call", cli.url)).json(&json!({
                "subject": subject,
                "resource": resource,
                "operation": operation,
                "params": params,
                "use_fallbacks": !no_fallbacks,
            }))
        }
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
