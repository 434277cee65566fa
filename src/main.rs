use colored::Colorize;
use kyc_backend::api;
use kyc_backend::cli::{self, CLI};
use kyc_backend::config::Settings;
use kyc_backend::database::sqlite::SqliteDatabase;
use kyc_backend::errors::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().flatten_event(true))
        .init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("{}", format!("Application error: {}", e).red());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let settings = Settings::from_env()?;

    // No arguments means serve
    let command = args.get(1).map(String::as_str).unwrap_or("serve");
    match command {
        "serve" => api::start_http_server(settings).await?,
        "promote-admin" => {
            CLI::print_header();
            cli::handle_promote_admin_command(open_database(&settings).await?, &args[2..]).await?;
        }
        "stats" => {
            CLI::print_header();
            cli::handle_stats_command(open_database(&settings).await?).await?;
        }
        "pending" => {
            CLI::print_header();
            cli::handle_pending_command(open_database(&settings).await?, &args[2..]).await?;
        }
        "cleanup-tokens" => {
            cli::handle_cleanup_tokens_command(open_database(&settings).await?).await?;
        }
        "help" | "--help" | "-h" => CLI::print_help(),
        _ => {
            println!("{}", "Unknown command. Use 'help' to see available commands.".red());
        }
    }

    Ok(())
}

async fn open_database(settings: &Settings) -> Result<Arc<SqliteDatabase>> {
    Ok(Arc::new(SqliteDatabase::new(&settings.database_path).await?))
}
