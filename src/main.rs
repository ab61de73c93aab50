use env_logger::Env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Info by default, sqlx debug output suppressed; RUST_LOG overrides both
    env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();

    case_library::run_server().await
}
