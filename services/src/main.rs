use std::net::{IpAddr, SocketAddr};
use tiawpao_services::{
    config::Config,
    database::{self, PgStorage},
    email::SmtpMailer,
    routes, telemetry,
};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const BUILD_DATE: &str = env!("BUILD_DATE");
const BUILD_COMMIT: &str = env!("BUILD_COMMIT");
const BUILD_BRANCH: &str = env!("BUILD_BRANCH");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config: Config = Config::init()?;

    telemetry::init_tracing(&config)?;

    print_build_info();

    info!(
        environment = %config.environment(),
        server_addr = %config.server_addr(),
        port = %config.port(),
        "Configuration loaded"
    );

    let pool = database::create_pool(&config).await?;
    database::run_migrations(&pool).await?;

    let mailer = SmtpMailer::new(config.mailer())?;
    if config.mailer().skip_connection_check() {
        info!("Skipping SMTP connection check");
    } else {
        mailer.check_connection().await?;
        info!(host = %config.mailer().host(), "SMTP relay reachable");
    }

    let route = routes(PgStorage::new(pool), mailer, config.clone());

    let addr = SocketAddr::from((config.server_addr().parse::<IpAddr>()?, config.port()));

    info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, route).await?;

    Ok(())
}

fn print_build_info() {
    info!("===========================================");
    info!("  TiawPao Services");
    info!("===========================================");
    info!("Build Date:   {}", BUILD_DATE);
    info!("Build Commit: {}", BUILD_COMMIT);
    info!("Build Branch: {}", BUILD_BRANCH);
    info!("===========================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_constants_exist() {
        assert!(!BUILD_DATE.is_empty());
        assert!(!BUILD_COMMIT.is_empty());
        assert!(!BUILD_BRANCH.is_empty());
    }
}
