use clap::Parser;
use bulletin::cli::{
    Args, build_config, handle_promote_admin, init_logging, load_jwt_secret, open_database,
    parse_base_url,
};
use bulletin::{init_cleanup, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(client_url) = parse_base_url("client-url", &args.client_url) else {
        std::process::exit(1);
    };
    let Some(public_url) = parse_base_url("public-url", &args.public_url) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(username) = args.promote_admin.as_deref() {
        handle_promote_admin(&db, username).await;
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read local address");
        std::process::exit(1);
    });

    init_cleanup(&db).await;

    let config = build_config(args, db, jwt_secret, client_url, public_url);

    info!(address = %local_addr, "Listening");

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
