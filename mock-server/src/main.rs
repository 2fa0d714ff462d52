use mock_server::MockConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let flaky_failures = std::env::var("FLAKY_FAILURES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("listening on {addr} (flaky failures: {flaky_failures})");
    let config = MockConfig {
        flaky_failures,
        ..MockConfig::default()
    };
    mock_server::run_with(listener, config).await
}
