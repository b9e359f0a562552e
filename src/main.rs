fn main() -> anyhow::Result<()> {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();

    care_relay::logging::init();

    // Both rustls providers can end up enabled through dependencies; pick one explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = care_relay::settings::load_settings();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(care_relay::run(settings))
}
