use habit_app::app::{run, AppConfig};

fn main() {
    tracing_subscriber::fmt::init();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(%err, "falling back to default configuration");
            AppConfig::default()
        }
    };
    if let Err(err) = run(config) {
        tracing::error!("habitd failed: {err:#}");
        std::process::exit(1);
    }
}
