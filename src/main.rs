use anyhow::bail;
use tokio::time::Duration;
use url_stripper::{
    config::Config,
    logging::init_logging,
    self_test::run_self_test,
    store::RuleStore,
    web::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging(&config.app_env);
    config.validate()?;

    let store = RuleStore::load(config.rules_source.as_deref()).await?;

    // One-shot commands: `strip <url>...` and `self-test`.
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("strip") => {
            let stripper = store.stripper();
            for url in &args[1..] {
                println!("{}", stripper.strip_url(url));
            }
            return Ok(());
        }
        Some("self-test") => {
            let outcomes = run_self_test(&store.stripper());
            let failed = outcomes.iter().filter(|o| !o.passed).count();
            if failed > 0 {
                bail!("{} of {} self-test cases failed", failed, outcomes.len());
            }
            return Ok(());
        }
        Some(other) => bail!("Unknown command '{}', expected 'strip' or 'self-test'", other),
        None => {}
    }

    let refresh_secs = config.refresh_secs;
    let rules_refresh = store.clone();
    let refresh_task = tokio::spawn(async move {
        if refresh_secs == 0 || rules_refresh.source().is_none() {
            std::future::pending::<()>().await;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(refresh_secs));
        // The first tick completes immediately and the table was just loaded.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = rules_refresh.refresh().await {
                tracing::error!("Failed to refresh rules: {:#}", e);
            }
        }
    });

    let web_task = web::run_server(AppState { store, config });

    tokio::select! {
        res = web_task => {
            if let Err(e) = res {
                tracing::error!("Web server stopped: {:#}", e);
                return Err(e);
            }
            tracing::error!("Web server task finished unexpectedly");
        }
        _ = refresh_task => {
            tracing::error!("Refresh task finished unexpectedly");
        }
    }

    Ok(())
}
