// Broker service main entry point.
use anyhow::{Context, Result};
use broker::notify::Dispatcher;
use broker::{config, observability, tcp};
use herald_broker::Registry;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability();

    let config = config::BrokerConfig::from_env_or_yaml()?;
    // Expose Prometheus metrics on the configured bind address.
    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let registry = Arc::new(Registry::new());
    tracing::info!("registry started");
    let dispatcher = Dispatcher::start(Arc::clone(&registry), &config);

    let listener = TcpListener::bind(config.bind)
        .await
        .context("bind TCP listener")?;
    tracing::info!(addr = %listener.local_addr()?, "tcp listener started");

    // Start accepting connections in a background task.
    let accept_task = {
        let registry = Arc::clone(&registry);
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(err) = tcp::serve(listener, registry, dispatcher, config).await {
                tracing::warn!(error = %err, "accept loop exited");
            }
        })
    };

    // Block until SIGINT so the process stays alive.
    shutdown.await;
    accept_task.abort();
    tracing::info!("broker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_starts_and_stops() -> Result<()> {
        let _g1 = EnvGuard::set("HERALD_BIND", "127.0.0.1:0");
        let _g2 = EnvGuard::set("HERALD_METRICS_BIND", "127.0.0.1:0");
        let _g3 = EnvGuard::unset("HERALD_BROKER_CONFIG");
        run_with_shutdown(async {}).await?;
        Ok(())
    }
}
