use crate::config::Config;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing_stackdriver::CloudTraceConfiguration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,tiawpao_services=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[derive(Debug, PartialEq, Eq)]
enum Output<'a> {
    Pretty,
    Stackdriver { project_id: &'a str },
}

/// Stackdriver needs a project for trace correlation; without one the
/// plain formatter is used even in deployed environments.
fn select_output(is_local: bool, project: Option<&str>) -> Output<'_> {
    match project {
        Some(project_id) if !is_local => Output::Stackdriver { project_id },
        _ => Output::Pretty,
    }
}

/// Installs the global subscriber: pretty output locally, Stackdriver JSON
/// with Cloud Trace correlation everywhere else.
pub fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let output = select_output(config.is_local(), config.google_cloud_project());

    match output {
        Output::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;

            if !config.is_local() {
                tracing::warn!("GOOGLE_CLOUD_PROJECT is not set, logging without Cloud Trace");
            }
        }
        Output::Stackdriver { project_id } => {
            // W3C trace-context, read back by the request span in `router_with_state`
            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

            let stackdriver_layer =
                tracing_stackdriver::layer().with_cloud_trace(CloudTraceConfiguration {
                    project_id: project_id.to_owned(),
                });

            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_opentelemetry::layer())
                .with(stackdriver_layer)
                .try_init()?;
        }
    }

    Ok(())
}
