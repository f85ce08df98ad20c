use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "canopy",
    about = "Taxonomy-aware image classification: one worker, counted queues, prior-weighted re-scoring"
)]
struct Args {
    /// Serialized ONNX classification model.
    #[arg(long)]
    model_path: PathBuf,

    /// Label list, one unique classifier label per line.
    #[arg(long)]
    labels_path: PathBuf,

    /// Hierarchy description: JSON array of {id, label, parent?, prior?}.
    #[arg(long)]
    hierarchy_path: PathBuf,

    /// Per-node prior override as NODE=VALUE (value in [0, 1]). Repeatable.
    #[arg(long = "prior", value_parser = parse_prior)]
    priors: Vec<(String, f64)>,

    /// Seconds to wait for the worker before reporting it unavailable.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Payload files: raw little-endian f32 tensor bytes in the model's
    /// input shape.
    #[arg(required = true)]
    payloads: Vec<PathBuf>,
}

fn parse_prior(s: &str) -> Result<(String, f64), String> {
    let (node, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NODE=VALUE, got {s:?}"))?;
    let value: f64 = value
        .parse()
        .map_err(|e| format!("invalid prior value {value:?}: {e}"))?;
    Ok((node.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("canopy v{}", env!("CARGO_PKG_VERSION"));
    run(Args::parse()).await
}

#[cfg(feature = "onnx")]
async fn run(args: Args) -> anyhow::Result<()> {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use canopy_ai::OnnxClassifier;
    use canopy_core::Taxonomy;
    use canopy_runtime::Service;

    let taxonomy = Arc::new(Taxonomy::load(&args.labels_path, &args.hierarchy_path)?);
    let classifier = OnnxClassifier::load(&args.model_path, taxonomy.labels().to_vec())?;

    let service = Service::start(
        classifier,
        taxonomy,
        Some(Duration::from_secs(args.timeout_secs)),
    );
    let priors: HashMap<String, f64> = args.priors.into_iter().collect();

    let mut failures = 0usize;
    for path in &args.payloads {
        let payload =
            std::fs::read(path).with_context(|| format!("reading payload {}", path.display()))?;

        match service.dispatcher().submit(payload, priors.clone()).await {
            Ok(scored) => {
                let line = serde_json::json!({
                    "payload": path.display().to_string(),
                    "probabilities": scored.result,
                    "hierarchy": scored.hierarchy,
                });
                println!("{}", serde_json::to_string_pretty(&line)?);
            }
            Err(err) => {
                tracing::error!(payload = %path.display(), %err, "classification failed");
                failures += 1;
            }
        }
    }

    service.shutdown().await;
    anyhow::ensure!(failures == 0, "{failures} payload(s) failed");
    Ok(())
}

#[cfg(not(feature = "onnx"))]
async fn run(_args: Args) -> anyhow::Result<()> {
    anyhow::bail!("canopy was built without an inference backend; rebuild with `--features onnx`")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prior_overrides() {
        assert_eq!(parse_prior("mammal=0.5").unwrap(), ("mammal".into(), 0.5));
        assert!(parse_prior("mammal").is_err());
        assert!(parse_prior("mammal=lots").is_err());
    }
}
