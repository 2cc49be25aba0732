//! mtls-gate - client certificate validation CLI
//!
//! Evaluates certificates against the same pipeline the middleware uses, so
//! operators can check a policy or trust bundle before deploying it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::error;

use mtls_gate::{
    cli::{Cli, Command},
    config::Config,
    mtls::{PresentedCertificate, RejectReason, TrustStore, ValidationVerdict, build_pipeline},
    setup_tracing,
};

/// Exit code for a rejected certificate.
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let outcome = match cli.command {
        Command::Check { cert, at } => run_check(cli.config.as_deref(), &cert, at).await,
        Command::Bundle { path } => run_bundle(cli.config.as_deref(), path),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Evaluate one certificate and print the verdict.
async fn run_check(
    config_path: Option<&Path>,
    cert_path: &Path,
    at: Option<DateTime<Utc>>,
) -> Result<ExitCode> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    let pipeline =
        build_pipeline(&config.mtls, &config.revocation).context("Failed to initialize validation")?;

    let bytes = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read {}", cert_path.display()))?;

    // An unparseable certificate is a verdict, not a setup failure.
    let verdict = match PresentedCertificate::from_pem(&bytes) {
        Ok(cert) => pipeline.evaluate_at(&cert, at.unwrap_or_else(Utc::now)).await,
        Err(e) => {
            error!(error = %e, path = %cert_path.display(), "Certificate could not be parsed");
            ValidationVerdict::rejected(RejectReason::ValidationError)
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&verdict).context("Failed to serialize verdict")?
    );

    Ok(if verdict.is_accepted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REJECTED)
    })
}

/// Print one line per certificate in the bundle.
fn run_bundle(config_path: Option<&Path>, path: Option<PathBuf>) -> Result<ExitCode> {
    let path = match path {
        Some(p) => p,
        None => {
            let config = Config::load(config_path).context("Failed to load configuration")?;
            PathBuf::from(config.mtls.ca_bundle_path)
        }
    };

    let store = TrustStore::load_file(&path)
        .with_context(|| format!("Failed to load CA bundle {}", path.display()))?;

    if store.is_empty() {
        println!("No certificates in {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} certificate(s) in {}:\n", store.len(), path.display());
    for issuer in store.iter() {
        let role = match (issuer.self_signed, issuer.is_ca) {
            (true, _) => "root",
            (false, true) => "intermediate",
            (false, false) => "not a CA",
        };
        println!("  {} ({role})", issuer.subject);
        println!("     Thumbprint: {}", issuer.thumbprint);
        println!(
            "     Valid: {} .. {}",
            issuer.not_before.format("%Y-%m-%dT%H:%M:%SZ"),
            issuer.not_after.format("%Y-%m-%dT%H:%M:%SZ")
        );
    }

    Ok(ExitCode::SUCCESS)
}
