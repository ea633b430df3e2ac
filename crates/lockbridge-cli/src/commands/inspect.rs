use super::{colorize_origin, import_input, json_pretty, Failure, EXIT_SUCCESS};
use lockbridge_core::Converter;
use lockbridge_schema::{LockedEnvironment, Origin};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct PlatformSummary {
    platform: String,
    conda: usize,
    pypi: usize,
}

#[derive(Serialize)]
struct InspectReport<'a> {
    format: Option<&'a str>,
    schema_version: Option<u32>,
    fingerprint: String,
    short_id: String,
    channels: &'a [String],
    pypi_indexes: &'a [String],
    platforms: Vec<PlatformSummary>,
    packages: usize,
}

fn summarize(env: &LockedEnvironment) -> Vec<PlatformSummary> {
    env.platforms()
        .iter()
        .map(|platform| {
            let mut conda = 0;
            let mut pypi = 0;
            for pkg in env.packages_for(platform) {
                match pkg.origin() {
                    Origin::Conda => conda += 1,
                    Origin::Pypi => pypi += 1,
                }
            }
            PlatformSummary {
                platform: platform.to_string(),
                conda,
                pypi,
            }
        })
        .collect()
}

pub fn run(
    input: &Path,
    from: Option<&str>,
    environment: Option<&str>,
    json: bool,
) -> Result<u8, Failure> {
    let env = import_input(&Converter::builtin(), input, from, environment)?;
    let identity = env.compute_identity();
    let meta = env.metadata();
    let source = meta.source_format.as_ref();

    if json {
        let report = InspectReport {
            format: source.map(|s| s.identifier.as_str()),
            schema_version: source.map(|s| s.schema_version),
            fingerprint: identity.fingerprint.to_string(),
            short_id: identity.short_id.clone(),
            channels: &meta.channels,
            pypi_indexes: &meta.pypi_indexes,
            platforms: summarize(&env),
            packages: env.packages().len(),
        };
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    if let Some(source) = source {
        println!(
            "format:      {} (schema {})",
            source.identifier, source.schema_version
        );
    }
    println!("identity:    {}", identity.short_id);
    println!("channels:    {}", meta.channels.join(", "));
    if !meta.pypi_indexes.is_empty() {
        println!("indexes:     {}", meta.pypi_indexes.join(", "));
    }
    for summary in summarize(&env) {
        println!(
            "{}:  {} {}, {} {}",
            summary.platform,
            summary.conda,
            colorize_origin(Origin::Conda),
            summary.pypi,
            colorize_origin(Origin::Pypi)
        );
    }
    if env.packages().is_empty() {
        println!("(no packages)");
    }
    Ok(EXIT_SUCCESS)
}
