use super::{json_pretty, output_format, platform_filter, Failure, EXIT_SUCCESS};
use lockbridge_core::{
    snapshot_environment, ConvertError, Converter, ConverterConfig, PrefixSnapshot,
};
use std::path::Path;

pub fn run(
    prefix: &Path,
    format: Option<&str>,
    platforms: &[String],
    file: Option<&Path>,
    json: bool,
) -> Result<u8, Failure> {
    let config = ConverterConfig::load_default()?;
    let target = output_format(format, &config)?;
    let filter = platform_filter(platforms);

    let converter = Converter::builtin();
    converter
        .registry()
        .lookup(&target)
        .map_err(ConvertError::from)?;

    let snapshot = PrefixSnapshot::new(prefix)
        .with_platform(config.platform.clone())
        .with_channels(config.channels.clone());
    let env = snapshot_environment(&snapshot).map_err(ConvertError::from)?;

    match file {
        Some(path) => {
            converter.export_file(&env, path, &target, filter.as_ref())?;
            if json {
                let summary = serde_json::json!({
                    "prefix": prefix.display().to_string(),
                    "output": path.display().to_string(),
                    "format": target,
                    "platforms": env.platforms(),
                    "packages": env.packages().len(),
                });
                println!("{}", json_pretty(&summary)?);
            } else {
                println!(
                    "locked {} packages from {} into {} ({target})",
                    env.packages().len(),
                    prefix.display(),
                    path.display()
                );
            }
        }
        None => {
            let text = converter.export_lockfile(&env, &target, filter.as_ref())?;
            print!("{text}");
        }
    }
    Ok(EXIT_SUCCESS)
}
