use super::{
    import_input, json_pretty, output_format, platform_filter, Failure, EXIT_SUCCESS,
};
use lockbridge_core::{ConvertError, Converter, ConverterConfig};
use std::path::Path;
use tracing::debug;

pub fn run(
    input: &Path,
    from: Option<&str>,
    environment: Option<&str>,
    to: Option<&str>,
    platforms: &[String],
    output: Option<&Path>,
    json: bool,
) -> Result<u8, Failure> {
    let config = ConverterConfig::load_default()?;
    let target = output_format(to, &config)?;
    let filter = platform_filter(platforms);
    debug!("converting {} to {target}", input.display());

    let converter = Converter::builtin();
    // Reject an unknown target before reading the input.
    converter
        .registry()
        .lookup(&target)
        .map_err(ConvertError::from)?;
    let env = import_input(&converter, input, from, environment)?;

    match output {
        Some(path) => {
            converter.export_file(&env, path, &target, filter.as_ref())?;
            if json {
                let summary = serde_json::json!({
                    "input": input.display().to_string(),
                    "output": path.display().to_string(),
                    "format": target,
                });
                println!("{}", json_pretty(&summary)?);
            } else {
                println!("wrote {} ({target})", path.display());
            }
        }
        None => {
            let text = converter.export_lockfile(&env, &target, filter.as_ref())?;
            print!("{text}");
        }
    }
    Ok(EXIT_SUCCESS)
}
