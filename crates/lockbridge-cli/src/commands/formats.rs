use super::{json_pretty, Failure, EXIT_SUCCESS};
use serde::Serialize;

#[derive(Serialize)]
struct FormatInfo<'a> {
    identifier: &'a str,
    aliases: &'a [&'a str],
    schema_version: u32,
    default_filenames: &'a [&'a str],
    description: &'a str,
}

pub fn run(json: bool) -> Result<u8, Failure> {
    let registry = lockbridge_formats::global();

    if json {
        let infos: Vec<FormatInfo<'_>> = registry
            .descriptors()
            .iter()
            .map(|d| FormatInfo {
                identifier: d.identifier,
                aliases: d.aliases,
                schema_version: d.schema_version,
                default_filenames: d.default_filenames,
                description: d.description,
            })
            .collect();
        println!("{}", json_pretty(&infos)?);
        return Ok(EXIT_SUCCESS);
    }

    for identifier in registry.list_formats() {
        let d = registry.lookup(identifier).map_err(|e| e.to_string())?;
        let aliases = if d.aliases.is_empty() {
            String::new()
        } else {
            format!(" (alias: {})", d.aliases.join(", "))
        };
        println!("{identifier}{aliases}");
        println!(
            "    {} [schema {}, {}]",
            d.description,
            d.schema_version,
            d.default_filenames.join(", ")
        );
    }
    Ok(EXIT_SUCCESS)
}
