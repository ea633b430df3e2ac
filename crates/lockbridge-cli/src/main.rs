mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "lockbridge",
    version,
    about = "Translate conda ecosystem lockfiles between conda-lock and pixi formats"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the supported lockfile formats.
    Formats,
    /// Convert a lockfile from one format to another.
    Convert {
        /// Lockfile to read.
        input: PathBuf,
        /// Target format (defaults to `default_format` from the config file).
        #[arg(long)]
        to: Option<String>,
        /// Source format; detected from the file name and version when omitted.
        #[arg(long)]
        from: Option<String>,
        /// Load only this environment of a multi-environment lockfile.
        #[arg(long)]
        environment: Option<String>,
        /// Restrict the output to these platforms (repeatable).
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Lock an installed conda environment.
    Export {
        /// Conda environment prefix to snapshot.
        #[arg(long)]
        prefix: PathBuf,
        /// Output format (defaults to `default_format` from the config file).
        #[arg(long)]
        format: Option<String>,
        /// Restrict the output to these platforms (repeatable).
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Write to this file instead of stdout.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Summarize a lockfile.
    Inspect {
        /// Lockfile to read.
        input: PathBuf,
        /// Source format; detected from the file name and version when omitted.
        #[arg(long)]
        from: Option<String>,
        /// Load only this environment of a multi-environment lockfile.
        #[arg(long)]
        environment: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LOCKBRIDGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;

    let result = match cli.command {
        Commands::Formats => commands::formats::run(json_output),
        Commands::Convert {
            input,
            to,
            from,
            environment,
            platforms,
            output,
        } => commands::convert::run(
            &input,
            from.as_deref(),
            environment.as_deref(),
            to.as_deref(),
            &platforms,
            output.as_deref(),
            json_output,
        ),
        Commands::Export {
            prefix,
            format,
            platforms,
            file,
        } => commands::export::run(
            &prefix,
            format.as_deref(),
            &platforms,
            file.as_deref(),
            json_output,
        ),
        Commands::Inspect {
            input,
            from,
            environment,
        } => commands::inspect::run(
            &input,
            from.as_deref(),
            environment.as_deref(),
            json_output,
        ),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}
