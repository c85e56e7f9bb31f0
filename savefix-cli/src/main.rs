use clap::Parser;
use std::path::PathBuf;
use std::process;

use savefix_core::{run, PatchSettings};

#[derive(Debug, Parser)]
#[command(
    name = "factorio-savefix",
    version,
    about = "Re-enable achievements in a Factorio save by clearing the flags that disabled them"
)]
struct Args {
    /// Path to the save zip to inspect.
    save: PathBuf,

    /// Apply the patch. Without this flag the run is a dry run that
    /// only reports what would change.
    #[arg(long)]
    patch: bool,

    /// JSON file with a custom rule catalog (defaults to the built-in
    /// rules).
    #[arg(long, value_name = "JSON")]
    rules: Option<PathBuf>,

    /// Keep the extracted directory instead of cleaning it up.
    #[arg(long, default_value_t = false)]
    keep_extracted: bool,

    /// Verbose diagnostics, plus a full patch log written next to the
    /// save.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.debug);

    let settings = PatchSettings {
        save_path: args.save,
        apply: args.patch,
        rules_path: args.rules,
        keep_extracted: args.keep_extracted,
        debug: args.debug,
    };

    match run(settings) {
        Ok(summary) => {
            if summary.repacked {
                println!(
                    "Cleared {} flag byte(s) across {} payload(s); save repacked, original kept as .bak.",
                    summary.targets_confirmed, summary.payloads_patched
                );
            } else if summary.targets_confirmed > 0 {
                println!(
                    "Dry run: {} flag byte(s) would be cleared. Re-run with --patch to apply.",
                    summary.targets_confirmed
                );
            } else {
                println!("No patchable flag bytes found; save left untouched.");
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    }
}
