mod config;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{anyhow, Context, Result};
use config::{retrieve_configuration, MkMergeConfiguration};
use log::LevelFilter;
use mergemod::compiler::{compile, DirectorySource};
use mergemod::extractor::extract;
use mergemod::loader::{load_merge_mod, MERGE_MOD_EXTENSION};
use simple_logger::SimpleLogger;
use structopt::StructOpt;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
const LIB_NAME: &str = "mergemod";

#[derive(Debug, StructOpt)]
#[structopt(name = PKG_NAME, about = PKG_DESCRIPTION, author = PKG_AUTHORS)]
struct Opt {
    #[structopt(short, long, help = "Enable verbose logging")]
    verbose: bool,
    #[structopt(
        parse(from_os_str),
        short,
        long,
        help = "Path to a configuration file (default: mkmerge.yml if present)"
    )]
    config: Option<PathBuf>,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    #[structopt(about = "Compile a merge mod manifest and its files into a .m3m file")]
    Compile {
        #[structopt(parse(from_os_str), help = "Path to a manifest file (JSON or YAML)")]
        manifest_file: PathBuf,
        #[structopt(
            parse(from_os_str),
            short,
            long,
            help = "Path to the directory that contains referenced files (default: the manifest's directory)"
        )]
        source_directory: Option<PathBuf>,
        #[structopt(
            parse(from_os_str),
            short,
            long,
            help = "Path to the output file (default: <manifest_file_name>.m3m)"
        )]
        output_file: Option<PathBuf>,
    },
    #[structopt(about = "Extract a .m3m file into a manifest and loose files")]
    Extract {
        #[structopt(parse(from_os_str), help = "Path to a .m3m file")]
        merge_mod_file: PathBuf,
        #[structopt(
            parse(from_os_str),
            short,
            long,
            help = "Path to the output directory (default: <merge_mod_file_name>)"
        )]
        output_directory: Option<PathBuf>,
    },
    #[structopt(about = "Display what a .m3m file contains")]
    Info {
        #[structopt(parse(from_os_str), help = "Path to a .m3m file")]
        merge_mod_file: PathBuf,
    },
}

fn run(cli_args: Opt) -> Result<()> {
    let config = retrieve_configuration(cli_args.config.as_deref())
        .context("Failed to load the configuration")?;
    match cli_args.command {
        Command::Compile {
            manifest_file,
            source_directory,
            output_file,
        } => run_compile(&config, &manifest_file, source_directory, output_file),
        Command::Extract {
            merge_mod_file,
            output_directory,
        } => run_extract(&config, &merge_mod_file, output_directory),
        Command::Info { merge_mod_file } => run_info(&config, &merge_mod_file),
    }
}

fn run_compile(
    config: &MkMergeConfiguration,
    manifest_file: &Path,
    source_directory: Option<PathBuf>,
    output_file: Option<PathBuf>,
) -> Result<()> {
    let source_directory = source_directory.unwrap_or_else(|| {
        manifest_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let output_file_path = match output_file {
        Some(v) => v,
        None => default_output_path(
            config,
            manifest_file.with_extension(MERGE_MOD_EXTENSION).file_name(),
        )?,
    };

    let content = compile(manifest_file, &DirectorySource::new(source_directory))
        .context("Failed to compile the merge mod")?;
    fs::write(&output_file_path, content).with_context(|| {
        format!(
            "Failed to write '{}'",
            output_file_path.to_string_lossy()
        )
    })?;
    log::info!(
        "Merge mod generated at '{}'",
        output_file_path.to_string_lossy()
    );
    Ok(())
}

fn run_extract(
    config: &MkMergeConfiguration,
    merge_mod_file: &Path,
    output_directory: Option<PathBuf>,
) -> Result<()> {
    let output_directory = match output_directory {
        Some(v) => v,
        None => default_output_path(config, merge_mod_file.file_stem())?,
    };
    let merge_mod = load_merge_mod(merge_mod_file, false)
        .with_context(|| format!("Cannot read '{}'", merge_mod_file.to_string_lossy()))?;
    let manifest_path =
        extract(merge_mod, &output_directory).context("Failed to extract the merge mod")?;
    log::info!("Manifest written at '{}'", manifest_path.to_string_lossy());
    Ok(())
}

fn run_info(config: &MkMergeConfiguration, merge_mod_file: &Path) -> Result<()> {
    let merge_mod = load_merge_mod(merge_mod_file, false)
        .with_context(|| format!("Cannot read '{}'", merge_mod_file.to_string_lossy()))?;
    log::info!("Merge mod: {}", merge_mod.name());
    log::info!("Game: {}", merge_mod.game());
    log::info!("Changes: {}", merge_mod.merge_count());
    log::info!("Weight: {}", merge_mod.merge_weight());
    for target_file in merge_mod.target_files(&config.localization_table()) {
        log::info!("Target: '{}'", target_file);
    }
    let assets = merge_mod.assets();
    for asset_name in assets.names() {
        let size = assets.get(asset_name).map(|a| a.size()).unwrap_or(0);
        log::info!("Asset: '{}' ({} bytes)", asset_name, size);
    }
    Ok(())
}

/// `file_name` inside the configured output directory, or the current
/// working directory.
fn default_output_path(
    config: &MkMergeConfiguration,
    file_name: Option<&std::ffi::OsStr>,
) -> Result<PathBuf> {
    let file_name = file_name.ok_or_else(|| anyhow!("Invalid input file name"))?;
    Ok(match &config.output_directory {
        Some(output_directory) => output_directory.join(file_name),
        None => PathBuf::from(file_name),
    })
}

fn main() {
    const SUCCESS_EXIT_CODE: i32 = 0;
    const FAILURE_EXIT_CODE: i32 = 1;

    // Parse CLI arguments
    let cli_args = Opt::from_args();
    // Initialize the logger
    if let Err(e) = init_logger(cli_args.verbose) {
        eprintln!("Failed to initialize the logger: {}", e);
        process::exit(FAILURE_EXIT_CODE);
    }

    // Run the actual program
    let result = run(cli_args);
    match result {
        Ok(()) => {
            process::exit(SUCCESS_EXIT_CODE);
        }
        Err(err) => {
            log::error!("{:#}", err);
            process::exit(FAILURE_EXIT_CODE);
        }
    }
}

fn init_logger(verbose: bool) -> Result<()> {
    let level_filter = if verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };

    SimpleLogger::new()
        .with_level(LevelFilter::Off)
        .with_module_level(PKG_NAME, level_filter)
        .with_module_level(LIB_NAME, level_filter)
        .init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_compile_info_extract() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("Tick.uc"), "function Tick();").unwrap();
        fs::write(
            root.join("mymod.yml"),
            "game: LE2\nfiles:\n  - filename: SFXGame.pcc\n    changes:\n      - entryname: SFXPawn.Tick\n        scriptupdate:\n          scriptfilename: Tick.uc\n",
        )
        .unwrap();
        let config = MkMergeConfiguration {
            output_directory: Some(root.join("out")),
            ..Default::default()
        };
        fs::create_dir_all(root.join("out")).unwrap();

        run_compile(&config, &root.join("mymod.yml"), None, None).unwrap();
        let merge_mod_file = root.join("out").join("mymod.m3m");
        assert!(merge_mod_file.is_file());
        run_info(&config, &merge_mod_file).unwrap();
        run_extract(&config, &merge_mod_file, None).unwrap();
        assert_eq!(
            fs::read_to_string(root.join("out/mymod/Tick.uc")).unwrap(),
            "function Tick();"
        );
        assert!(root.join("out/mymod/mymod.json").is_file());
        assert!(run_info(&config, &root.join("missing.m3m")).is_err());
    }
}
