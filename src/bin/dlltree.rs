extern crate dlltree;

use anyhow::Context;
use clap::Parser;
use dlltree::printer::{report, write_list, write_tree};
use dlltree::{decanonicalize, path_to_string, LookupPath, LookupTarget, WindowsSystem};
use fs_err as fs;
use std::io::Write;
use std::path::PathBuf;

/// ldd for PE binaries: list the DLLs a Windows executable transitively depends on
#[derive(Debug, Parser)]
#[command(name = "dlltree", version, about, long_about = None)]
struct Cli {
    /// Target file (.exe or .dll)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Additional directories to search (separated by ';'); can be repeated
    #[arg(short = 'a', long = "userpath", value_name = "PATH")]
    user_path: Vec<String>,

    /// Working directory to be considered in the DLL lookup path (default: directory of INPUT)
    #[arg(short = 'k', long, value_name = "WORKDIR")]
    workdir: Option<PathBuf>,

    /// Windows partition to use for system DLL lookup (default: the partition INPUT lies in, if any)
    #[arg(short = 'w', long, value_name = "WINDOWS_ROOT")]
    windows_root: Option<PathBuf>,

    /// Read the complete DLL lookup path from a .dwp file (Dependency Walker's format)
    #[arg(long, value_name = "DWP_FILE_PATH", conflicts_with = "no_default_path")]
    dwp_file_path: Option<PathBuf>,

    /// Only search the directory of INPUT and the user path
    #[arg(long)]
    no_default_path: bool,

    /// Print the full path of every DLL instead of its name
    #[arg(long)]
    full_path: bool,

    /// Print the dependency tree, indented by depth
    #[arg(long)]
    tree: bool,

    /// Path for output in JSON format
    #[arg(short = 'j', long, value_name = "OUTPUT_JSON_PATH")]
    output_json_path: Option<PathBuf>,

    /// Enable verbose (debug-level) logging output
    #[arg(short, long)]
    verbose: bool,
}

fn user_path_entries(specs: &[String]) -> Result<Vec<PathBuf>, std::io::Error> {
    specs
        .iter()
        .flat_map(|entries| entries.split(';'))
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let p = std::path::Path::new(s);
            if p.is_dir() {
                Some(fs::canonicalize(p))
            } else {
                log::warn!("Skipping non-existing path entry {}", s);
                None
            }
        })
        .collect()
}

#[cfg(windows)]
fn default_system(_target: &LookupTarget) -> Option<WindowsSystem> {
    match WindowsSystem::current() {
        Ok(system) => Some(system),
        Err(e) => {
            log::warn!("Could not query the Windows directories: {}", e);
            None
        }
    }
}

#[cfg(not(windows))]
fn default_system(target: &LookupTarget) -> Option<WindowsSystem> {
    WindowsSystem::from_exe_location(&target.target_exe)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();

    if !cli.input.exists() {
        eprintln!(
            "Specified file not found at {}\nCurrent working directory: {}",
            cli.input.display(),
            std::env::current_dir()?.display(),
        );
        std::process::exit(1);
    }
    if cli.input.is_dir() {
        eprintln!(
            "The specified path is a directory, not a PE executable file: {}",
            cli.input.display(),
        );
        std::process::exit(1);
    }

    let mut target = LookupTarget::deduce_from_executable_location(&cli.input)?;
    if let Some(workdir) = &cli.workdir {
        target.working_dir =
            fs::canonicalize(workdir).context("Could not open the working directory")?;
    }
    target.user_path = user_path_entries(&cli.user_path)?;

    let system = match &cli.windows_root {
        Some(root) => {
            let system = WindowsSystem::from_root(root);
            if system.is_none() {
                log::warn!("No Windows installation found at {}", root.display());
            }
            system
        }
        None => default_system(&target),
    };
    if system.is_none() {
        log::info!("Windows directories unknown; system DLL imports will not be resolved");
    }

    let lookup_path = if let Some(dwp_file_path) = &cli.dwp_file_path {
        LookupPath::from_dwp_file(dwp_file_path, &target, system.as_ref())?
    } else if cli.no_default_path {
        LookupPath::user_only(&target)
    } else {
        LookupPath::deduce(&target, system.as_ref())
    };
    if !lookup_path.has_executable_dir() {
        log::warn!(
            "The lookup path does not contain the directory of {}; the root will be resolved elsewhere or not at all",
            target.target_exe.display()
        );
    }
    let search_path = lookup_path.search_path();

    let decanonicalized_path: Vec<String> = search_path
        .iter()
        .map(|p| decanonicalize(&path_to_string(p)))
        .collect();
    log::info!("Search path: {}", decanonicalized_path.join(", "));

    let root_name = target.module_name()?;
    let tree = dlltree::lookup(&root_name, search_path)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if cli.tree {
        write_tree(&tree, &mut out)?;
    } else {
        write_list(&tree, &mut out, cli.full_path)?;
    }
    out.flush()?;

    if let Some(json_output_path) = &cli.output_json_path {
        let js = serde_json::to_string_pretty(&report(&tree)).context("Error serializing")?;
        fs::write(json_output_path, js)
            .with_context(|| format!("couldn't write to {}", json_output_path.display()))?;
        log::info!("successfully wrote to {}", json_output_path.display());
    }

    Ok(())
}
