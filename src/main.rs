use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use picbest::config::Config;
use picbest::db::Database;
use picbest::export::{
    export_file_list, selection_summary, ExportJob, ListFormat, Selection,
};
use picbest::logging;
use picbest::pipeline::IndexJob;
use picbest::tasks::{Job, JobId, JobManager, JobSnapshot, JobStatus};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

enum Command {
    Index {
        dir: Option<PathBuf>,
        recluster: bool,
        time_weight: Option<f64>,
        eps: Option<f64>,
    },
    Export {
        dest: PathBuf,
        manifest: bool,
        xmp: bool,
    },
    List {
        file: PathBuf,
        format: Option<ListFormat>,
        selection: Selection,
    },
    Stats,
    Jobs {
        clear_stale: bool,
    },
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;
    let mut positional: Vec<String> = Vec::new();
    let mut recluster = false;
    let mut time_weight = None;
    let mut eps = None;
    let mut manifest = true;
    let mut format = None;
    let mut xmp = false;
    let mut selection = Selection::Starred;
    let mut clear_stale = false;

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| -> Result<&String> {
            args.get(i + 1)
                .with_context(|| format!("{} requires a value", args[i]))
        };
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("picbest {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--recluster" => recluster = true,
            "--no-manifest" => manifest = false,
            "--xmp" => xmp = true,
            "--rejected" => selection = Selection::Rejected,
            "--clear-stale" => clear_stale = true,
            "--time-weight" => {
                let raw = value(i)?;
                time_weight = Some(raw.parse().with_context(|| format!("Invalid --time-weight '{}'", raw))?);
                i += 1;
            }
            "--eps" => {
                let raw = value(i)?;
                eps = Some(raw.parse().with_context(|| format!("Invalid --eps '{}'", raw))?);
                i += 1;
            }
            "--format" | "-f" => {
                format = Some(value(i)?.parse()?);
                i += 1;
            }
            flag if flag.starts_with('-') => bail!("Unknown argument: {}", flag),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("index") => {
            let dir = positional.next().map(PathBuf::from);
            if dir.is_none() && !recluster {
                bail!("index requires a photo directory (or --recluster)");
            }
            Command::Index {
                dir,
                recluster,
                time_weight,
                eps,
            }
        }
        Some("export") => Command::Export {
            dest: positional
                .next()
                .map(PathBuf::from)
                .context("export requires a destination directory")?,
            manifest,
            xmp,
        },
        Some("list") => Command::List {
            file: positional
                .next()
                .map(PathBuf::from)
                .context("list requires an output file")?,
            format,
            selection,
        },
        Some("stats") => Command::Stats,
        Some("jobs") => Command::Jobs { clear_stale },
        Some(other) => bail!("Unknown command: {}", other),
        None => {
            print_help();
            std::process::exit(1);
        }
    };
    if let Some(extra) = positional.next() {
        bail!("Unexpected argument: {}", extra);
    }

    Ok(Args {
        config_path,
        command,
    })
}

fn print_help() {
    println!(
        r#"picbest - photo culling: cluster similar shots, pick the best, export

USAGE:
    picbest [OPTIONS] <COMMAND>

COMMANDS:
    index <DIR>         Scan DIR, embed new photos and recluster the catalog
        --recluster         Only recompute duplicate groups and clusters (DIR optional)
        --time-weight W     Distance bonus for photos taken close together (0-1)
        --eps E             Radius for the fixed-radius clustering fallback
    export <DEST>       Copy starred photos into DEST, skipping ones already there
        --no-manifest       Do not write manifest.json
        --xmp               Write a <name>.xmp rating sidecar next to each photo
    list <FILE>         Write the starred photo list to FILE
        --format, -f F      txt, json, csv or names (default: from FILE's extension)
        --rejected          List rejected photos instead
    stats               Show catalog and selection counts
    jobs                Show recent index and export jobs
        --clear-stale       Mark jobs left running by a killed process as failed

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PICBEST_CONFIG      Path to config file (overrides default location)
    PICBEST_LOG         Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/picbest/config.toml"#
    );
}

fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!("Run 'picbest --help' for usage.");
            std::process::exit(2);
        }
    };

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let mut config = match args.config_path {
        Some(ref path) => Config::load_from(path)
            .with_context(|| format!("Cannot load config {}", path.display()))?,
        None => Config::load()?,
    };

    match args.command {
        Command::Index {
            dir,
            recluster,
            time_weight,
            eps,
        } => {
            if let Some(w) = time_weight {
                config.clustering.time_weight = w;
            }
            if let Some(e) = eps {
                config.clustering.dbscan_eps = e;
            }
            let job = match dir {
                Some(dir) if !recluster => IndexJob::new(config, dir),
                _ => IndexJob::recluster(config),
            };
            run_to_completion(job, print_index_status)
        }
        Command::Export {
            dest,
            manifest,
            xmp,
        } => {
            let job = ExportJob::new(&config, dest)
                .include_manifest(manifest)
                .write_xmp(xmp || config.export.write_xmp);
            run_to_completion(job, print_export_status)
        }
        Command::List {
            file,
            format,
            selection,
        } => {
            let format = match format {
                Some(format) => format,
                None => format_from_extension(&file)?,
            };
            let db = Database::open_initialized(&config.db_path)?;
            let count = export_file_list(&db, &file, format, selection)?;
            println!(
                "Wrote {} {} photos to {}",
                count,
                selection.as_str(),
                file.display()
            );
            Ok(())
        }
        Command::Stats => print_stats(&config),
        Command::Jobs { clear_stale } => print_jobs(&config, clear_stale),
    }
}

fn format_from_extension(file: &Path) -> Result<ListFormat> {
    match file.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.parse(),
        None => Ok(ListFormat::Txt),
    }
}

/// Start `job`, print its status every second until it ends, and turn a
/// failed job into a non-zero exit.
fn run_to_completion<J, F>(job: J, print: F) -> Result<()>
where
    J: Job,
    F: Fn(&JobSnapshot),
{
    let manager = JobManager::new();
    let id = manager.start(job)?;
    let last = poll(&manager, id, &print)?;

    match last.status {
        JobStatus::Complete => {
            println!("{}", last.message);
            if !last.errors.is_empty() {
                eprintln!("{} item errors:", last.errors.len());
                for error in last.errors.iter().take(10) {
                    eprintln!("  - {}", error);
                }
                if last.errors.len() > 10 {
                    eprintln!("  ... and {} more", last.errors.len() - 10);
                }
            }
            Ok(())
        }
        JobStatus::Cancelled => {
            println!("{} cancelled", last.kind.display_name());
            Ok(())
        }
        _ => bail!(
            "{} failed: {}",
            last.kind.display_name(),
            last.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn poll(manager: &JobManager, id: JobId, print: &dyn Fn(&JobSnapshot)) -> Result<JobSnapshot> {
    loop {
        let snapshot = manager
            .status(id)
            .with_context(|| format!("Job {} disappeared", id))?;
        if snapshot.status.is_terminal() {
            return Ok(manager.join(id)?);
        }
        print(&snapshot);
        thread::sleep(POLL_INTERVAL);
    }
}

fn print_index_status(snapshot: &JobSnapshot) {
    let view = snapshot.index_view();
    println!(
        "[{:>3}%] {:<10} {}/{} {}",
        view.percent,
        view.phase.as_str(),
        view.current,
        view.total,
        view.message
    );
}

fn print_export_status(snapshot: &JobSnapshot) {
    let view = snapshot.export_view();
    println!(
        "[{}/{}] copied {}, skipped {}, errors {}",
        view.progress,
        view.total,
        view.copied,
        view.skipped,
        view.errors.len()
    );
}

fn print_stats(config: &Config) -> Result<()> {
    let db = Database::open_initialized(&config.db_path)?;
    let stats = db.stats()?;
    let selection = selection_summary(&db)?;

    println!("Catalog: {}", config.db_path.display());
    println!("  Photos              : {}", stats.total_photos);
    println!("  Embedded            : {}", stats.embedded);
    println!(
        "  Duplicate groups    : {} ({} photos)",
        stats.duplicate_groups, stats.photos_in_duplicate_groups
    );
    println!(
        "  Clusters            : {} ({} with several photos)",
        stats.total_clusters, stats.multi_photo_clusters
    );
    println!("  Rated               : {}", stats.rated);
    println!("  Starred             : {}", selection.starred);
    println!("  Rejected            : {}", selection.rejected);

    Ok(())
}

fn print_jobs(config: &Config, clear_stale: bool) -> Result<()> {
    let db = Database::open_initialized(&config.db_path)?;
    if clear_stale {
        let cleared = db.fail_abandoned_jobs()?;
        println!("Marked {} interrupted jobs as failed", cleared);
    }

    let jobs = db.recent_jobs(10)?;
    if jobs.is_empty() {
        println!("No jobs recorded");
        return Ok(());
    }
    for job in jobs {
        println!(
            "  {} {:<6} {:<9} {}",
            job.started_at, job.kind, job.status, job.message
        );
        if let Some(error) = job.error {
            println!("      {}", error);
        }
    }
    Ok(())
}
