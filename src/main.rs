mod coms;
mod config;
mod driver;
mod instance;
mod language;
mod preprocess;

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;

use config::{Args, Config};
use coms::{ComError, ComHandler};
use instance::Instance;
use language::{profile_for, ResolutionError};
use preprocess::{Options, RunConfig};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    config.apply_args(&args);
    if let Err(err) = config.save() {
        log::warn!("cannot persist configuration: {}", err);
    }

    if args.once {
        return run_standalone(&args);
    }

    // A host may already own the port; hand the work over rather than
    // competing for the same files.
    if !args.server || args.client {
        if let Some(file) = &args.file {
            match coms::hand_over(config.port, file) {
                Ok(()) => {
                    log::info!("handed {} to the running host", file.display());
                    return Ok(());
                }
                Err(ComError::Io(_)) => log::info!("no running host"),
                Err(err) => return Err(err.into()),
            }
        }
    } else if coms::host_alive(config.port) {
        log::info!("a host is already running on port {}", config.port);
        return Ok(());
    }

    if args.client {
        return Err("no running host to hand the file to".into());
    }

    serve(args, config)
}

/// `--once`: expand a file straight to stdout, no watching, no header.
fn run_standalone(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let Some(file) = &args.file else {
        return Err("--once requires a file".into());
    };
    let profile = match &args.lang {
        Some(lang) => profile_for(lang)?,
        None => {
            let ext = file
                .extension()
                .and_then(|ext| ext.to_str())
                .ok_or_else(|| ResolutionError::NoExtension(file.display().to_string()))?;
            profile_for(ext)?
        }
    };

    let config = RunConfig {
        profile,
        options: Options::default(),
    };
    let output = driver::run_once(file, &config)?;
    if args.raw {
        println!("{}", output.text);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}

fn serve(args: Args, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let projects_dir = config.projects_root()?;
    std::fs::create_dir_all(&projects_dir)?;
    log::info!("projects folder: {}", projects_dir.display());

    let handler = ComHandler::bind(config.port)?;
    log::info!("hosting on port {}", config.port);

    let instances: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));

    if let Some(file) = args.file {
        if let Err(err) = start_instance(file, projects_dir.clone(), args.lang, &instances) {
            log::error!("{}", err);
        }
    }

    handler.listen(move |file| start_instance(file, projects_dir.clone(), None, &instances));
    Ok(())
}

/// Register a target file and process it on its own thread. Repeat
/// requests for a file already being managed are accepted and ignored.
fn start_instance(
    file: PathBuf,
    projects_dir: PathBuf,
    lang: Option<String>,
    instances: &Arc<Mutex<HashSet<PathBuf>>>,
) -> Result<(), String> {
    if !file.is_file() {
        return Err(format!("{} does not exist", file.display()));
    }

    {
        let mut held = instances
            .lock()
            .map_err(|_| "instance registry poisoned".to_string())?;
        if !held.insert(file.clone()) {
            log::info!("already managing {}", file.display());
            return Ok(());
        }
    }

    let registry = Arc::clone(instances);
    std::thread::spawn(move || {
        if let Err(err) = Instance::new(file.clone(), projects_dir, lang).run() {
            log::error!("instance {} failed: {}", file.display(), err);
        }
        if let Ok(mut held) = registry.lock() {
            held.remove(&file);
        }
    });
    Ok(())
}
