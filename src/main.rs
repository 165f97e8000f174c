use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use facegather::config::Config;
use facegather::download::HttpFetcher;
use facegather::faces::{
    detector_for_backend, DetectorBackend, DistanceMetric, FaceModels, FaceVerifier,
    RecognitionModel, VerifyOptions,
};
use facegather::logging;
use facegather::pipeline::{Acquisition, IntegrityChecker, Predictor};
use facegather::search::DuckDuckGoSearch;

const DEFAULT_COUNT: usize = 10;

#[derive(Debug, PartialEq)]
enum Command {
    Acquire {
        names: Vec<String>,
        names_file: Option<PathBuf>,
        count: usize,
        out: Option<PathBuf>,
    },
    Predict {
        subject: Option<String>,
        out: Option<PathBuf>,
        detector: Option<String>,
        export: bool,
    },
    Check {
        folder: PathBuf,
        detector: Option<String>,
        model: Option<String>,
        metric: Option<DistanceMetric>,
        export: bool,
    },
}

#[derive(Debug, PartialEq)]
enum Invocation {
    Run {
        config_path: Option<PathBuf>,
        command: Command,
    },
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut config_path = None;
    let mut subcommand = None;
    let mut positional = Vec::new();
    let mut names_file = None;
    let mut count = DEFAULT_COUNT;
    let mut out = None;
    let mut subject = None;
    let mut detector = None;
    let mut model = None;
    let mut metric = None;
    let mut no_csv = false;
    let mut export = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut value = || -> Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| anyhow!("{} requires a value", arg))
        };

        match arg {
            "--help" | "-h" => return Ok(Invocation::Help),
            "--version" | "-V" => return Ok(Invocation::Version),
            "--config" | "-c" => config_path = Some(PathBuf::from(value()?)),
            "--count" | "-n" => {
                let raw = value()?;
                count = raw
                    .parse()
                    .map_err(|_| anyhow!("--count expects a positive number, got {:?}", raw))?;
            }
            "--names-file" => names_file = Some(PathBuf::from(value()?)),
            "--out" | "-o" => out = Some(PathBuf::from(value()?)),
            "--subject" | "-s" => subject = Some(value()?),
            "--detector" | "-d" => detector = Some(value()?),
            "--model" | "-m" => model = Some(value()?),
            "--metric" => metric = Some(value()?.parse::<DistanceMetric>()?),
            "--no-csv" => no_csv = true,
            "--export" => export = true,
            flag if flag.starts_with('-') => return Err(anyhow!("Unknown argument: {}", flag)),
            word if subcommand.is_none() => subcommand = Some(word.to_string()),
            word => positional.push(word.to_string()),
        }
        i += 1;
    }

    let command = match subcommand.as_deref() {
        Some("acquire") => {
            if positional.is_empty() && names_file.is_none() {
                return Err(anyhow!("acquire needs at least one name or --names-file"));
            }
            if count == 0 {
                return Err(anyhow!("--count must be at least 1"));
            }
            Command::Acquire {
                names: positional,
                names_file,
                count,
                out,
            }
        }
        Some("predict") => Command::Predict {
            subject,
            out,
            detector,
            export: !no_csv,
        },
        Some("check") => {
            let mut positional = positional.into_iter();
            let folder = positional
                .next()
                .ok_or_else(|| anyhow!("check needs a folder"))?;
            Command::Check {
                folder: PathBuf::from(folder),
                detector,
                model,
                metric,
                export,
            }
        }
        Some(other) => return Err(anyhow!("Unknown command: {}", other)),
        None => return Ok(Invocation::Help),
    };

    Ok(Invocation::Run {
        config_path,
        command,
    })
}

fn print_help() {
    println!(
        r#"facegather - collect face images and predict demographics

USAGE:
    facegather acquire <NAME>... [--count N] [--names-file FILE] [--out DIR]
    facegather predict [--subject NAME] [--out DIR] [--detector BACKEND] [--no-csv]
    facegather check <FOLDER> [--detector BACKEND] [--model MODEL] [--metric METRIC] [--export]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

    Detector backends: ultraface, skip
    Models: ArcFace, Facenet, Facenet512, OpenFace
    Metrics: cosine, euclidean, euclidean_l2

ENVIRONMENT:
    FACEGATHER_CONFIG   Path to config file (overrides default location)
    FACEGATHER_LOG      Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/facegather/config.toml"#
    );
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, command) = match parse_args(&args) {
        Ok(Invocation::Run {
            config_path,
            command,
        }) => (config_path, command),
        Ok(Invocation::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("facegather {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let config = match config_path {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load()?,
    };

    if let Err(e) = logging::init(&config.logging, Config::config_dir().join("logs")) {
        eprintln!("Logging unavailable: {}", e);
    }

    let models = FaceModels::new(&config.models);

    match command {
        Command::Acquire {
            mut names,
            names_file,
            count,
            out,
        } => {
            if let Some(path) = names_file {
                names.extend(read_names(&path)?);
            }
            let root = out.unwrap_or_else(|| config.output_dir.clone());
            run_acquire(&config, &models, &names, count, &root)
        }
        Command::Predict {
            subject,
            out,
            detector,
            export,
        } => {
            let root = out.unwrap_or_else(|| config.output_dir.clone());
            let detector = detector.unwrap_or_else(|| config.analysis.detector_backend.clone());
            detector.parse::<DetectorBackend>()?;

            let table = Predictor::new(&models.classifier)
                .with_extensions(config.analysis.image_extensions.clone())
                .predict(&root, subject.as_deref(), &detector, export)?;

            for record in &table.records {
                println!("{}\t{}", record.path.display(), record.dominant);
            }
            println!("{} images predicted", table.len());
            Ok(())
        }
        Command::Check {
            folder,
            detector,
            model,
            metric,
            export,
        } => {
            let detector = detector.unwrap_or_else(|| config.analysis.detector_backend.clone());
            let model = model.unwrap_or_else(|| config.analysis.model.clone());
            let metric = metric.unwrap_or(config.analysis.distance_metric);
            model.parse::<RecognitionModel>()?;
            let face_detector = detector_for_backend(&detector, &models.detector)?;

            let report = IntegrityChecker::new(face_detector.as_ref(), &models.verifier)
                .with_extensions(config.analysis.image_extensions.clone())
                .check(&folder, &detector, metric, &model)?;

            for record in report.irregular() {
                println!("{}: {} faces", record.image.display(), record.n_faces);
            }
            for pair in report.duplicates() {
                println!(
                    "duplicate: {} ~ {} (distance {:.4})",
                    pair.image1.display(),
                    pair.image2.display(),
                    pair.distance
                );
            }
            println!(
                "{} images, {} pairs checked",
                report.face_counts.len(),
                report.duplicate_pairs.len()
            );

            if export {
                report.write_csv(&folder)?;
            }
            Ok(())
        }
    }
}

fn run_acquire(
    config: &Config,
    models: &FaceModels,
    names: &[String],
    count: usize,
    root: &Path,
) -> Result<()> {
    let search = DuckDuckGoSearch::new(&config.search);
    let fetcher = HttpFetcher::new(&config.download);
    let detector = detector_for_backend(&config.analysis.detector_backend, &models.detector)?;
    config.analysis.model.parse::<RecognitionModel>()?;
    let options = VerifyOptions {
        model: config.analysis.model.clone(),
        metric: config.analysis.distance_metric,
        detector_backend: config.analysis.detector_backend.clone(),
    };
    detector.prepare().context("Failed to load detection model")?;
    models
        .verifier
        .prepare(&options)
        .context("Failed to load recognition model")?;

    let delays = config
        .search
        .retry_delays_secs
        .iter()
        .copied()
        .map(Duration::from_secs)
        .collect();

    let acquisition = Acquisition::new(&search, &fetcher, detector.as_ref(), &models.verifier, options)
        .with_retry_delays(delays);

    for (name, result) in acquisition.run_all(names, count, root) {
        match result {
            Ok(report) => println!(
                "{}: {}/{} images in {} ({} candidates)",
                name,
                report.accepted.len(),
                count,
                report.folder.display(),
                report.attempted
            ),
            Err(e) => println!("{}: failed: {}", name, e),
        }
    }

    Ok(())
}

/// One subject per line; blank lines and `#` comments are ignored.
fn read_names(path: &Path) -> Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(parse_names(&content))
}

fn parse_names(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_acquire() {
        let parsed = parse_args(&args(&["acquire", "Jane Doe", "John Roe", "-n", "3", "--out", "/tmp/out"])).unwrap();
        assert_eq!(
            parsed,
            Invocation::Run {
                config_path: None,
                command: Command::Acquire {
                    names: vec!["Jane Doe".to_string(), "John Roe".to_string()],
                    names_file: None,
                    count: 3,
                    out: Some(PathBuf::from("/tmp/out")),
                },
            }
        );
    }

    #[test]
    fn test_parse_predict_defaults_to_export() {
        let parsed = parse_args(&args(&["predict", "--subject", "jane_doe", "-d", "opencv"])).unwrap();
        assert_eq!(
            parsed,
            Invocation::Run {
                config_path: None,
                command: Command::Predict {
                    subject: Some("jane_doe".to_string()),
                    out: None,
                    detector: Some("opencv".to_string()),
                    export: true,
                },
            }
        );

        let parsed = parse_args(&args(&["predict", "--no-csv"])).unwrap();
        assert!(matches!(
            parsed,
            Invocation::Run { command: Command::Predict { export: false, .. }, .. }
        ));
    }

    #[test]
    fn test_parse_check() {
        let parsed = parse_args(&args(&["-c", "my.toml", "check", "faces/jane_doe", "--metric", "cosine", "--export"])).unwrap();
        assert_eq!(
            parsed,
            Invocation::Run {
                config_path: Some(PathBuf::from("my.toml")),
                command: Command::Check {
                    folder: PathBuf::from("faces/jane_doe"),
                    detector: None,
                    model: None,
                    metric: Some(DistanceMetric::Cosine),
                    export: true,
                },
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["acquire"])).is_err());
        assert!(parse_args(&args(&["acquire", "x", "--count", "0"])).is_err());
        assert!(parse_args(&args(&["acquire", "x", "--count"])).is_err());
        assert!(parse_args(&args(&["check"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["predict", "--bogus"])).is_err());
        assert_eq!(parse_args(&args(&[])).unwrap(), Invocation::Help);
        assert_eq!(parse_args(&args(&["predict", "-V"])).unwrap(), Invocation::Version);
    }

    #[test]
    fn test_parse_names() {
        let names = parse_names("Jane Doe\n\n# skipped\n  John Roe  \n");
        assert_eq!(names, vec!["Jane Doe", "John Roe"]);
    }
}
