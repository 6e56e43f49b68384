use anyhow::{Context, Result};
use appx::{Appx, Signer};
use clap::Parser;
use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

mod mapping;

const PASSPHRASE_ENV: &str = "APPX_SIGN_PASSPHRASE";
const LEVELS: [&str; 10] = [
    "level0", "level1", "level2", "level3", "level4", "level5", "level6", "level7", "level8",
    "level9",
];

#[derive(Parser)]
#[clap(name = "appx", author, version)]
#[clap(about = "Creates an optionally-signed Microsoft APPX or APPXBUNDLE package.")]
#[clap(after_help = "\
An input is either:
  a directory, included recursively with archive paths relative to it,
  a file, placed at the root of the package, or
  an ARCHIVE=LOCAL pair naming one file explicitly.

A mapping file has the following form:

  [Files]
  \"/path/to/local/file.exe\" \"appx_file.exe\"

The PKCS#12 passphrase is taken from APPX_SIGN_PASSPHRASE when set.")]
struct Args {
    /// Write the package to this file
    #[clap(short, value_name = "OUTPUT")]
    output: PathBuf,
    /// Sign the package with this PKCS#12 key/certificate file
    #[clap(short = 'c', value_name = "PFX")]
    certificate: Option<PathBuf>,
    /// Read inputs from a mapping file ("-" reads standard input)
    #[clap(short = 'f', value_name = "MAPFILE")]
    mapping: Vec<String>,
    /// Produce an APPXBUNDLE instead of an APPX
    #[clap(short)]
    bundle: bool,
    /// Store files without compression (default)
    #[clap(short = '0', overrides_with_all = LEVELS)]
    level0: bool,
    #[clap(short = '1', hide = true, overrides_with_all = LEVELS)]
    level1: bool,
    #[clap(short = '2', hide = true, overrides_with_all = LEVELS)]
    level2: bool,
    #[clap(short = '3', hide = true, overrides_with_all = LEVELS)]
    level3: bool,
    #[clap(short = '4', hide = true, overrides_with_all = LEVELS)]
    level4: bool,
    #[clap(short = '5', hide = true, overrides_with_all = LEVELS)]
    level5: bool,
    #[clap(short = '6', hide = true, overrides_with_all = LEVELS)]
    level6: bool,
    #[clap(short = '7', hide = true, overrides_with_all = LEVELS)]
    level7: bool,
    #[clap(short = '8', hide = true, overrides_with_all = LEVELS)]
    level8: bool,
    /// Best ZIP compression
    #[clap(short = '9', overrides_with_all = LEVELS)]
    level9: bool,
    /// Directories, files, or ARCHIVE=LOCAL pairs to include
    #[clap(value_name = "INPUT")]
    inputs: Vec<String>,
}

impl Args {
    fn level(&self) -> u32 {
        let flags = [
            self.level0,
            self.level1,
            self.level2,
            self.level3,
            self.level4,
            self.level5,
            self.level6,
            self.level7,
            self.level8,
            self.level9,
        ];
        flags
            .iter()
            .position(|set| *set)
            .map(|level| level as u32)
            .unwrap_or(0)
    }
}

fn main() {
    if let Err(err) = run() {
        // One diagnostic line, however deep the error chain goes.
        eprintln!("appx: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    use tracing_subscriber::EnvFilter;
    tracing_log::LogTracer::init().ok();
    let env = std::env::var("APPX_LOG").unwrap_or_else(|_| "error".into());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let args = Args::parse();
    let mut files = BTreeMap::new();
    for map in &args.mapping {
        if map == "-" {
            let stdin = std::io::stdin();
            mapping::parse(stdin.lock(), &mut files).context("standard input")?;
        } else {
            let file = std::fs::File::open(map).with_context(|| map.clone())?;
            mapping::parse(BufReader::new(file), &mut files).with_context(|| map.clone())?;
        }
    }
    for input in &args.inputs {
        match input.split_once('=') {
            Some((archive, local)) => {
                files
                    .entry(archive.to_string())
                    .or_insert_with(|| PathBuf::from(local));
            }
            None => add_input(Path::new(input), &mut files)?,
        }
    }
    anyhow::ensure!(!files.is_empty(), "missing inputs");

    let signer = match &args.certificate {
        Some(path) => {
            let passphrase =
                Zeroizing::new(std::env::var(PASSPHRASE_ENV).unwrap_or_default());
            Some(Signer::from_pkcs12_file(path, &passphrase)?)
        }
        None => None,
    };

    let mut package = Appx::new(&args.output);
    package.set_compression_level(args.level());
    package.set_bundle(args.bundle);
    for (archive, local) in files {
        package.add_file(archive, local);
    }
    package.write(signer)?;
    Ok(())
}

/// A file lands at the archive root; a directory is walked recursively with
/// archive names relative to it.
fn add_input(path: &Path, files: &mut BTreeMap<String, PathBuf>) -> Result<()> {
    let meta = std::fs::metadata(path).with_context(|| path.display().to_string())?;
    if meta.is_dir() {
        add_tree(path, "", files)
    } else {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("unrepresentable file name `{}`", path.display()))?;
        files.entry(name.to_string()).or_insert_with(|| path.into());
        Ok(())
    }
}

fn add_tree(dir: &Path, prefix: &str, files: &mut BTreeMap<String, PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| dir.display().to_string())? {
        let entry = entry.with_context(|| dir.display().to_string())?;
        let file_name = entry.file_name();
        let name = file_name
            .to_str()
            .with_context(|| format!("unrepresentable file name in `{}`", dir.display()))?;
        let archive_name = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            add_tree(&entry.path(), &archive_name, files)?;
        } else if file_type.is_file() {
            files.entry(archive_name).or_insert_with(|| entry.path());
        }
    }
    Ok(())
}
