// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apt_client::{
        config::ClientConfig,
        error::AptError,
        io::{FetchEvent, ProgressCallback},
        package_record::PackageRecord,
        repository::package_source::PackageSource,
        sources::SourceExtractor,
    },
    clap::{Arg, ArgMatches, Command},
    futures::StreamExt,
    log::debug,
    std::{
        ffi::OsStr,
        io::Write,
        path::{Path, PathBuf},
        sync::atomic::{AtomicU64, AtomicUsize, Ordering},
        time::Instant,
    },
    thiserror::Error,
    url::Url,
};

const SOURCES_ABOUT: &str = "\
Sources Files

Commands accept paths to files declaring APT sources. Both formats understood
by APT are recognized.

One-line format (`/etc/apt/sources.list`, `*.list`):

   deb [signed-by=/usr/share/keyrings/debian-archive-keyring.gpg] http://deb.debian.org/debian bookworm main contrib

   Only `deb` lines are used. Of the bracketed options, only `signed-by` is
   honored.

deb822 format (`*.sources`):

   Types: deb
   URIs: http://deb.debian.org/debian
   Suites: bookworm bookworm-updates
   Components: main contrib
   Signed-By: /usr/share/keyrings/debian-archive-keyring.gpg

   Every combination of URIs, Suites and Components becomes a source.
   `Signed-By` may also hold an armored public key block. Stanzas with
   `Enabled: no` are skipped.

When `Signed-By` is set, the `InRelease` file of the distribution must carry
a valid signature from that key and every fetched index must match the digest
`InRelease` declares for it. Sources without `Signed-By` are fetched without
verification.
";

const UPDATE_ABOUT: &str = "\
Fetch the package indices of APT sources.

Every source in the given files is resolved to the `Packages` index of its
component and architecture. Indices are fetched in parallel and each one
is reported as a `Get:` line, or as an `Err:` line if it could not be
obtained or failed verification.

If `--download-dir` is given, the first package found is downloaded into
that directory. The file is only written once its SHA-256 matches the index.

# YAML Configuration

`--config` names a YAML document with any of the following keys:

fetch_timeout_secs (integer)
   Upper bound for a single HTTP request. Default 60.

connect_timeout_secs (integer)
   Upper bound for establishing an HTTP connection. Default 15.

verify_timeout_secs (integer)
   Upper bound for a single `gpgv` invocation. Default 30.

dearmor_timeout_secs (integer)
   Upper bound for a single `gpg --dearmor` invocation. Default 5.

signature_backend (string)
   How `InRelease` signatures are verified. `gpgv` runs `gpgv_program`.
   `native` verifies in process. Default `gpgv`.

gpgv_program (string)
   Program used to verify `InRelease` signatures. Default `gpgv`.

gpg_program (string)
   Program used to convert armored keys. Default `gpg`.

user_agent (string)
   `User-Agent` header of HTTP requests.
";

#[derive(Debug, Error)]
pub enum AptFetchError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Apt(#[from] AptError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("error reading sources file {0}: {1:?}")]
    SourcesFileRead(String, std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("package filename has no file name component: {0}")]
    PackageFilename(String),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, AptFetchError>;

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", num_cpus::get());

    let app = Command::new("APT Fetch")
        .version("0.1")
        .about("Fetch indices and packages from APT repositories")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("max-parallel-io")
                .long("max-parallel-io")
                .takes_value(true)
                .default_value(&default_threads)
                .global(true)
                .help("Maximum number of parallel I/O operations to perform"),
        )
        .arg(
            Arg::new("arch")
                .long("arch")
                .takes_value(true)
                .default_value("amd64")
                .global(true)
                .help("Architecture of binary packages to fetch"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .allow_invalid_utf8(true)
                .global(true)
                .help("Path to a YAML file defining client settings"),
        );

    let app = app.subcommand(
        Command::new("update")
            .about("Fetch the package indices of sources")
            .long_about(UPDATE_ABOUT)
            .arg(sources_file_arg())
            .arg(
                Arg::new("download-dir")
                    .long("download-dir")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to download the first found package into"),
            ),
    );

    let app = app.subcommand(
        Command::new("sources")
            .about("Print the sources declared by files")
            .long_about(SOURCES_ABOUT)
            .arg(sources_file_arg()),
    );

    let mut app = app.subcommand(
        Command::new("formats").about("Print documentation about sources file formats"),
    );

    let matches = app.clone().get_matches();

    match matches.subcommand() {
        Some(("update", args)) => command_update(args).await,
        Some(("sources", args)) => command_sources(args).await,
        Some(("formats", _)) => {
            println!("{}", SOURCES_ABOUT);
            Ok(())
        }
        Some((command, _)) => Err(AptFetchError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn sources_file_arg<'a>() -> Arg<'a> {
    Arg::new("sources-file")
        .value_name("SOURCES_FILE")
        .required(true)
        .multiple_values(true)
        .allow_invalid_utf8(true)
        .help("Path to a sources.list or deb822 .sources file")
}

fn load_config(args: &ArgMatches) -> Result<ClientConfig> {
    match args.value_of_os("config") {
        Some(path) => {
            let f = std::fs::File::open(path)?;
            Ok(serde_yaml::from_reader(f)?)
        }
        None => Ok(ClientConfig::default()),
    }
}

/// Extract sources from every sources file given on the command line.
async fn extract_sources(
    args: &ArgMatches,
    extractor: &SourceExtractor,
) -> Result<(usize, Vec<PackageSource>)> {
    let arch = args.value_of("arch").unwrap_or("amd64");
    let paths = args
        .values_of_os("sources-file")
        .map(|values| values.collect::<Vec<&OsStr>>())
        .unwrap_or_default();

    let mut sources = vec![];
    for path in &paths {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AptFetchError::SourcesFileRead(Path::new(path).display().to_string(), e)
        })?;

        let extracted = extractor.extract(&text, arch).await;
        debug!(
            "{} sources declared by {}",
            extracted.len(),
            Path::new(path).display()
        );
        sources.extend(extracted);
    }

    Ok((paths.len(), sources))
}

async fn command_sources(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let extractor = SourceExtractor::from_config(&config)?;

    let (file_count, sources) = extract_sources(args, &extractor).await?;

    for source in &sources {
        let repo = source.repository();
        println!(
            "{} {} {} {} {}",
            repo.base_url(),
            repo.suite(),
            source.component(),
            source.architecture(),
            match repo.signed_by() {
                Some(keyring) => format!("signed-by={}", keyring),
                None => "unsigned".to_string(),
            }
        );
    }

    println!(
        "Extracted {} sources from {} files",
        sources.len(),
        file_count
    );

    Ok(())
}

/// Running totals of index fetches.
#[derive(Default)]
struct FetchReport {
    sequence: AtomicUsize,
    bytes: AtomicU64,
}

impl FetchReport {
    fn next_sequence(&self) -> usize {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record(&self, event: FetchEvent) {
        if let FetchEvent::FetchBegin { url, total_bytes } = event {
            let size = match total_bytes {
                Some(size) => {
                    self.bytes.fetch_add(size, Ordering::SeqCst);
                    format!(" [{}]", format_bytes(size))
                }
                None => "".to_string(),
            };

            println!(
                "Get:{} {}{}",
                self.next_sequence(),
                describe_fetch(&url),
                size
            );
        }
    }
}

async fn command_update(args: &ArgMatches) -> Result<()> {
    let max_parallel_io = args.value_of_t::<usize>("max-parallel-io")?.max(1);
    let config = load_config(args)?;
    let extractor = SourceExtractor::from_config(&config)?;

    let start = Instant::now();
    let (_, sources) = extract_sources(args, &extractor).await?;

    let report = FetchReport::default();
    let record_event = |event: FetchEvent| report.record(event);
    let cb: &ProgressCallback<'_> = &record_event;

    let fetches = futures::stream::iter(sources.iter())
        .map(move |source| async move { (source, source.fetch_packages(Some(cb)).await) })
        .buffered(max_parallel_io);
    futures::pin_mut!(fetches);

    let mut package_count = 0;
    let mut first: Option<(&PackageSource, PackageRecord)> = None;

    while let Some((source, result)) = fetches.next().await {
        match result {
            Ok(records) => {
                package_count += records.len();
                if first.is_none() {
                    first = records.into_iter().next().map(|record| (source, record));
                }
            }
            Err(err) => {
                println!(
                    "Err:{} {} {}/{} {} Packages\n  {}",
                    report.next_sequence(),
                    source.repository().base_url(),
                    source.repository().suite(),
                    source.component(),
                    source.architecture(),
                    err
                );
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64().max(0.001);
    let total_bytes = report.bytes.load(Ordering::SeqCst);
    println!(
        "Fetched {} in {:.0}s ({:.0} kB/s)",
        format_bytes(total_bytes),
        elapsed,
        total_bytes as f64 / 1024.0 / elapsed
    );
    println!(
        "{} packages available from {} sources",
        package_count,
        sources.len()
    );

    if let Some(dir) = args.value_of_os("download-dir") {
        match first {
            Some((source, record)) => download(source, &record, Path::new(dir)).await?,
            None => println!("No packages found to download."),
        }
    }

    Ok(())
}

async fn download(source: &PackageSource, record: &PackageRecord, dir: &Path) -> Result<()> {
    let file_name = Path::new(&record.filename)
        .file_name()
        .ok_or_else(|| AptFetchError::PackageFilename(record.filename.clone()))?;
    let dest: PathBuf = dir.join(file_name);

    println!(
        "\nDownloading {} ({}) from {} {}",
        record.package,
        record.version,
        source.repository().base_url(),
        source.repository().suite()
    );
    println!("Target: {}", dest.display());

    std::fs::create_dir_all(dir)?;

    let print_progress = |event: FetchEvent| {
        if let FetchEvent::DownloadProgress {
            bytes_downloaded,
            total_bytes: Some(total),
            ..
        } = event
        {
            if total > 0 {
                let mut stdout = std::io::stdout().lock();
                // Progress output is best effort.
                let _ = write!(
                    stdout,
                    "\rDownloading... {}% ({}/{})",
                    bytes_downloaded.min(total) * 100 / total,
                    format_bytes(bytes_downloaded),
                    format_bytes(total)
                );
                let _ = stdout.flush();
            }
        }
    };

    source
        .download_package(record, &dest, Some(&print_progress))
        .await?;

    println!("\nDownload and verification complete");

    Ok(())
}

/// Describe a fetched URL the way `apt-get update` does.
///
/// `http://host/debian/dists/bookworm/main/binary-amd64/Packages.gz` becomes
/// `http://host bookworm/main amd64 Packages`.
fn describe_fetch(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return url.to_string(),
    };

    let host = format!(
        "{}://{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default()
    );

    let dist_path = match url.split_once("/dists/") {
        Some((_, path)) => path,
        None => return url.to_string(),
    };
    let parts = dist_path.split('/').collect::<Vec<_>>();

    match parts.as_slice() {
        [suite, "InRelease"] => format!("{} {} InRelease", host, suite),
        [suite, component, binary, index] if index.starts_with("Packages") => format!(
            "{} {}/{} {} Packages",
            host,
            suite,
            component,
            binary.trim_start_matches("binary-")
        ),
        _ => format!("{} {}", host, dist_path),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let kb = bytes as f64 / 1024.0;
    if kb < 1000.0 {
        return format!("{:.1} kB", kb).replace(".0 kB", " kB");
    }

    let mb = kb / 1024.0;
    if mb < 1000.0 {
        return format!("{:.1} MB", mb);
    }

    format!("{:.1} GB", mb / 1024.0)
}
