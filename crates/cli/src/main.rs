//! Binary entry point for the subtitle retimer.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use subsync_core::chop::ChopRange;
use subsync_core::timestamp;
use subsync_core::tweak::{self, ActiveWindow, Adjustment, NAMED_SCALES};
use subsync_core::{retime, RetimeConfig, RetimeReport};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

/// Command line options for the binary.
#[derive(Parser, Debug)]
#[command(name = "subsync", version, about = "Shift, scale, chop and re-encode SRT and ASS subtitles")]
struct Cli {
    /// Time offset: milliseconds (+19700), a time stamp (-0:0:10,199)
    /// or the expected minus the actual stamp (+01:44:31,660-01:44:36,290).
    #[arg(short = 't', long, allow_hyphen_values = true)]
    offset: Option<String>,

    /// Scale ratio: a real number (1.1988), a frame rate id (N-P, C-N, ...)
    /// or the expected divided by the actual stamp (01:44:30,290/01:44:31,660).
    #[arg(short = 'z', long, allow_hyphen_values = true)]
    scale: Option<String>,

    /// Only retime stamps from START to the optional END.
    /// END is only taken if it begins with a digit.
    #[arg(short, long, num_args = 1..=2, value_names = ["START", "END"])]
    span: Vec<String>,

    /// Keep only records N to M, counting from 1 (3:5, 4: or :9).
    #[arg(short, long, value_name = "N:M")]
    chop: Option<String>,

    /// Renumber SRT serial lines, starting at NUM (1 by default).
    #[arg(
        short,
        long,
        value_name = "NUM",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "1"
    )]
    reorder: Option<u32>,

    /// Write to FILE instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    write: Option<PathBuf>,

    /// Overwrite the input files without keeping a backup.
    #[arg(short = 'o', conflicts_with = "overwrite")]
    replace: bool,

    /// Overwrite the input files, keeping the original as FILE.bak.
    #[arg(long)]
    overwrite: bool,

    /// Encoding of the input; sniffed from the byte order mark by default.
    #[arg(short, long, value_name = "NAME")]
    decode: Option<String>,

    /// Encoding of the output; same as the input by default.
    #[arg(short, long, value_name = "NAME")]
    encode: Option<String>,

    /// Enable verbose debug and trace logs.
    #[arg(long)]
    debug: bool,

    /// Print the resolved configuration as JSON and exit.
    #[arg(long)]
    show_config: bool,

    /// Print the offset between two time stamps and exit.
    #[arg(long, num_args = 2, value_names = ["EXPECT", "ACTUAL"], allow_hyphen_values = true)]
    subtract: Option<Vec<String>>,

    /// Print the scale ratio of two time stamps and exit.
    #[arg(long, num_args = 2, value_names = ["EXPECT", "ACTUAL"], allow_hyphen_values = true)]
    divide: Option<Vec<String>>,

    /// Show how each STAMP is read and exit.
    #[arg(long, num_args = 1.., value_name = "STAMP", allow_hyphen_values = true)]
    parse: Option<Vec<String>>,

    /// Subtitle files; none or `-` reads stdin. A bare `+VALUE` or `-VALUE`
    /// is an offset (+1000) or, failing that, a scale (-N-P).
    #[arg(allow_hyphen_values = true, value_name = "FILE|[+-]VALUE")]
    inputs: Vec<String>,
}

/// Where input comes from and output goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// stdin to stdout or `--write`.
    Stdin,
    /// Every file, one after another, into one output.
    Batch,
    /// Each file is rewritten under its own name.
    Overwrite { keep_backup: bool },
}

impl Cli {
    /// Resolve the arguments into a run configuration and the input files.
    fn resolve(&self) -> Result<(RetimeConfig, Vec<PathBuf>)> {
        trace!("Cli::resolve()");
        let mut inputs: Vec<&str> = self.inputs.iter().map(String::as_str).collect();
        let window = match self.span.split_first() {
            None => ActiveWindow::default(),
            Some((start, rest)) => {
                let end = match rest.first() {
                    Some(arg) if arg.starts_with(|c: char| c.is_ascii_digit()) => Some(arg.as_str()),
                    Some(arg) => {
                        inputs.insert(0, arg);
                        None
                    }
                    None => None,
                };
                ActiveWindow::parse(start, end)?
            }
        };
        let mut config = RetimeConfig {
            offset: self
                .offset
                .as_deref()
                .map(tweak::parse_offset)
                .transpose()?
                .unwrap_or(0),
            scale: self
                .scale
                .as_deref()
                .map(tweak::parse_scale)
                .transpose()?
                .unwrap_or(0.0),
            window,
            chop: self
                .chop
                .as_deref()
                .map(ChopRange::parse)
                .transpose()?
                .unwrap_or_default(),
            renumber_from: self.reorder,
            decode: self.decode.clone(),
            encode: self.encode.clone(),
        };

        let mut files = Vec::new();
        for input in inputs {
            if input.len() > 1 && input.starts_with(['+', '-']) {
                match tweak::resolve_argument(input)? {
                    Adjustment::Offset(ms) => config.offset = ms,
                    Adjustment::Scale(ratio) => config.scale = ratio,
                }
            } else {
                files.push(PathBuf::from(input));
            }
        }
        Ok((config, files))
    }

    fn mode(&self, files: &[PathBuf]) -> Mode {
        if files.is_empty() || files.iter().all(|f| f.as_os_str() == "-") {
            Mode::Stdin
        } else if self.replace || self.overwrite {
            Mode::Overwrite {
                keep_backup: self.overwrite,
            }
        } else {
            Mode::Batch
        }
    }
}

/// Install the stderr logger. stdout is reserved for subtitle output.
fn init_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::default()
            .add_directive("subsync=trace".parse()?)
            .add_directive("subsync_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("subsync=info".parse()?)
            .add_directive("subsync_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn scale_help() -> String {
    let names: Vec<String> = NAMED_SCALES
        .iter()
        .map(|(id, fact)| format!("{id}({fact})"))
        .collect();
    format!("Frame rate ids for --scale: {}", names.join(", "))
}

/// Answer the calculator options. Returns false if none was given.
fn run_tools(cli: &Cli) -> Result<bool> {
    if let Some([expect, actual]) = cli.subtract.as_deref() {
        let ms = tweak::subtract(expect, actual)?;
        println!("{expect} - {actual} = {ms} ms ({})", timestamp::format(ms, Default::default()));
        return Ok(true);
    }
    if let Some([expect, actual]) = cli.divide.as_deref() {
        println!("{expect} / {actual} = {}", tweak::divide(expect, actual)?);
        return Ok(true);
    }
    if let Some(stamps) = &cli.parse {
        for text in stamps {
            match timestamp::parse(text) {
                Some(stamp) => println!(
                    "{text}: {} ms, {:?} style, {} fields, {} bytes read, written as {stamp}",
                    stamp.ms, stamp.style, stamp.fields, stamp.len
                ),
                None => println!("{text}: not a time stamp"),
            }
        }
        return Ok(true);
    }
    Ok(false)
}

fn open_sink(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn log_report(name: &str, report: &RetimeReport) {
    info!(
        "{name}: {} lines, {} stamps retimed, {} records ({:?}), {} -> {}",
        report.lines_read,
        report.stamps_rewritten,
        report.records,
        report.magic,
        report.source_encoding,
        report.target_encoding
    );
}

fn retime_stdin(config: &RetimeConfig, write: Option<&Path>) -> Result<()> {
    let mut sink = open_sink(write)?;
    let report = retime(io::stdin().lock(), &mut sink, config).context("<stdin>")?;
    sink.flush()?;
    log_report("<stdin>", &report);
    Ok(())
}

/// Retime every file into one output. Returns how many files failed.
fn retime_batch(files: &[PathBuf], config: &RetimeConfig, write: Option<&Path>) -> Result<usize> {
    let mut sink = open_sink(write)?;
    let mut failed = 0;
    for path in files {
        let name = path.display().to_string();
        let result = File::open(path)
            .with_context(|| format!("cannot open {name}"))
            .and_then(|file| retime(BufReader::new(file), &mut sink, config).with_context(|| name.clone()));
        match result {
            Ok(report) => log_report(&name, &report),
            Err(err) => {
                error!("{err:#}");
                failed += 1;
            }
        }
    }
    sink.flush()?;
    Ok(failed)
}

/// `movie.srt` becomes `movie.srt.bak`.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

fn retime_file(input: &Path, output: &Path, config: &RetimeConfig) -> Result<RetimeReport> {
    let reader = BufReader::new(File::open(input).with_context(|| format!("cannot open {}", input.display()))?);
    let file = File::create(output).with_context(|| format!("cannot create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let report = retime(reader, &mut writer, config)?;
    writer.flush()?;
    Ok(report)
}

/// Rewrite `path` in place. The original is moved to `path.bak` first and
/// put back if retiming fails.
fn overwrite_in_place(path: &Path, config: &RetimeConfig, keep_backup: bool) -> Result<RetimeReport> {
    trace!("overwrite_in_place(path={}, keep_backup={keep_backup})", path.display());
    let backup = backup_path(path);
    fs::rename(path, &backup).with_context(|| format!("cannot back up {}", path.display()))?;
    match retime_file(&backup, path, config) {
        Ok(report) => {
            if !keep_backup {
                fs::remove_file(&backup).with_context(|| format!("cannot remove {}", backup.display()))?;
            }
            Ok(report)
        }
        Err(err) => {
            debug!("restoring {} from {}", path.display(), backup.display());
            fs::rename(&backup, path).with_context(|| format!("cannot restore {}", path.display()))?;
            Err(err.context(path.display().to_string()))
        }
    }
}

/// Overwrite every file. Returns how many files failed.
fn overwrite_all(files: &[PathBuf], config: &RetimeConfig, keep_backup: bool) -> usize {
    let mut failed = 0;
    for path in files {
        match overwrite_in_place(path, config, keep_backup) {
            Ok(report) => log_report(&path.display().to_string(), &report),
            Err(err) => {
                error!("{err:#}");
                failed += 1;
            }
        }
    }
    failed
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if run_tools(cli)? {
        return Ok(ExitCode::SUCCESS);
    }
    let (config, files) = cli.resolve()?;
    if cli.show_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }
    if config.is_noop() {
        Cli::command().after_help(scale_help()).print_help()?;
        return Ok(ExitCode::SUCCESS);
    }

    let failed = match cli.mode(&files) {
        Mode::Stdin => {
            retime_stdin(&config, cli.write.as_deref())?;
            0
        }
        Mode::Batch => retime_batch(&files, &config, cli.write.as_deref())?,
        Mode::Overwrite { keep_backup } => {
            if cli.write.is_some() {
                warn!("--write is ignored when overwriting");
            }
            overwrite_all(&files, &config, keep_backup)
        }
    };
    if failed > 0 {
        warn!("{failed} of {} files failed", files.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Application entry point which parses CLI args and performs actions.
/// Logging is set up first; the work is delegated to the core library.
fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;
    run(&cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SRT: &str = "1\r\n00:00:01,000 --> 00:00:02,000\r\nHello\r\n\r\n";

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("subsync").chain(args.iter().copied())).unwrap()
    }

    /// Offsets and scales may start with a sign.
    #[test]
    fn accepts_signed_values() {
        let cli = cli(&["-t", "-00:10:07,570", "-z", "-N-P", "a.srt"]);
        let (config, files) = cli.resolve().unwrap();
        assert_eq!(config.offset, -607_570);
        assert_eq!(config.scale, 1.1988);
        assert_eq!(files, [PathBuf::from("a.srt")]);
    }

    /// A span end that does not start with a digit is a file name.
    #[test]
    fn span_end_must_be_numeric() {
        let (config, files) = cli(&["-t", "10", "-s", "1000", "a.srt"]).resolve().unwrap();
        assert_eq!(config.window, ActiveWindow::new(Some(1000), None));
        assert_eq!(files, [PathBuf::from("a.srt")]);

        let (config, files) = cli(&["-t", "10", "-s", "1000", "2000", "b.ass"]).resolve().unwrap();
        assert_eq!(config.window, ActiveWindow::new(Some(1000), Some(2000)));
        assert_eq!(files, [PathBuf::from("b.ass")]);
    }

    #[test]
    fn reorder_defaults_to_one() {
        assert_eq!(cli(&["--reorder", "a.srt"]).reorder, Some(1));
        assert_eq!(cli(&["--reorder=5", "a.srt"]).reorder, Some(5));
        assert_eq!(cli(&["a.srt"]).reorder, None);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(cli(&["-t", "soon"]).resolve().is_err());
        assert!(cli(&["-c", "5:3"]).resolve().is_err());
        assert!(Cli::try_parse_from(["subsync", "-o", "--overwrite"]).is_err());
    }

    #[test]
    fn picks_mode() {
        let plain = cli(&["-t", "1"]);
        assert_eq!(plain.mode(&[]), Mode::Stdin);
        assert_eq!(plain.mode(&[PathBuf::from("-")]), Mode::Stdin);
        assert_eq!(plain.mode(&[PathBuf::from("a.srt")]), Mode::Batch);
        let files = [PathBuf::from("a.srt")];
        assert_eq!(cli(&["-o", "a.srt"]).mode(&files), Mode::Overwrite { keep_backup: false });
        assert_eq!(cli(&["--overwrite", "a.srt"]).mode(&files), Mode::Overwrite { keep_backup: true });
    }

    /// Signed values among the files are offsets or scales; `-` stays stdin.
    #[test]
    fn bare_signed_values_adjust() {
        let (config, files) = cli(&["+1000", "a.srt"]).resolve().unwrap();
        assert_eq!(config.offset, 1000);
        assert_eq!(files, [PathBuf::from("a.srt")]);

        let (config, files) = cli(&["a.srt", "-N-P", "-0:0:10,199"]).resolve().unwrap();
        assert_eq!(config.scale, 1.1988);
        assert_eq!(config.offset, -10_199);
        assert_eq!(files, [PathBuf::from("a.srt")]);

        let (config, files) = cli(&["-1/2", "-"]).resolve().unwrap();
        assert_eq!(config.scale, 0.5);
        assert_eq!(files, [PathBuf::from("-")]);

        // A bare value wins over the option.
        let (config, _) = cli(&["-t", "5", "+7"]).resolve().unwrap();
        assert_eq!(config.offset, 7);

        assert!(cli(&["+fast", "a.srt"]).resolve().is_err());
    }

    #[test]
    fn backup_name_appends_suffix() {
        assert_eq!(backup_path(Path::new("dir/movie.srt")), PathBuf::from("dir/movie.srt.bak"));
    }

    /// `--overwrite` leaves the original next to the retimed file.
    #[test]
    fn overwrite_keeps_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("movie.srt");
        fs::write(&path, SRT).unwrap();
        let config = RetimeConfig {
            offset: 1000,
            ..RetimeConfig::default()
        };
        overwrite_in_place(&path, &config, true).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1\r\n00:00:02,000 --> 00:00:03,000\r\nHello\r\n\r\n"
        );
        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), SRT);
    }

    #[test]
    fn replace_removes_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("movie.srt");
        fs::write(&path, SRT).unwrap();
        let config = RetimeConfig {
            renumber_from: Some(7),
            ..RetimeConfig::default()
        };
        overwrite_in_place(&path, &config, false).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("7\r\n"));
        assert!(!backup_path(&path).exists());
    }

    /// A file that cannot be retimed is put back untouched.
    #[test]
    fn failed_overwrite_restores_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("movie.mkv");
        let binary = b"\x1A\x45\xDF\xA3\x00\x00\x00\x00\x00\x00\x00\x1F";
        fs::write(&path, binary).unwrap();
        let config = RetimeConfig {
            offset: 1000,
            ..RetimeConfig::default()
        };
        assert!(overwrite_in_place(&path, &config, true).is_err());
        assert_eq!(fs::read(&path).unwrap(), binary);
        assert!(!backup_path(&path).exists());
    }

    /// Missing files are skipped and the rest still lands in the output.
    #[test]
    fn batch_skips_failures() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.srt");
        fs::write(&good, SRT).unwrap();
        let out = dir.path().join("out.srt");
        let files = [dir.path().join("missing.srt"), good];
        let config = RetimeConfig {
            offset: -500,
            ..RetimeConfig::default()
        };
        let failed = retime_batch(&files, &config, Some(&out)).unwrap();
        assert_eq!(failed, 1);
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "1\r\n00:00:00,500 --> 00:00:01,500\r\nHello\r\n\r\n"
        );
    }

    #[test]
    fn help_lists_frame_rate_ids() {
        let help = scale_help();
        assert!(help.contains("N-P(1.1988)"));
        assert!(help.contains("C-P(0.95904)"));
    }
}
