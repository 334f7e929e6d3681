use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Cpu,
    Memory,
    Disk,
    Network,
    Concurrency,
    Time,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::Cpu,
        Axis::Memory,
        Axis::Disk,
        Axis::Network,
        Axis::Concurrency,
        Axis::Time,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::Cpu => "cpu",
            Axis::Memory => "memory",
            Axis::Disk => "disk",
            Axis::Network => "network",
            Axis::Concurrency => "concurrency",
            Axis::Time => "time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    Light,
    Medium,
    Heavy,
}

impl Intensity {
    pub const ALL: [Intensity; 3] = [Intensity::Light, Intensity::Medium, Intensity::Heavy];

    pub fn as_str(self) -> &'static str {
        match self {
            Intensity::Light => "light",
            Intensity::Medium => "medium",
            Intensity::Heavy => "heavy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    Auto,
    Always,
    Never,
}

impl ProbeMode {
    pub const ALL: [ProbeMode; 3] = [ProbeMode::Auto, ProbeMode::Always, ProbeMode::Never];

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeMode::Auto => "auto",
            ProbeMode::Always => "always",
            ProbeMode::Never => "never",
        }
    }
}

pub const DURATION_CHOICES: [u64; 3] = [1, 3, 5];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialSpec {
    pub axes: Vec<Axis>,
    pub intensity: Intensity,
    pub duration_secs: u64,
    pub probe: ProbeMode,
    pub report_path: PathBuf,
}

impl TrialSpec {
    pub fn axes_csv(&self) -> String {
        self.axes
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub struct ParameterSampler {
    rng: StdRng,
}

impl ParameterSampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    // Draw order is fixed (axes, intensity, duration, probe) so that a
    // seeded sampler replays the same parameter sequence run to run.
    pub fn sample(&mut self, index: u32, stamp: i64, reports_dir: &Path) -> TrialSpec {
        let count = self.rng.gen_range(1..=Axis::ALL.len());
        let axes: Vec<Axis> = Axis::ALL
            .choose_multiple(&mut self.rng, count)
            .copied()
            .collect();
        let intensity = pick(&mut self.rng, &Intensity::ALL);
        let duration_secs = pick(&mut self.rng, &DURATION_CHOICES);
        let probe = pick(&mut self.rng, &ProbeMode::ALL);
        let report_path = reports_dir.join(format!("blackbox-{}-{}.json", stamp, index));
        TrialSpec {
            axes,
            intensity,
            duration_secs,
            probe,
            report_path,
        }
    }
}

fn pick<T: Copy>(rng: &mut StdRng, set: &[T]) -> T {
    set[rng.gen_range(0..set.len())]
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

pub trait ProcessRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<ProcessOutput>;
}

pub struct OsProcessRunner;

impl ProcessRunner for OsProcessRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<ProcessOutput> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| anyhow!("failed to launch {}: {}", program.display(), e))?;
        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // A child killed by a signal has no exit code on unix.
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

pub struct RunLogger {
    log_dir: PathBuf,
}

impl RunLogger {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            log_dir: log_dir.to_path_buf(),
        }
    }

    pub fn record(
        &self,
        label: &str,
        started: &str,
        cmdline: &str,
        output: &ProcessOutput,
    ) -> Result<()> {
        ensure_dir(&self.log_dir)?;
        let header = format!(
            "# {}\n# cmd: {}\n# exit: {}\n\n",
            started, cmdline, output.exit_code
        );
        atomic_write_bytes(
            &self.log_dir.join(format!("{}.out", label)),
            format!("{}{}", header, output.stdout).as_bytes(),
        )?;
        atomic_write_bytes(
            &self.log_dir.join(format!("{}.err", label)),
            format!("{}{}", header, output.stderr).as_bytes(),
        )?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct TrialOutcome {
    pub index: u32,
    pub exit_code: i32,
    pub report_path: PathBuf,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TrialFailure {
    pub run: u32,
    pub exit_code: i32,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub runs: u32,
    pub failures: Vec<TrialFailure>,
    pub reports: Vec<String>,
}

impl RunSummary {
    pub fn new(runs: u32) -> Self {
        Self {
            runs,
            failures: Vec::new(),
            reports: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: TrialOutcome) {
        if outcome.exit_code != 0 {
            self.failures.push(TrialFailure {
                run: outcome.index,
                exit_code: outcome.exit_code,
            });
        } else {
            self.reports
                .push(outcome.report_path.to_string_lossy().to_string());
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write_bytes(path, &bytes)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub runs: u32,
    pub seed: Option<u64>,
    pub build: bool,
    pub source: PathBuf,
    pub target: PathBuf,
    pub binary: PathBuf,
    pub outdir: PathBuf,
    pub reports_dir: PathBuf,
    pub profile: Option<PathBuf>,
}

pub fn run_session(config: &SessionConfig, processes: &dyn ProcessRunner) -> Result<RunSummary> {
    let logger = RunLogger::new(&config.outdir);

    if config.build {
        run_build_step(processes, &logger, &["build"], "build-main")?;
        run_build_step(
            processes,
            &logger,
            &["build", "--example", "attack_harness"],
            "build-harness",
        )?;
    }

    if !config.binary.exists() {
        bail!(
            "attack binary not found at {} (build it first, or pass --build)",
            config.binary.display()
        );
    }

    let mut sampler = ParameterSampler::new(config.seed);
    let mut summary = RunSummary::new(config.runs);
    for index in 1..=config.runs {
        let spec = sampler.sample(index, Utc::now().timestamp(), &config.reports_dir);
        info!(
            "run {}/{}: axes={} intensity={} duration={}s probe={}",
            index,
            config.runs,
            spec.axes_csv(),
            spec.intensity.as_str(),
            spec.duration_secs,
            spec.probe.as_str()
        );
        let args = assault_args(&spec, &config.source, &config.target, config.profile.as_deref());
        let label = format!("assault-{}", index);
        let exit_code = run_logged(processes, &logger, &config.binary, &args, &label)?;
        if exit_code != 0 {
            warn!("run {} exited with status {}", index, exit_code);
        }
        summary.record(TrialOutcome {
            index,
            exit_code,
            report_path: spec.report_path,
        });
    }

    summary.write(&config.outdir.join("summary.json"))?;
    Ok(summary)
}

fn run_build_step(
    processes: &dyn ProcessRunner,
    logger: &RunLogger,
    args: &[&str],
    label: &str,
) -> Result<()> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let exit_code = run_logged(processes, logger, Path::new("cargo"), &args, label)?;
    if exit_code != 0 {
        bail!("build_failed: {} exited with status {}", label, exit_code);
    }
    Ok(())
}

fn run_logged(
    processes: &dyn ProcessRunner,
    logger: &RunLogger,
    program: &Path,
    args: &[String],
    label: &str,
) -> Result<i32> {
    let started = Utc::now().format("%Y-%m-%dT%H%M%S").to_string();
    let output = processes.run(program, args)?;
    let cmdline = format!("{} {}", program.display(), args.join(" "));
    logger.record(label, &started, &cmdline, &output)?;
    Ok(output.exit_code)
}

fn assault_args(
    spec: &TrialSpec,
    source: &Path,
    target: &Path,
    profile: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "assault".to_string(),
        "--source".to_string(),
        source.to_string_lossy().to_string(),
        target.to_string_lossy().to_string(),
        "--axes".to_string(),
        spec.axes_csv(),
        "--intensity".to_string(),
        spec.intensity.as_str().to_string(),
        "--duration".to_string(),
        spec.duration_secs.to_string(),
        "--output".to_string(),
        spec.report_path.to_string_lossy().to_string(),
        "--output-format".to_string(),
        "json".to_string(),
        "--probe".to_string(),
        spec.probe.as_str().to_string(),
    ];
    if let Some(profile) = profile {
        // Missing profile files are skipped, not an error.
        if profile.exists() {
            args.push("--profile".to_string());
            args.push(profile.to_string_lossy().to_string());
        }
    }
    args
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
