//! Subprocess recognition backends
//!
//! `TesseractRecognizer` runs the Tesseract CLI with TSV output so word
//! confidences are available. `CommandRecognizer` runs any program that
//! prints a `RecognitionReply` JSON document. Both hand the image over as a
//! temporary PNG and enforce a per-call timeout.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use image::ImageFormat;
use tracing::{debug, warn};

use crate::config::RecognitionSettings;
use crate::error::RecognitionError;
use crate::vision::recognizer::{RecognitionOutput, RecognitionReply, TextRecognizer};
use crate::vision::RasterImage;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tesseract CLI backend
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    executable: PathBuf,
    languages: String,
    /// Page segmentation mode
    psm: u8,
    timeout: Duration,
}

impl TesseractRecognizer {
    pub fn new(executable: impl Into<PathBuf>, languages: impl Into<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            languages: languages.into(),
            psm: 6,
            timeout,
        }
    }

    /// Build from settings, falling back to `tesseract` on PATH
    pub fn from_settings(settings: &RecognitionSettings) -> Self {
        let executable = settings
            .tesseract_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("tesseract"));
        Self::new(executable, settings.languages.clone(), settings.timeout())
    }

    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &RasterImage) -> Result<RecognitionOutput, RecognitionError> {
        let workdir = tempfile::tempdir()?;
        let input = write_png(image, workdir.path())?;
        let output_base = workdir.path().join("out");
        let stderr_path = workdir.path().join("stderr.txt");

        let mut command = Command::new(&self.executable);
        command
            .arg(&input)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(File::create(&stderr_path)?));

        let status = run_with_timeout(command, self.timeout)?;
        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(RecognitionError::Engine(format!(
                "tesseract exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        let tsv = std::fs::read_to_string(output_base.with_extension("tsv"))?;
        let (text, confidence) = parse_tsv_output(&tsv);
        debug!("tesseract: {} chars, confidence {:.1}", text.len(), confidence);
        RecognitionOutput::new(text, confidence)
    }
}

/// Join recognized words into lines and average their confidences
///
/// TSV fields: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Level 5 rows are words.
fn parse_tsv_output(tsv: &str) -> (String, f32) {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<&str> = Vec::new();
    let mut conf_sum = 0.0f32;
    let mut word_count = 0usize;

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != 5 {
            continue;
        }
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_key != Some(key) && !current_words.is_empty() {
            lines.push(current_words.join(" "));
            current_words.clear();
        }
        current_key = Some(key);
        current_words.push(text);
        conf_sum += conf.min(100.0);
        word_count += 1;
    }
    if !current_words.is_empty() {
        lines.push(current_words.join(" "));
    }

    let confidence = if word_count > 0 {
        conf_sum / word_count as f32
    } else {
        0.0
    };
    (lines.join("\n"), confidence)
}

/// Backend for any program that prints a JSON `RecognitionReply`
///
/// The image path is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl TextRecognizer for CommandRecognizer {
    fn name(&self) -> &str {
        "command"
    }

    fn recognize(&self, image: &RasterImage) -> Result<RecognitionOutput, RecognitionError> {
        let workdir = tempfile::tempdir()?;
        let input = write_png(image, workdir.path())?;
        let stdout_path = workdir.path().join("reply.json");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::from(File::create(&stdout_path)?))
            .stderr(Stdio::null());

        let status = run_with_timeout(command, self.timeout)?;
        if !status.success() {
            return Err(RecognitionError::Engine(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }

        let reply = std::fs::read_to_string(&stdout_path)?;
        RecognitionReply::from_json(reply.trim())?.into_output()
    }
}

fn write_png(image: &RasterImage, dir: &Path) -> Result<PathBuf, RecognitionError> {
    let path = dir.join("input.png");
    image
        .save_with_format(&path, ImageFormat::Png)
        .map_err(|e| RecognitionError::Engine(format!("failed to write input image: {}", e)))?;
    Ok(path)
}

/// Spawn and wait, killing the child once `timeout` elapses
fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<ExitStatus, RecognitionError> {
    let mut child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            RecognitionError::Unavailable(format!("{:?}: {}", command.get_program(), e))
        }
        _ => RecognitionError::Io(e),
    })?;

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            warn!("Recognition process exceeded {:?}, killing it", timeout);
            let _ = child.kill();
            let _ = child.wait();
            return Err(RecognitionError::Timeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
