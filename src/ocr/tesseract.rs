/// Tesseract command-line OCR backend
use super::{join_fragments, OcrError, TextExtractor, TextFragment};
use crate::media::DecodedImage;
use ahash::AHashMap;
use image::ImageFormat;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs the `tesseract` executable with TSV output
///
/// The downscaled working copy is written to a temporary PNG so the engine
/// never sees more than the configured maximum dimension.
pub struct TesseractExtractor {
    command: String,
    language: String,
    min_confidence: f32,
    timeout: Duration,
}

impl TesseractExtractor {
    pub fn new(
        command: impl Into<String>,
        language: impl Into<String>,
        min_confidence: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
            min_confidence,
            timeout,
        }
    }

    fn run(&self, input: &Path) -> Result<String, OcrError> {
        // Both streams go to files so a chatty engine can never fill a pipe
        let (mut stdout_file, stdout_handle) = capture_file()?;
        let (mut stderr_file, stderr_handle) = capture_file()?;

        let mut child = Command::new(&self.command)
            .arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_handle))
            .stderr(Stdio::from(stderr_handle))
            .spawn()
            .map_err(|e| {
                OcrError::EngineUnavailable(format!("failed to run '{}': {}", self.command, e))
            })?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(OcrError::Timeout(self.timeout.as_secs()));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(OcrError::EngineFailed(e.to_string())),
            }
        };

        if !status.success() {
            let stderr = read_back(&mut stderr_file).unwrap_or_default();
            return Err(classify_failure(stderr.trim()));
        }

        read_back(&mut stdout_file).map_err(|e| OcrError::EngineFailed(e.to_string()))
    }
}

fn capture_file() -> Result<(File, File), OcrError> {
    let file =
        tempfile::tempfile().map_err(|e| OcrError::EngineFailed(format!("temp file: {}", e)))?;
    let handle = file
        .try_clone()
        .map_err(|e| OcrError::EngineFailed(format!("temp file: {}", e)))?;
    Ok((file, handle))
}

fn read_back(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

impl TextExtractor for TesseractExtractor {
    fn extract_text(&self, image: &DecodedImage) -> Result<String, OcrError> {
        let input = tempfile::Builder::new()
            .prefix("photofind-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::EngineFailed(format!("temp file: {}", e)))?;

        image
            .pixels
            .save_with_format(input.path(), ImageFormat::Png)
            .map_err(|e| OcrError::Unreadable(e.to_string()))?;

        let tsv = self.run(input.path())?;
        let fragments = parse_tsv(&tsv);
        tracing::trace!(
            "OCR {}: {} fragments before confidence filter",
            image.path.display(),
            fragments.len()
        );
        Ok(join_fragments(&fragments, self.min_confidence))
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

fn classify_failure(stderr: &str) -> OcrError {
    let lower = stderr.to_lowercase();
    if lower.contains("image file")
        || lower.contains("read_image")
        || lower.contains("unsupported")
    {
        OcrError::Unreadable(stderr.to_string())
    } else {
        OcrError::EngineFailed(stderr.to_string())
    }
}

/// (page, block, paragraph, line) of a word row
type LineKey = (u32, u32, u32, u32);

/// Parse Tesseract TSV output into word fragments in reading order
///
/// Columns: level page_num block_num par_num line_num word_num left top
/// width height conf text. Only word rows (level 5) with text are kept;
/// confidence is rescaled from 0-100 to 0.0-1.0. Words are grouped by
/// (block, paragraph, line), lines keep the order in which they were first
/// detected and words within a line follow `word_num`.
pub fn parse_tsv(tsv: &str) -> Vec<TextFragment> {
    let mut lines: Vec<(LineKey, Vec<(u32, TextFragment)>)> = Vec::new();
    let mut line_index: AHashMap<LineKey, usize> = AHashMap::new();

    for row in tsv.lines().skip(1) {
        let Some((key, word_num, fragment)) = parse_word_row(row) else {
            continue;
        };
        let index = *line_index.entry(key).or_insert_with(|| {
            lines.push((key, Vec::new()));
            lines.len() - 1
        });
        lines[index].1.push((word_num, fragment));
    }

    lines
        .into_iter()
        .flat_map(|(_, mut words)| {
            words.sort_by_key(|(word_num, _)| *word_num);
            words.into_iter().map(|(_, fragment)| fragment)
        })
        .collect()
}

fn parse_word_row(row: &str) -> Option<(LineKey, u32, TextFragment)> {
    let cols: Vec<&str> = row.splitn(12, '\t').collect();
    if cols.len() < 12 || cols[0] != "5" {
        return None;
    }
    let number = |i: usize| cols[i].trim().parse::<u32>().ok();
    let key = (number(1)?, number(2)?, number(3)?, number(4)?);
    let word_num = number(5)?;

    let confidence: f32 = cols[10].trim().parse().ok()?;
    let text = cols[11].trim();
    if confidence < 0.0 || text.is_empty() {
        return None;
    }
    Some((
        key,
        word_num,
        TextFragment {
            text: text.to_string(),
            confidence: (confidence / 100.0).clamp(0.0, 1.0),
        },
    ))
}
