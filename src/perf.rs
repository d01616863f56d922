use crate::types::OutputFormat;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Pipeline stage a timing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Glyph,
    Composite,
    Fit,
    Save,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Load,
        Stage::Glyph,
        Stage::Composite,
        Stage::Fit,
        Stage::Save,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Glyph => "glyph",
            Stage::Composite => "composite",
            Stage::Fit => "fit",
            Stage::Save => "save",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Stage timings and outcome counters gathered while processing one image.
#[derive(Debug, Clone)]
pub struct FileTrace {
    pub file: String,
    stage_ms: [Option<f64>; 5],
    pub tiles_placed: usize,
    pub fit_iterations: usize,
    pub bytes: Option<u64>,
    pub format: Option<OutputFormat>,
}

impl FileTrace {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            stage_ms: [None; 5],
            tiles_placed: 0,
            fit_iterations: 0,
            bytes: None,
            format: None,
        }
    }

    /// Runs `f` and adds its wall time to `stage`.
    pub fn time<T>(&mut self, stage: Stage, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        let slot = &mut self.stage_ms[stage.index()];
        *slot = Some(slot.unwrap_or(0.0) + ms);
        out
    }

    pub fn stage_ms(&self, stage: Stage) -> Option<f64> {
        self.stage_ms[stage.index()]
    }

    pub fn total_ms(&self) -> f64 {
        self.stage_ms.iter().flatten().sum()
    }

    fn to_json(&self) -> String {
        let mut stages = String::new();
        for stage in Stage::ALL {
            if let Some(ms) = self.stage_ms(stage) {
                if !stages.is_empty() {
                    stages.push(',');
                }
                stages.push_str(&format!("\"{}\":{:.3}", stage.as_str(), ms));
            }
        }
        format!(
            "{{\"type\":\"tilemark.file\",\"file\":\"{}\",\"total_ms\":{:.3},\"stages\":{{{}}},\"tiles\":{},\"fit_iterations\":{},\"bytes\":{},\"format\":{}}}",
            json_escape(&self.file),
            self.total_ms(),
            stages,
            self.tiles_placed,
            self.fit_iterations,
            self.bytes.map_or_else(|| "null".to_string(), |b| b.to_string()),
            self.format
                .map_or_else(|| "null".to_string(), |f| format!("\"{}\"", f.extension())),
        )
    }
}

/// JSON-lines log with one record per processed file.
///
/// When the last handle drops, `<stem>_hot.log` gets per-stage totals for the
/// run followed by the files ordered slowest first.
#[derive(Clone)]
pub struct PerfLogger {
    inner: Arc<Mutex<RunLog>>,
}

struct RunLog {
    writer: BufWriter<File>,
    path: PathBuf,
    files: Vec<(String, f64)>,
    stage_totals: [f64; 5],
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(RunLog {
                writer: BufWriter::new(file),
                path,
                files: Vec::new(),
                stage_totals: [0.0; 5],
            })),
        })
    }

    pub fn record(&self, trace: &FileTrace) {
        let line = trace.to_json();
        if let Ok(mut log) = self.inner.lock() {
            for stage in Stage::ALL {
                log.stage_totals[stage.index()] += trace.stage_ms(stage).unwrap_or(0.0);
            }
            log.files.push((trace.file.clone(), trace.total_ms()));
            let _ = writeln!(log.writer, "{line}");
            let _ = log.writer.flush();
        }
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let Ok(file) = File::create(summary_path_for(&self.path)) else {
            return;
        };
        let mut writer = BufWriter::new(file);
        let _ = write_summary(&mut writer, &self.stage_totals, &mut self.files);
    }
}

fn write_summary(
    out: &mut impl Write,
    stage_totals: &[f64; 5],
    files: &mut [(String, f64)],
) -> io::Result<()> {
    let run_ms: f64 = stage_totals.iter().sum();
    for stage in Stage::ALL {
        let ms = stage_totals[stage.index()];
        let share = if run_ms > 0.0 { ms / run_ms } else { 0.0 };
        writeln!(
            out,
            "{{\"type\":\"tilemark.stage\",\"stage\":\"{}\",\"ms\":{:.3},\"share\":{:.4}}}",
            stage.as_str(),
            ms,
            share
        )?;
    }
    files.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (rank, (file, ms)) in files.iter().enumerate() {
        writeln!(
            out,
            "{{\"type\":\"tilemark.slowest\",\"rank\":{},\"file\":\"{}\",\"ms\":{:.3}}}",
            rank + 1,
            json_escape(file),
            ms
        )?;
    }
    out.flush()
}

fn summary_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("tilemark_perf");
    path.with_file_name(format!("{stem}_hot.log"))
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
