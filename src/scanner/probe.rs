use crate::error::Error;
use crate::language;
use crate::model::{FileId, MediaAttributes, MediaFile};
use crate::progress::{CancelToken, ProgressReporter};
use crate::scanner::probe_cache::ProbeCache;
use rayon::prelude::*;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Extracts media attributes from a file. Implementations block.
pub trait Prober: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaAttributes, Error>;
}

/// Runs `ffprobe` as a child process and decodes its JSON output.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: String,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
        }
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<MediaAttributes, Error> {
        let display = path.display().to_string();
        let mut child = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Probe(display.clone(), e.to_string()))?;

        // Drain stdout on its own thread so a full pipe cannot stall the child.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Probe(display.clone(), "no stdout".to_string()))?;
        let reader = thread::spawn(move || {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).map(|_| buf)
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Probe(
                        display,
                        format!("timed out after {}s", self.timeout.as_secs()),
                    ));
                }
                None => thread::sleep(Duration::from_millis(25)),
            }
        };

        let output = reader
            .join()
            .map_err(|_| Error::Probe(display.clone(), "output reader panicked".to_string()))??;
        if !status.success() {
            return Err(Error::Probe(display, format!("ffprobe exited with {}", status)));
        }
        parse_ffprobe_json(&output).map_err(|e| Error::Probe(display, e.to_string()))
    }
}

fn is_hdr_stream(stream: &Value) -> bool {
    let transfer = stream["color_transfer"].as_str().unwrap_or_default();
    if transfer == "smpte2084" || transfer == "arib-std-b67" {
        return true;
    }
    stream["side_data_list"]
        .as_array()
        .map(|list| {
            list.iter().any(|side| {
                side["side_data_type"]
                    .as_str()
                    .map(|t| t.contains("DOVI") || t.contains("Dolby Vision"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn stream_language(stream: &Value) -> Option<String> {
    stream["tags"]["language"]
        .as_str()
        .map(language::normalize_code)
        .filter(|code| !code.is_empty())
}

/// Decodes `ffprobe -show_streams` JSON.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaAttributes, Error> {
    let value: Value = serde_json::from_str(json)?;
    let mut attrs = MediaAttributes::default();

    let streams = value["streams"].as_array().cloned().unwrap_or_default();
    for stream in &streams {
        match stream["codec_type"].as_str() {
            Some("video") => {
                // Cover art is stored as a video stream too.
                if stream["disposition"]["attached_pic"].as_i64() == Some(1) {
                    continue;
                }
                if attrs.height.is_none() {
                    attrs.height = stream["height"].as_u64().map(|h| h as u32);
                    attrs.video_codec = stream["codec_name"].as_str().map(|c| c.to_ascii_lowercase());
                }
                attrs.hdr |= is_hdr_stream(stream);
            }
            Some("audio") => {
                if let Some(codec) = stream["codec_name"].as_str() {
                    let codec = codec.to_ascii_lowercase();
                    if !attrs.audio_codecs.contains(&codec) {
                        attrs.audio_codecs.push(codec);
                    }
                }
                if let Some(lang) = stream_language(stream) {
                    attrs.audio_languages.insert(lang);
                }
                if let Some(channels) = stream["channels"].as_u64() {
                    let channels = channels as u32;
                    attrs.audio_channels_max = Some(attrs.audio_channels_max.map_or(channels, |c| c.max(channels)));
                }
            }
            Some("subtitle") => {
                if let Some(lang) = stream_language(stream) {
                    attrs.subtitle_languages.insert(lang);
                }
            }
            _ => {}
        }
    }

    Ok(attrs)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub probed: usize,
    pub cached: usize,
    pub failed: Vec<(String, String)>,
}

/// Probes `ids` on a bounded pool, reusing cached results when the file is
/// unchanged. Failures leave the file with name hints only.
pub fn probe_files(
    files: &mut [MediaFile],
    ids: &[FileId],
    prober: &dyn Prober,
    cache: &ProbeCache,
    workers: usize,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<ProbeStats, Error> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| Error::InvalidConfig(format!("probe pool: {}", e)))?;

    reporter.on_probe_start(ids.len());
    let done = AtomicUsize::new(0);
    let total = ids.len();
    let snapshot: &[MediaFile] = files;

    let results: Vec<(FileId, bool, Result<MediaAttributes, Error>)> = pool.install(|| {
        ids.par_iter()
            .filter_map(|&id| {
                if cancel.is_cancelled() {
                    return None;
                }
                let file = &snapshot[id];
                let result = match cache.get(file) {
                    Some(attrs) => (id, true, Ok(attrs)),
                    None => {
                        let probed = prober.probe(&file.path);
                        if let Ok(attrs) = &probed {
                            cache.insert(file, attrs.clone());
                        }
                        (id, false, probed)
                    }
                };
                let count = done.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.on_probe_progress(count, total);
                Some(result)
            })
            .collect()
    });

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut stats = ProbeStats::default();
    for (id, from_cache, result) in results {
        let file = &mut files[id];
        match result {
            Ok(attrs) => {
                if from_cache {
                    stats.cached += 1;
                } else {
                    stats.probed += 1;
                }
                file.probed = Some(attrs);
            }
            Err(err) => {
                warn!("{}", err);
                file.probe_error = Some(err.to_string());
                stats.failed.push((file.path_str(), err.to_string()));
            }
        }
    }
    debug!(
        "Probe stage: {} probed, {} from cache, {} failed",
        stats.probed,
        stats.cached,
        stats.failed.len()
    );
    Ok(stats)
}
