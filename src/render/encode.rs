//! Compressed-format encoding via the external media tool.

use std::path::Path;

use crate::error::{ClawError, Result};
use crate::exec;

/// Target codec for [`encode_audio`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Mp3,
    M4a,
}

impl Codec {
    pub fn parse(s: &str) -> Result<Codec> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(Codec::Mp3),
            "m4a" | "aac" => Ok(Codec::M4a),
            other => Err(ClawError::InvalidInput(format!(
                "codec must be mp3 or m4a, got {}",
                other
            ))),
        }
    }
}

/// Encode a WAV to MP3 or M4A/AAC.
///
/// `out_path = "-"` streams to stdout with the container format forced.
pub fn encode_audio(
    in_wav: &str,
    out_path: &str,
    trim_seconds: Option<f64>,
    sample_rate: u32,
    codec: Codec,
    bitrate: &str,
) -> Result<String> {
    let stream_to_stdout = out_path.trim() == "-";

    let mut args = exec::ffmpeg_base_args();
    args.extend([
        "-i".to_string(),
        in_wav.to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
    ]);
    if let Some(t) = trim_seconds {
        args.extend(["-t".to_string(), t.to_string()]);
    }

    match codec {
        Codec::Mp3 => {
            if stream_to_stdout {
                args.extend(["-f".to_string(), "mp3".to_string()]);
            }
            args.extend(["-codec:a", "libmp3lame", "-b:a", bitrate].map(String::from));
        }
        Codec::M4a => {
            if stream_to_stdout {
                args.extend(["-f".to_string(), "ipod".to_string()]);
            }
            args.extend(["-codec:a", "aac", "-b:a", bitrate].map(String::from));
        }
    }

    if stream_to_stdout {
        args.push("pipe:1".to_string());
        let out = exec::ffmpeg(&args)?;
        use std::io::Write;
        std::io::stdout().write_all(&out.stdout)?;
        return Ok("-".to_string());
    }

    if let Some(parent) = Path::new(out_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    args.push(out_path.to_string());
    exec::ffmpeg(&args)?;
    Ok(out_path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_parse() {
        assert_eq!(Codec::parse("mp3").unwrap(), Codec::Mp3);
        assert_eq!(Codec::parse("M4A").unwrap(), Codec::M4a);
        assert_eq!(Codec::parse("aac").unwrap(), Codec::M4a);
        assert!(Codec::parse("ogg").is_err());
    }
}
