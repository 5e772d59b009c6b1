//! ffmpeg argument construction for one rendition

use std::path::Path;

use spreadify_core::models::{Overlay, Rendition};

use super::manifest::{RENDITION_PLAYLIST, SEGMENT_PATTERN};

/// Everything needed to encode one rendition of a stream
#[derive(Debug, Clone, Copy)]
pub struct EncoderJob<'a> {
    pub input_url: &'a str,
    pub rendition: &'a Rendition,
    /// Active overlays, composited in order
    pub overlays: &'a [Overlay],
    pub has_audio: bool,
    pub output_dir: &'a Path,
    pub segment_seconds: u32,
    pub playlist_size: u32,
}

/// Video filter graph: scale the source to the rendition size, then stack
/// each overlay (scaled by its own percentage) at its pixel offset.
///
/// Overlay `n` is ffmpeg input `n + 1`. The final label is `[vout]`.
#[must_use]
pub fn filter_graph(rendition: &Rendition, overlays: &[Overlay]) -> String {
    if overlays.is_empty() {
        return format!("[0:v]scale={}:{}[vout]", rendition.width, rendition.height);
    }

    let mut graph = format!("[0:v]scale={}:{}[base]", rendition.width, rendition.height);
    for (i, overlay) in overlays.iter().enumerate() {
        graph.push_str(&format!(
            ";[{input}:v]scale=iw*{scale}/100:ih*{scale}/100[ov{i}]",
            input = i + 1,
            scale = overlay.scale,
        ));
    }

    let mut previous = "base".to_string();
    for (i, overlay) in overlays.iter().enumerate() {
        let output = if i + 1 == overlays.len() {
            "vout".to_string()
        } else {
            format!("v{i}")
        };
        graph.push_str(&format!(
            ";[{previous}][ov{i}]overlay={}:{}[{output}]",
            overlay.position_x, overlay.position_y
        ));
        previous = output;
    }
    graph
}

/// Full ffmpeg argument list. The rendition playlist path is always last.
#[must_use]
pub fn encoder_args(job: &EncoderJob<'_>) -> Vec<String> {
    let r = job.rendition;
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-i".into(),
        job.input_url.into(),
    ];

    for overlay in job.overlays {
        args.push("-i".into());
        args.push(overlay.image_path.to_string_lossy().into_owned());
    }

    args.extend([
        "-filter_complex".into(),
        filter_graph(r, job.overlays),
        "-map".into(),
        "[vout]".into(),
    ]);

    if job.has_audio {
        args.extend([
            "-map".into(),
            "0:a:0".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            format!("{}k", r.audio_bitrate_kbps),
            "-ar".into(),
            "48000".into(),
        ]);
    } else {
        args.push("-an".into());
    }

    // Keyframe every two seconds so segments cut cleanly
    let gop = r.frame_rate * 2;
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-b:v".into(),
        format!("{}k", r.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", r.video_bitrate_kbps),
        "-bufsize".into(),
        format!("{}k", r.video_bitrate_kbps * 2),
        "-r".into(),
        r.frame_rate.to_string(),
        "-g".into(),
        gop.to_string(),
        "-keyint_min".into(),
        gop.to_string(),
        "-sc_threshold".into(),
        "0".into(),
    ]);

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        job.segment_seconds.to_string(),
        "-hls_list_size".into(),
        job.playlist_size.to_string(),
        "-hls_flags".into(),
        "delete_segments+independent_segments".into(),
        "-hls_segment_filename".into(),
        job.output_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
        job.output_dir
            .join(RENDITION_PLAYLIST)
            .to_string_lossy()
            .into_owned(),
    ]);

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job<'a>(
        rendition: &'a Rendition,
        overlays: &'a [Overlay],
        has_audio: bool,
        dir: &'a Path,
    ) -> EncoderJob<'a> {
        EncoderJob {
            input_url: "rtmp://127.0.0.1/live/key",
            rendition,
            overlays,
            has_audio,
            output_dir: dir,
            segment_seconds: 4,
            playlist_size: 6,
        }
    }

    #[test]
    fn test_filter_graph_without_overlays() {
        let r = Rendition::new("720p", 1280, 720, 4000);
        assert_eq!(filter_graph(&r, &[]), "[0:v]scale=1280:720[vout]");
    }

    #[test]
    fn test_filter_graph_chains_overlays_in_order() {
        let r = Rendition::new("480p", 854, 480, 2000);
        let overlays = [
            Overlay::new("logo.png", 10, 20, 50),
            Overlay::new("badge.png", 800, 400, 100),
        ];
        assert_eq!(
            filter_graph(&r, &overlays),
            "[0:v]scale=854:480[base]\
             ;[1:v]scale=iw*50/100:ih*50/100[ov0]\
             ;[2:v]scale=iw*100/100:ih*100/100[ov1]\
             ;[base][ov0]overlay=10:20[v0]\
             ;[v0][ov1]overlay=800:400[vout]"
        );
    }

    #[test]
    fn test_args_with_audio_and_overlay() {
        let r = Rendition::new("720p", 1280, 720, 4000);
        let overlays = [Overlay::new("/img/logo.png", 5, 5, 25)];
        let dir = PathBuf::from("/out/s1/720p");
        let args = encoder_args(&job(&r, &overlays, true, &dir));

        let joined = args.join(" ");
        assert!(joined.contains("-i rtmp://127.0.0.1/live/key -i /img/logo.png"));
        assert!(joined.contains("-c:a aac -b:a 128k"));
        assert!(joined.contains("-b:v 4000k -maxrate 4000k -bufsize 8000k"));
        assert!(joined.contains("-g 60"));
        assert!(joined.contains("-hls_segment_filename /out/s1/720p/segment_%05d.ts"));
        assert!(!args.contains(&"-an".to_string()));
        assert_eq!(args.last().unwrap(), "/out/s1/720p/index.m3u8");
    }

    #[test]
    fn test_args_without_audio() {
        let r = Rendition::new("360p", 640, 360, 1000);
        let dir = PathBuf::from("/out/s1/360p");
        let args = encoder_args(&job(&r, &[], false, &dir));

        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"aac".to_string()));
        assert!(!args.contains(&"0:a:0".to_string()));
    }
}
