//! HLS master playlist

use std::fmt::Write as _;
use std::path::Path;

use spreadify_core::{models::Rendition, Result};

pub const MASTER_PLAYLIST: &str = "master.m3u8";
pub const RENDITION_PLAYLIST: &str = "index.m3u8";
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// Render a master playlist, highest bandwidth first.
#[must_use]
pub fn master_playlist<'a>(renditions: impl IntoIterator<Item = &'a Rendition>) -> String {
    let mut renditions: Vec<&Rendition> = renditions.into_iter().collect();
    renditions.sort_by(|a, b| b.bandwidth_bps().cmp(&a.bandwidth_bps()));

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-INDEPENDENT-SEGMENTS\n");
    for r in renditions {
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},FRAME-RATE={}.000,NAME=\"{}\"",
            r.bandwidth_bps(),
            r.width,
            r.height,
            r.frame_rate,
            r.name
        );
        let _ = writeln!(out, "{}/{RENDITION_PLAYLIST}", r.name);
    }
    out
}

/// Write `master.m3u8` into `dir`, replacing any previous version atomically
/// so players never read a half-written file.
pub async fn write_master_playlist<'a>(
    dir: &Path,
    renditions: impl IntoIterator<Item = &'a Rendition>,
) -> Result<()> {
    let body = master_playlist(renditions);
    let tmp = dir.join(format!("{MASTER_PLAYLIST}.tmp"));
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, dir.join(MASTER_PLAYLIST)).await?;
    Ok(())
}

/// Number of variant streams listed in a master playlist
#[must_use]
pub fn variant_count(playlist: &str) -> usize {
    playlist
        .lines()
        .filter(|l| l.starts_with("#EXT-X-STREAM-INF:"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_playlist_orders_by_bandwidth() {
        let low = Rendition::new("360p", 640, 360, 1000);
        let high = Rendition::new("1080p", 1920, 1080, 6000);
        let playlist = master_playlist([&low, &high]);

        assert_eq!(
            playlist,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-INDEPENDENT-SEGMENTS\n\
             #EXT-X-STREAM-INF:BANDWIDTH=6128000,RESOLUTION=1920x1080,FRAME-RATE=30.000,NAME=\"1080p\"\n\
             1080p/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1128000,RESOLUTION=640x360,FRAME-RATE=30.000,NAME=\"360p\"\n\
             360p/index.m3u8\n"
        );
        assert_eq!(variant_count(&playlist), 2);
    }

    #[tokio::test]
    async fn test_write_master_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rendition::new("720p", 1280, 720, 4000);

        write_master_playlist(dir.path(), [&r]).await.unwrap();

        let written = tokio::fs::read_to_string(dir.path().join(MASTER_PLAYLIST))
            .await
            .unwrap();
        assert_eq!(variant_count(&written), 1);
        assert!(!dir.path().join("master.m3u8.tmp").exists());
    }
}
